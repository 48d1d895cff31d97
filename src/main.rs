use std::error::Error;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dotenvy::dotenv;
use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{error, info};

mod broadcast;
mod captcha;
mod config;
mod dashboard;
mod db;
mod export;
mod handlers;
mod i18n;
mod llm;
mod moderation;
mod reminders;
mod scheduler;
mod services;
mod state;
mod stats;
mod styles;
mod utils;

use config::{Config, CONFIG};
use db::database::Database;
use handlers::{admin, ai, callbacks, captcha as captcha_handlers, commands, inline, messages};
use llm::gigachat::AiCommand;
use moderation::{Classifier, HttpClassifier, SpamPolicy};
use state::AppState;
use styles::StyleKind;
use utils::logging::init_logging;
use utils::timing::{complete_command_timer, start_command_timer};

#[derive(BotCommands, Clone)]
#[command(rename_rule = "snake_case")]
enum Command {
    Start,
    Help,
    Style,
    Preset,
    Random(String),
    History,
    Clear(String),
    ExportPdf(String),
    Language(String),
    Quote,
    Joke,
    Translate(String),
    Remind(String),
    Stats,
    Gigachadify(String),
    MakePost(String),
    Rewrite(String),
    Smartreply(String),
    AdminPanel,
    Users,
    Broadcast(String),
    SetGroupTemplate,
    ClearGroupTemplate,
    RestrictStyle(String),
    UnrestrictStyle(String),
    Captcha(String),
    CaptchaMode(String),
    CaptchaText(String),
    Welcome(String),
    Spamfilter(String),
    Status,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Help => "help",
            Command::Style => "style",
            Command::Preset => "preset",
            Command::Random(_) => "random",
            Command::History => "history",
            Command::Clear(_) => "clear",
            Command::ExportPdf(_) => "export_pdf",
            Command::Language(_) => "language",
            Command::Quote => "quote",
            Command::Joke => "joke",
            Command::Translate(_) => "translate",
            Command::Remind(_) => "remind",
            Command::Stats => "stats",
            Command::Gigachadify(_) => "gigachadify",
            Command::MakePost(_) => "make_post",
            Command::Rewrite(_) => "rewrite",
            Command::Smartreply(_) => "smartreply",
            Command::AdminPanel => "admin_panel",
            Command::Users => "users",
            Command::Broadcast(_) => "broadcast",
            Command::SetGroupTemplate => "set_group_template",
            Command::ClearGroupTemplate => "clear_group_template",
            Command::RestrictStyle(_) => "restrict_style",
            Command::UnrestrictStyle(_) => "unrestrict_style",
            Command::Captcha(_) => "captcha",
            Command::CaptchaMode(_) => "captcha_mode",
            Command::CaptchaText(_) => "captcha_text",
            Command::Welcome(_) => "welcome",
            Command::Spamfilter(_) => "spamfilter",
            Command::Status => "status",
        }
    }
}

type HandlerResult = Result<(), Box<dyn Error + Send + Sync>>;

#[tokio::main]
async fn main() -> HandlerResult {
    dotenv().ok();
    if let Err(err) = Config::load() {
        eprintln!("Configuration error: {err:#}");
        return Err(err.into());
    }
    let _guards = init_logging();

    let bot = Bot::new(CONFIG.bot_token.clone());
    info!("Starting TextStyler bot");

    let db = Database::init(&CONFIG.database_url).await?;
    let classifier: Arc<dyn Classifier> = Arc::new(HttpClassifier::from_config());
    let state = AppState::new(
        db.clone(),
        classifier,
        SpamPolicy::from_config(),
        Duration::from_secs(CONFIG.captcha_fail_delay_seconds),
    );

    reminders::restore_pending(bot.clone(), db.clone(), &state.scheduler).await?;

    if CONFIG.dashboard_enabled {
        let token = Some(CONFIG.dashboard_token.trim().to_string()).filter(|token| !token.is_empty());
        let dashboard_db = db.clone();
        tokio::spawn(async move {
            if let Err(err) = dashboard::serve(dashboard_db, CONFIG.dashboard_addr, token).await {
                error!("dashboard failed: {err:#}");
            }
        });
    }

    let command_handler = dptree::entry()
        .filter_command::<Command>()
        .endpoint(handle_command);

    let message_handler = Update::filter_message()
        .branch(command_handler)
        .branch(
            dptree::filter(|msg: Message| msg.new_chat_members().is_some())
                .endpoint(handle_new_members),
        )
        .branch(dptree::filter(|msg: Message| msg.text().is_some()).endpoint(handle_text_message))
        .endpoint(ignore_message);

    let callback_handler = Update::filter_callback_query().endpoint(handle_callback_query);
    let inline_handler = Update::filter_inline_query().endpoint(handle_inline_query);

    let handler = dptree::entry()
        .branch(message_handler)
        .branch(callback_handler)
        .branch(inline_handler);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

/// Runs a command handler on its own task with timing events around it.
fn spawn_command<F>(name: &'static str, message: &Message, handler: F)
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let mut timer = start_command_timer(name, message);
    tokio::spawn(async move {
        match handler.await {
            Ok(()) => complete_command_timer(&mut timer, "success", None),
            Err(err) => {
                error!("{name} handler failed: {err:#}");
                complete_command_timer(&mut timer, "error", Some(err.to_string()));
            }
        }
    });
}

async fn handle_command(
    bot: Bot,
    state: AppState,
    message: Message,
    command: Command,
) -> HandlerResult {
    let name = command.name();
    let msg = message.clone();
    match command {
        Command::Start => spawn_command(name, &msg, commands::start_handler(bot, state, message)),
        Command::Help => spawn_command(name, &msg, commands::help_handler(bot, state, message)),
        Command::Style => spawn_command(
            name,
            &msg,
            commands::menu_handler(bot, state, message, StyleKind::Style),
        ),
        Command::Preset => spawn_command(
            name,
            &msg,
            commands::menu_handler(bot, state, message, StyleKind::Preset),
        ),
        Command::Random(arg) => {
            spawn_command(name, &msg, commands::random_handler(bot, state, message, arg))
        }
        Command::History => {
            spawn_command(name, &msg, commands::history_handler(bot, state, message))
        }
        Command::Clear(arg) => {
            spawn_command(name, &msg, commands::clear_handler(bot, state, message, arg))
        }
        Command::ExportPdf(arg) => spawn_command(
            name,
            &msg,
            commands::export_pdf_handler(bot, state, message, arg),
        ),
        Command::Language(arg) => spawn_command(
            name,
            &msg,
            commands::language_handler(bot, state, message, arg),
        ),
        Command::Quote => spawn_command(name, &msg, commands::quote_handler(bot, state, message)),
        Command::Joke => spawn_command(name, &msg, commands::joke_handler(bot, state, message)),
        Command::Translate(arg) => spawn_command(
            name,
            &msg,
            commands::translate_handler(bot, state, message, arg),
        ),
        Command::Remind(arg) => {
            spawn_command(name, &msg, commands::remind_handler(bot, state, message, arg))
        }
        Command::Stats => spawn_command(name, &msg, commands::stats_handler(bot, state, message)),
        Command::Gigachadify(arg) => spawn_command(
            name,
            &msg,
            ai::ai_command_handler(bot, state, message, AiCommand::Gigachadify, arg),
        ),
        Command::MakePost(arg) => spawn_command(
            name,
            &msg,
            ai::ai_command_handler(bot, state, message, AiCommand::MakePost, arg),
        ),
        Command::Rewrite(arg) => spawn_command(
            name,
            &msg,
            ai::ai_command_handler(bot, state, message, AiCommand::Rewrite, arg),
        ),
        Command::Smartreply(arg) => {
            spawn_command(name, &msg, ai::smartreply_handler(bot, state, message, arg))
        }
        Command::AdminPanel => {
            spawn_command(name, &msg, admin::admin_panel_handler(bot, state, message))
        }
        Command::Users => spawn_command(name, &msg, admin::users_handler(bot, state, message)),
        Command::Broadcast(arg) => {
            spawn_command(name, &msg, admin::broadcast_handler(bot, state, message, arg))
        }
        Command::SetGroupTemplate => spawn_command(
            name,
            &msg,
            admin::set_group_template_handler(bot, state, message),
        ),
        Command::ClearGroupTemplate => spawn_command(
            name,
            &msg,
            admin::clear_group_template_handler(bot, state, message),
        ),
        Command::RestrictStyle(arg) => spawn_command(
            name,
            &msg,
            admin::restrict_style_handler(bot, state, message, arg, true),
        ),
        Command::UnrestrictStyle(arg) => spawn_command(
            name,
            &msg,
            admin::restrict_style_handler(bot, state, message, arg, false),
        ),
        Command::Captcha(arg) => {
            spawn_command(name, &msg, admin::captcha_handler(bot, state, message, arg))
        }
        Command::CaptchaMode(arg) => spawn_command(
            name,
            &msg,
            admin::captcha_mode_handler(bot, state, message, arg),
        ),
        Command::CaptchaText(arg) => spawn_command(
            name,
            &msg,
            admin::captcha_text_handler(bot, state, message, arg),
        ),
        Command::Welcome(arg) => {
            spawn_command(name, &msg, admin::welcome_handler(bot, state, message, arg))
        }
        Command::Spamfilter(arg) => {
            spawn_command(name, &msg, admin::spamfilter_handler(bot, state, message, arg))
        }
        Command::Status => spawn_command(name, &msg, admin::status_handler(bot, state, message)),
    }
    Ok(())
}

async fn handle_new_members(bot: Bot, state: AppState, message: Message) -> HandlerResult {
    tokio::spawn(async move {
        if let Err(err) = captcha_handlers::new_members_handler(bot, state, message).await {
            error!("new members handler failed: {err:#}");
        }
    });
    Ok(())
}

async fn handle_text_message(bot: Bot, state: AppState, message: Message) -> HandlerResult {
    tokio::spawn(async move {
        if let Err(err) = messages::text_message_handler(bot, state, message).await {
            error!("message handler failed: {err:#}");
        }
    });
    Ok(())
}

async fn handle_callback_query(bot: Bot, state: AppState, query: CallbackQuery) -> HandlerResult {
    tokio::spawn(async move {
        if let Err(err) = callbacks::handle_callback_query(bot, state, query).await {
            error!("callback handler failed: {err:#}");
        }
    });
    Ok(())
}

async fn handle_inline_query(bot: Bot, state: AppState, query: InlineQuery) -> HandlerResult {
    if let Err(err) = inline::inline_query_handler(bot, state, query).await {
        error!("inline query handler failed: {err:#}");
    }
    Ok(())
}

async fn ignore_message(_message: Message) -> HandlerResult {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_with_snake_case_names() {
        let parsed = Command::parse("/export_pdf hello", "styler_bot").unwrap();
        assert!(matches!(parsed, Command::ExportPdf(ref arg) if arg == "hello"));
        assert_eq!(parsed.name(), "export_pdf");

        let parsed = Command::parse("/captcha_mode math", "styler_bot").unwrap();
        assert!(matches!(parsed, Command::CaptchaMode(ref arg) if arg == "math"));

        let parsed = Command::parse("/random", "styler_bot").unwrap();
        assert!(matches!(parsed, Command::Random(ref arg) if arg.is_empty()));
    }
}
