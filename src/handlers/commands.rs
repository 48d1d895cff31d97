use anyhow::Result;
use reqwest::Url;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, ReplyParameters};
use tracing::{info, warn};

use crate::db::models::StylizationRow;
use crate::handlers::access::check_rate_limit;
use crate::handlers::responses::{deliver_styled, reply_text, send_html, send_pdf};
use crate::handlers::{format_keyboard, text_or_sample, user_lang};
use crate::i18n::{tr, trf, Lang, Msg};
use crate::reminders::{create_reminder, parse_remind_args};
use crate::services;
use crate::state::AppState;
use crate::stats::{render_leaderboard, LEADERBOARD_SIZE};
use crate::styles::transform::{clear_formatting, strip_zalgo};
use crate::styles::StyleKind;
use crate::utils::telegram::{stored_username, user_id_i64, TypingIndicator};

const HISTORY_LIMIT: i64 = 5;
const HISTORY_PREVIEW_CHARS: usize = 50;
pub const HELP_CALLBACK: &str = "help";

async fn bot_username(bot: &Bot) -> String {
    match bot.get_me().await {
        Ok(me) => me.user.username.clone().unwrap_or_default(),
        Err(err) => {
            warn!("get_me failed: {err}");
            String::new()
        }
    }
}

fn start_keyboard(bot_username: &str, lang: Lang) -> InlineKeyboardMarkup {
    let mut rows = Vec::new();
    if let Ok(url) = Url::parse(&format!("https://t.me/{bot_username}?startgroup=true")) {
        if !bot_username.is_empty() {
            rows.push(vec![InlineKeyboardButton::url(tr(lang, Msg::AddToGroup), url)]);
        }
    }
    rows.push(vec![InlineKeyboardButton::callback(
        tr(lang, Msg::HelpButton),
        HELP_CALLBACK,
    )]);
    InlineKeyboardMarkup::new(rows)
}

pub async fn start_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let Some(user) = message.from.as_ref() else {
        return Ok(());
    };
    let user_id = user_id_i64(user);
    if state.db.get_user(user_id).await?.is_none() {
        info!("Registering new user {}", user_id);
    }
    state.db.upsert_user(user_id, &stored_username(user)).await?;
    let lang = user_lang(&state, Some(user)).await;
    let username = bot_username(&bot).await;

    bot.send_message(message.chat.id, trf(lang, Msg::Welcome, &[&username]))
        .reply_parameters(ReplyParameters::new(message.id))
        .reply_markup(start_keyboard(&username, lang))
        .await?;
    info!("User {} started the bot", user.id);
    Ok(())
}

pub fn help_text(lang: Lang, bot_username: &str) -> String {
    trf(lang, Msg::Help, &[bot_username])
}

pub async fn help_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let lang = user_lang(&state, message.from.as_ref()).await;
    let username = bot_username(&bot).await;
    reply_text(&bot, &message, help_text(lang, &username)).await
}

pub async fn send_help(bot: &Bot, chat_id: ChatId, lang: Lang) -> Result<()> {
    let username = bot_username(bot).await;
    bot.send_message(chat_id, help_text(lang, &username)).await?;
    Ok(())
}

pub async fn menu_handler(bot: Bot, state: AppState, message: Message, kind: StyleKind) -> Result<()> {
    let lang = user_lang(&state, message.from.as_ref()).await;
    let (title, prefix) = match kind {
        StyleKind::Style => (Msg::StyleMenu, "style"),
        StyleKind::Preset => (Msg::PresetMenu, "preset"),
    };
    bot.send_message(message.chat.id, tr(lang, title))
        .reply_parameters(ReplyParameters::new(message.id))
        .reply_markup(format_keyboard(&state.registry, kind, prefix, lang))
        .await?;
    Ok(())
}

pub async fn random_handler(bot: Bot, state: AppState, message: Message, arg: String) -> Result<()> {
    let Some(user) = message.from.as_ref() else {
        return Ok(());
    };
    let user_id = user_id_i64(user);
    let lang = user_lang(&state, Some(user)).await;
    let text = text_or_sample(&arg, lang);

    let restricted = state.db.restricted_styles(user_id).await?;
    let picked = {
        let mut rng = rand::thread_rng();
        state.registry.random_style(&mut rng).cloned()
    };
    let Some(style) = picked else {
        return Ok(());
    };
    if restricted.iter().any(|name| name == style.name) {
        return reply_text(&bot, &message, trf(lang, Msg::StyleRestricted, &[style.name])).await;
    }

    deliver_styled(
        &bot,
        &state,
        message.chat.id,
        user_id,
        Some(message.id),
        lang,
        &style.render(&text),
        &text,
        Some((StyleKind::Style, style.name)),
    )
    .await
}

fn history_line(index: usize, row: &StylizationRow) -> String {
    let preview: String = row.text.chars().take(HISTORY_PREVIEW_CHARS).collect();
    format!("{}. [{}] {}", index + 1, row.format_name(), preview)
}

pub async fn history_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let Some(user) = message.from.as_ref() else {
        return Ok(());
    };
    let lang = user_lang(&state, Some(user)).await;
    let rows = state
        .db
        .recent_stylizations(user_id_i64(user), HISTORY_LIMIT)
        .await?;
    if rows.is_empty() {
        return reply_text(&bot, &message, tr(lang, Msg::NoHistory)).await;
    }

    let lines: Vec<String> = rows
        .iter()
        .enumerate()
        .map(|(index, row)| history_line(index, row))
        .collect();
    reply_text(&bot, &message, trf(lang, Msg::History, &[&lines.join("\n")])).await
}

pub async fn clear_handler(bot: Bot, state: AppState, message: Message, arg: String) -> Result<()> {
    let lang = user_lang(&state, message.from.as_ref()).await;
    let text = text_or_sample(&arg, lang);
    reply_text(&bot, &message, strip_zalgo(&clear_formatting(&text))).await
}

pub async fn export_pdf_handler(bot: Bot, state: AppState, message: Message, arg: String) -> Result<()> {
    let lang = user_lang(&state, message.from.as_ref()).await;
    let text = text_or_sample(&arg, lang);
    send_pdf(&bot, message.chat.id, &text, lang).await
}

pub async fn language_handler(bot: Bot, state: AppState, message: Message, arg: String) -> Result<()> {
    let Some(user) = message.from.as_ref() else {
        return Ok(());
    };
    let current = user_lang(&state, Some(user)).await;
    let Some(lang) = Lang::parse(arg.trim()) else {
        return reply_text(&bot, &message, tr(current, Msg::LanguageUsage)).await;
    };

    let user_id = user_id_i64(user);
    state.db.upsert_user(user_id, &stored_username(user)).await?;
    state.db.set_user_language(user_id, lang.code()).await?;
    reply_text(&bot, &message, tr(lang, Msg::LanguageSet)).await
}

pub async fn quote_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let lang = user_lang(&state, message.from.as_ref()).await;
    if !check_rate_limit(&bot, &message, lang).await {
        return Ok(());
    }
    let text = match services::random_quote().await {
        Ok(quote) => quote,
        Err(err) => {
            warn!("Quote service failed: {err:#}");
            tr(lang, Msg::QuoteUnavailable).to_string()
        }
    };
    reply_text(&bot, &message, text).await
}

pub async fn joke_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let lang = user_lang(&state, message.from.as_ref()).await;
    if !check_rate_limit(&bot, &message, lang).await {
        return Ok(());
    }
    let text = match services::random_joke().await {
        Ok(joke) => joke,
        Err(err) => {
            warn!("Joke service failed: {err:#}");
            tr(lang, Msg::JokeUnavailable).to_string()
        }
    };
    reply_text(&bot, &message, text).await
}

/// Splits "<lang> <text>"; the language must be a two-letter code.
pub fn parse_translate_args(args: &str) -> Option<(String, String)> {
    let (target, text) = args.trim().split_once(char::is_whitespace)?;
    let text = text.trim();
    let valid_code = target.len() == 2 && target.chars().all(|c| c.is_ascii_alphabetic());
    if !valid_code || text.is_empty() {
        return None;
    }
    Some((target.to_lowercase(), text.to_string()))
}

pub async fn translate_handler(bot: Bot, state: AppState, message: Message, arg: String) -> Result<()> {
    let lang = user_lang(&state, message.from.as_ref()).await;
    let Some((target, text)) = parse_translate_args(&arg) else {
        return reply_text(&bot, &message, tr(lang, Msg::TranslateUsage)).await;
    };
    if !check_rate_limit(&bot, &message, lang).await {
        return Ok(());
    }

    let _typing = TypingIndicator::start(bot.clone(), message.chat.id);
    let reply = match services::translate(&text, &target).await {
        Ok(translated) => translated,
        Err(err) => {
            warn!("Translation to {} failed: {err:#}", target);
            tr(lang, Msg::TranslateFailed).to_string()
        }
    };
    reply_text(&bot, &message, reply).await
}

pub async fn remind_handler(bot: Bot, state: AppState, message: Message, arg: String) -> Result<()> {
    let Some(user) = message.from.as_ref() else {
        return Ok(());
    };
    let lang = user_lang(&state, Some(user)).await;
    let Some((minutes, text)) = parse_remind_args(&arg) else {
        return reply_text(&bot, &message, tr(lang, Msg::RemindUsage)).await;
    };

    let reminder = create_reminder(
        bot.clone(),
        state.db.clone(),
        &state.scheduler,
        user_id_i64(user),
        message.chat.id.0,
        minutes,
        &text,
    )
    .await?;
    info!(
        "Reminder {} set by {} for {} min",
        reminder.id, reminder.user_id, minutes
    );
    reply_text(&bot, &message, trf(lang, Msg::ReminderSet, &[&minutes.to_string()])).await
}

pub async fn stats_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let lang = user_lang(&state, message.from.as_ref()).await;
    let rows = state
        .db
        .top_chat_users(message.chat.id.0, LEADERBOARD_SIZE)
        .await?;
    let text = render_leaderboard(&rows, lang);
    if rows.is_empty() {
        return reply_text(&bot, &message, text).await;
    }
    send_html(&bot, message.chat.id, &text, Some(message.id), None).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn translate_args_need_code_and_text() {
        assert_eq!(
            parse_translate_args("EN привет мир"),
            Some(("en".to_string(), "привет мир".to_string()))
        );
        assert_eq!(parse_translate_args("en"), None);
        assert_eq!(parse_translate_args("english hello"), None);
        assert_eq!(parse_translate_args("e1 hello"), None);
    }

    #[test]
    fn history_lines_name_the_format_and_cut_long_text() {
        let row = StylizationRow {
            id: 1,
            user_id: 7,
            style: None,
            preset: Some("meme".to_string()),
            text: "x".repeat(80),
            created_at: Utc::now(),
        };
        let line = history_line(0, &row);
        assert!(line.starts_with("1. [meme] "));
        assert_eq!(line.chars().filter(|c| *c == 'x').count(), HISTORY_PREVIEW_CHARS);
    }

    #[test]
    fn start_keyboard_skips_group_button_without_username() {
        assert_eq!(start_keyboard("", Lang::En).inline_keyboard.len(), 1);
        let keyboard = start_keyboard("styler_bot", Lang::En);
        assert_eq!(keyboard.inline_keyboard.len(), 2);
    }
}
