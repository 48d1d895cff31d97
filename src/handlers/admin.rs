use std::time::Duration;

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::ReplyParameters;
use tracing::{info, warn};

use crate::broadcast::broadcast;
use crate::captcha::CaptchaMode;
use crate::config::CONFIG;
use crate::db::models::SettingsChange;
use crate::handlers::access::check_admin_access;
use crate::handlers::responses::reply_text;
use crate::handlers::{format_keyboard, user_lang};
use crate::i18n::{on_off, tr, trf, Lang, Msg};
use crate::state::AppState;
use crate::styles::StyleKind;
use crate::utils::telegram::user_id_i64;

const RECENT_USERS_LIMIT: i64 = 20;
pub const GROUP_PRESET_PREFIX: &str = "gpreset";

pub fn parse_on_off(arg: &str) -> Option<bool> {
    match arg.trim().to_lowercase().as_str() {
        "on" | "true" | "1" | "вкл" => Some(true),
        "off" | "false" | "0" | "выкл" => Some(false),
        _ => None,
    }
}

/// Parses "<user_id> <style>".
pub fn parse_restrict_args(arg: &str) -> Option<(i64, String)> {
    let mut parts = arg.split_whitespace();
    let user_id = parts.next()?.parse::<i64>().ok()?;
    let style = parts.next()?.to_lowercase();
    if parts.next().is_some() {
        return None;
    }
    Some((user_id, style))
}

fn is_group(message: &Message) -> bool {
    message.chat.is_group() || message.chat.is_supergroup()
}

fn sender_id(message: &Message) -> i64 {
    message.from.as_ref().map(user_id_i64).unwrap_or_default()
}

/// Admin check plus group-only check shared by the per-chat settings commands.
async fn admin_in_group(bot: &Bot, message: &Message, lang: Lang, command: &str) -> bool {
    if !check_admin_access(bot, message, lang, command).await {
        return false;
    }
    if !is_group(message) {
        let _ = bot
            .send_message(message.chat.id, tr(lang, Msg::GroupsOnly))
            .reply_parameters(ReplyParameters::new(message.id))
            .await;
        return false;
    }
    true
}

pub async fn admin_panel_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let lang = user_lang(&state, message.from.as_ref()).await;
    if !check_admin_access(&bot, &message, lang, "admin_panel").await {
        return Ok(());
    }
    reply_text(&bot, &message, tr(lang, Msg::AdminMenu)).await
}

pub async fn users_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let lang = user_lang(&state, message.from.as_ref()).await;
    if !check_admin_access(&bot, &message, lang, "users").await {
        return Ok(());
    }

    let users = state.db.list_recent_users(RECENT_USERS_LIMIT).await?;
    if users.is_empty() {
        return reply_text(&bot, &message, tr(lang, Msg::NoUsers)).await;
    }
    let mut lines = vec![tr(lang, Msg::RecentUsers).to_string()];
    for user in &users {
        lines.push(format!(
            "{} — {} ({})",
            user.user_id,
            user.username.as_deref().unwrap_or("Unknown"),
            user.joined_at.format("%Y-%m-%d")
        ));
    }
    reply_text(&bot, &message, lines.join("\n")).await
}

pub async fn broadcast_handler(bot: Bot, state: AppState, message: Message, arg: String) -> Result<()> {
    let lang = user_lang(&state, message.from.as_ref()).await;
    if !check_admin_access(&bot, &message, lang, "broadcast").await {
        return Ok(());
    }
    let text = arg.trim().to_string();
    if text.is_empty() {
        return reply_text(&bot, &message, tr(lang, Msg::BroadcastUsage)).await;
    }

    let recipients = state.db.list_user_ids().await?;
    info!(
        "Broadcast from {} to {} users",
        sender_id(&message),
        recipients.len()
    );
    let delay = Duration::from_millis(CONFIG.broadcast_delay_ms);
    let report = broadcast(&recipients, delay, |user_id| {
        let bot = bot.clone();
        let text = text.clone();
        async move { bot.send_message(ChatId(user_id), text).await.map(|_| ()) }
    })
    .await;

    reply_text(
        &bot,
        &message,
        trf(
            lang,
            Msg::BroadcastSent,
            &[&report.sent.to_string(), &report.failed.to_string()],
        ),
    )
    .await
}

pub async fn set_group_template_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let lang = user_lang(&state, message.from.as_ref()).await;
    if !admin_in_group(&bot, &message, lang, "set_group_template").await {
        return Ok(());
    }
    bot.send_message(message.chat.id, tr(lang, Msg::SetGroupTemplate))
        .reply_parameters(ReplyParameters::new(message.id))
        .reply_markup(format_keyboard(
            &state.registry,
            StyleKind::Preset,
            GROUP_PRESET_PREFIX,
            lang,
        ))
        .await?;
    Ok(())
}

pub async fn clear_group_template_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let lang = user_lang(&state, message.from.as_ref()).await;
    if !admin_in_group(&bot, &message, lang, "clear_group_template").await {
        return Ok(());
    }
    state.db.clear_group_template(message.chat.id.0).await?;
    info!("Group template cleared for chat {}", message.chat.id);
    reply_text(&bot, &message, tr(lang, Msg::GroupTemplateCleared)).await
}

pub async fn restrict_style_handler(
    bot: Bot,
    state: AppState,
    message: Message,
    arg: String,
    restrict: bool,
) -> Result<()> {
    let command = if restrict {
        "restrict_style"
    } else {
        "unrestrict_style"
    };
    let lang = user_lang(&state, message.from.as_ref()).await;
    if !check_admin_access(&bot, &message, lang, command).await {
        return Ok(());
    }
    let Some((user_id, style)) = parse_restrict_args(&arg) else {
        return reply_text(&bot, &message, trf(lang, Msg::RestrictUsage, &[command])).await;
    };
    if state.registry.get(StyleKind::Style, &style).is_none() {
        return reply_text(&bot, &message, trf(lang, Msg::UnknownStyle, &[&style])).await;
    }

    let user_text = user_id.to_string();
    if restrict {
        state.db.restrict_style(user_id, &style).await?;
        info!("Style {} restricted for {}", style, user_id);
        reply_text(
            &bot,
            &message,
            trf(lang, Msg::StyleRestrictedSet, &[&style, &user_text]),
        )
        .await
    } else {
        let removed = state.db.unrestrict_style(user_id, &style).await?;
        info!(
            "Style {} unrestricted for {} (was restricted: {})",
            style, user_id, removed
        );
        reply_text(
            &bot,
            &message,
            trf(lang, Msg::StyleRestrictionLifted, &[&style, &user_text]),
        )
        .await
    }
}

async fn apply_settings(state: &AppState, message: &Message, change: SettingsChange) -> Result<()> {
    state
        .db
        .update_chat_settings(sender_id(message), message.chat.id.0, &[change])
        .await?;
    Ok(())
}

pub async fn captcha_handler(bot: Bot, state: AppState, message: Message, arg: String) -> Result<()> {
    let lang = user_lang(&state, message.from.as_ref()).await;
    if !admin_in_group(&bot, &message, lang, "captcha").await {
        return Ok(());
    }
    let Some(enabled) = parse_on_off(&arg) else {
        return reply_text(&bot, &message, tr(lang, Msg::CaptchaUsage)).await;
    };
    apply_settings(&state, &message, SettingsChange::CaptchaEnabled(enabled)).await?;
    info!("CAPTCHA {} in chat {}", enabled, message.chat.id);
    reply_text(&bot, &message, trf(lang, Msg::CaptchaState, &[on_off(lang, enabled)])).await
}

pub async fn captcha_mode_handler(bot: Bot, state: AppState, message: Message, arg: String) -> Result<()> {
    let lang = user_lang(&state, message.from.as_ref()).await;
    if !admin_in_group(&bot, &message, lang, "captcha_mode").await {
        return Ok(());
    }
    let mode = match arg.trim().to_lowercase().parse::<CaptchaMode>() {
        Ok(mode) => mode,
        Err(err) => {
            warn!("Rejected CAPTCHA mode: {err}");
            return reply_text(&bot, &message, tr(lang, Msg::CaptchaModeUsage)).await;
        }
    };
    apply_settings(&state, &message, SettingsChange::CaptchaMode(mode)).await?;
    reply_text(&bot, &message, trf(lang, Msg::CaptchaModeSet, &[mode.as_str()])).await
}

fn optional_text(arg: &str) -> Option<String> {
    Some(arg.trim().to_string()).filter(|text| !text.is_empty())
}

pub async fn captcha_text_handler(bot: Bot, state: AppState, message: Message, arg: String) -> Result<()> {
    let lang = user_lang(&state, message.from.as_ref()).await;
    if !admin_in_group(&bot, &message, lang, "captcha_text").await {
        return Ok(());
    }
    apply_settings(&state, &message, SettingsChange::CaptchaText(optional_text(&arg))).await?;
    reply_text(&bot, &message, tr(lang, Msg::CaptchaTextSet)).await
}

pub async fn welcome_handler(bot: Bot, state: AppState, message: Message, arg: String) -> Result<()> {
    let lang = user_lang(&state, message.from.as_ref()).await;
    if !admin_in_group(&bot, &message, lang, "welcome").await {
        return Ok(());
    }
    apply_settings(
        &state,
        &message,
        SettingsChange::WelcomeMessage(optional_text(&arg)),
    )
    .await?;
    reply_text(&bot, &message, tr(lang, Msg::WelcomeSet)).await
}

pub async fn spamfilter_handler(bot: Bot, state: AppState, message: Message, arg: String) -> Result<()> {
    let lang = user_lang(&state, message.from.as_ref()).await;
    if !admin_in_group(&bot, &message, lang, "spamfilter").await {
        return Ok(());
    }
    let Some(enabled) = parse_on_off(&arg) else {
        return reply_text(&bot, &message, tr(lang, Msg::SpamFilterUsage)).await;
    };
    apply_settings(&state, &message, SettingsChange::SpamFilter(enabled)).await?;
    info!("Spam filter {} in chat {}", enabled, message.chat.id);
    reply_text(
        &bot,
        &message,
        trf(lang, Msg::SpamFilterState, &[on_off(lang, enabled)]),
    )
    .await
}

#[derive(Debug, Clone, PartialEq)]
struct StatusSnapshot {
    db_error: Option<String>,
    scheduled: usize,
    pending_captchas: usize,
    gigachat: bool,
    classifier: bool,
    spam_label: String,
    spam_threshold: f32,
    dashboard: Option<String>,
}

fn configured(lang: Lang, value: bool) -> &'static str {
    if value {
        tr(lang, Msg::Configured)
    } else {
        tr(lang, Msg::NotConfigured)
    }
}

fn render_status(snapshot: &StatusSnapshot, lang: Lang) -> String {
    let db_status = match &snapshot.db_error {
        None => tr(lang, Msg::StatusDbOk).to_string(),
        Some(err) => trf(lang, Msg::StatusDbError, &[err.as_str()]),
    };
    let dashboard = snapshot
        .dashboard
        .clone()
        .unwrap_or_else(|| tr(lang, Msg::Disabled).to_string());
    [
        tr(lang, Msg::StatusHeader).to_string(),
        trf(lang, Msg::StatusDatabase, &[&db_status]),
        trf(lang, Msg::StatusScheduled, &[&snapshot.scheduled.to_string()]),
        trf(lang, Msg::StatusCaptchas, &[&snapshot.pending_captchas.to_string()]),
        trf(lang, Msg::StatusGigachat, &[configured(lang, snapshot.gigachat)]),
        trf(lang, Msg::StatusClassifier, &[configured(lang, snapshot.classifier)]),
        trf(
            lang,
            Msg::StatusSpamPolicy,
            &[&snapshot.spam_label, &snapshot.spam_threshold.to_string()],
        ),
        trf(lang, Msg::StatusDashboard, &[&dashboard]),
    ]
    .join("\n")
}

async fn build_status_report(state: &AppState, lang: Lang) -> String {
    let snapshot = StatusSnapshot {
        db_error: state.db.health_check().await.err().map(|err| err.to_string()),
        scheduled: state.scheduler.len(),
        pending_captchas: state.challenges.len(),
        gigachat: CONFIG.gigachat_configured(),
        classifier: CONFIG.classifier_configured(),
        spam_label: state.spam_policy.label.clone(),
        spam_threshold: state.spam_policy.threshold,
        dashboard: CONFIG
            .dashboard_enabled
            .then(|| format!("http://{}", CONFIG.dashboard_addr)),
    };
    render_status(&snapshot, lang)
}

pub async fn status_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let lang = user_lang(&state, message.from.as_ref()).await;
    if !check_admin_access(&bot, &message, lang, "status").await {
        return Ok(());
    }
    let report = build_status_report(&state, lang).await;
    reply_text(&bot, &message, report).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_off_accepts_both_languages() {
        assert_eq!(parse_on_off(" ON "), Some(true));
        assert_eq!(parse_on_off("выкл"), Some(false));
        assert_eq!(parse_on_off("maybe"), None);
    }

    #[test]
    fn restrict_args_need_numeric_user_and_one_style() {
        assert_eq!(
            parse_restrict_args("42 Zalgo"),
            Some((42, "zalgo".to_string()))
        );
        assert_eq!(parse_restrict_args("bob zalgo"), None);
        assert_eq!(parse_restrict_args("42"), None);
        assert_eq!(parse_restrict_args("42 zalgo fire"), None);
    }

    fn snapshot() -> StatusSnapshot {
        StatusSnapshot {
            db_error: None,
            scheduled: 3,
            pending_captchas: 1,
            gigachat: true,
            classifier: false,
            spam_label: "NEGATIVE".to_string(),
            spam_threshold: 0.9,
            dashboard: None,
        }
    }

    #[test]
    fn status_report_follows_user_language() {
        let en = render_status(&snapshot(), Lang::En);
        assert_eq!(
            en,
            "TextStyler status\ndatabase: ok\nscheduled tasks: 3\npending captchas: 1\n\
             GigaChat: configured\nspam classifier: not configured\n\
             spam policy: label=NEGATIVE threshold=0.9\ndashboard: disabled"
        );

        let ru = render_status(&snapshot(), Lang::Ru);
        assert!(ru.starts_with("Состояние TextStyler\nбаза данных: в порядке"));
        assert!(ru.contains("классификатор спама: не настроен"));
        assert!(!ru.contains("configured"));
    }

    #[test]
    fn status_report_shows_database_errors_and_dashboard_address() {
        let mut broken = snapshot();
        broken.db_error = Some("pool closed".to_string());
        broken.dashboard = Some("http://127.0.0.1:8080".to_string());
        let report = render_status(&broken, Lang::En);
        assert!(report.contains("database: error (pool closed)"));
        assert!(report.ends_with("dashboard: http://127.0.0.1:8080"));
    }
}
