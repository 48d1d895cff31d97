use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use teloxide::prelude::*;
use teloxide::RequestError;
use tracing::{error, info, warn};

use crate::config::CONFIG;
use crate::db::database::Database;
use crate::db::models::ReminderRow;
use crate::handlers::responses::telegram_retryable_error;
use crate::i18n::{trf, Lang, Msg};
use crate::scheduler::{TaskKey, TaskScheduler};
use crate::styles::transform::escape_html;

/// One week.
pub const MAX_REMINDER_MINUTES: u64 = 7 * 24 * 60;

/// Parses "<minutes> <text>".
pub fn parse_remind_args(args: &str) -> Option<(u64, String)> {
    let (minutes, text) = args.trim().split_once(char::is_whitespace)?;
    let minutes = minutes.parse::<u64>().ok()?;
    let text = text.trim();
    if minutes == 0 || minutes > MAX_REMINDER_MINUTES || text.is_empty() {
        return None;
    }
    Some((minutes, text.to_string()))
}

/// Time left until `fire_at`; overdue reminders fire immediately.
pub fn delay_until(fire_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (fire_at - now).to_std().unwrap_or(Duration::ZERO)
}

/// Whether a reminder is finished after a send attempt. Transient failures
/// leave it pending so `restore_pending` retries it on the next start.
fn delivery_settled(result: &Result<Message, RequestError>) -> bool {
    match result {
        Ok(_) => true,
        Err(err) => !telegram_retryable_error(err),
    }
}

async fn deliver(bot: Bot, db: Database, reminder: ReminderRow) {
    let stored = db.user_language(reminder.user_id).await.ok().flatten();
    let lang = Lang::resolve(stored.as_deref(), None, &CONFIG.default_language);
    let text = trf(lang, Msg::ReminderFired, &[&escape_html(&reminder.text)]);

    let result = bot
        .send_message(ChatId(reminder.chat_id), text)
        .parse_mode(teloxide::types::ParseMode::Html)
        .await;
    let settled = delivery_settled(&result);
    match (&result, settled) {
        (Ok(_), _) => {}
        (Err(err), true) => error!("Dropping reminder {}: {}", reminder.id, err),
        (Err(err), false) => {
            warn!("Reminder {} left pending after send failure: {}", reminder.id, err);
            return;
        }
    }
    if let Err(err) = db.mark_reminder_delivered(reminder.id).await {
        error!("Failed to mark reminder {} delivered: {}", reminder.id, err);
    }
}

pub fn schedule_delivery(bot: Bot, db: Database, scheduler: &TaskScheduler, reminder: ReminderRow) {
    let key = TaskKey::reminder(reminder.chat_id, reminder.user_id, reminder.id);
    let delay = delay_until(reminder.fire_at, Utc::now());
    scheduler.schedule(key, delay, deliver(bot, db, reminder));
}

pub async fn create_reminder(
    bot: Bot,
    db: Database,
    scheduler: &TaskScheduler,
    user_id: i64,
    chat_id: i64,
    minutes: u64,
    text: &str,
) -> Result<ReminderRow> {
    let fire_at = Utc::now() + chrono::Duration::minutes(minutes as i64);
    let id = db.insert_reminder(user_id, chat_id, text, fire_at).await?;
    let reminder = ReminderRow {
        id,
        user_id,
        chat_id,
        text: text.to_string(),
        fire_at,
    };
    schedule_delivery(bot, db, scheduler, reminder.clone());
    Ok(reminder)
}

/// Reschedules reminders that were pending when the process last stopped.
pub async fn restore_pending(bot: Bot, db: Database, scheduler: &TaskScheduler) -> Result<usize> {
    let pending = db.pending_reminders().await?;
    let count = pending.len();
    for reminder in pending {
        schedule_delivery(bot.clone(), db.clone(), scheduler, reminder);
    }
    info!("Restored {} pending reminders", count);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remind_args_need_minutes_and_text() {
        assert_eq!(
            parse_remind_args("5 buy milk"),
            Some((5, "buy milk".to_string()))
        );
        assert_eq!(
            parse_remind_args(" 10\n call mom "),
            Some((10, "call mom".to_string()))
        );
        assert_eq!(parse_remind_args("5"), None);
        assert_eq!(parse_remind_args("soon buy milk"), None);
        assert_eq!(parse_remind_args("0 now"), None);
        assert_eq!(parse_remind_args("99999 later"), None);
    }

    #[test]
    fn only_transient_send_failures_keep_a_reminder_pending() {
        use teloxide::types::Seconds;
        use teloxide::ApiError;

        let blocked: Result<Message, RequestError> = Err(RequestError::Api(ApiError::BotBlocked));
        assert!(delivery_settled(&blocked));

        let throttled: Result<Message, RequestError> =
            Err(RequestError::RetryAfter(Seconds::from_seconds(3)));
        assert!(!delivery_settled(&throttled));
    }

    #[test]
    fn overdue_reminders_fire_immediately() {
        let now = Utc::now();
        assert_eq!(
            delay_until(now - chrono::Duration::minutes(3), now),
            Duration::ZERO
        );
        assert_eq!(
            delay_until(now + chrono::Duration::seconds(90), now),
            Duration::from_secs(90)
        );
    }
}
