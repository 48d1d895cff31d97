use std::collections::HashMap;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use teloxide::prelude::*;
use teloxide::types::ReplyParameters;
use tracing::warn;

use crate::config::CONFIG;
use crate::i18n::{tr, Lang, Msg};
use crate::utils::telegram::user_id_i64;

static RATE_LIMITS: Lazy<Mutex<HashMap<i64, Instant>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn rate_limited_at(
    limits: &mut HashMap<i64, Instant>,
    user_id: i64,
    now: Instant,
    window: Duration,
) -> bool {
    if let Some(last) = limits.get(&user_id) {
        if now.duration_since(*last) < window {
            return true;
        }
    }
    limits.insert(user_id, now);
    false
}

/// Throttles commands that call external services.
pub fn is_rate_limited(user_id: i64) -> bool {
    let window = Duration::from_secs(CONFIG.rate_limit_seconds);
    rate_limited_at(&mut RATE_LIMITS.lock(), user_id, Instant::now(), window)
}

pub async fn check_rate_limit(bot: &Bot, message: &Message, lang: Lang) -> bool {
    let Some(user) = message.from.as_ref() else {
        return false;
    };
    if !is_rate_limited(user_id_i64(user)) {
        return true;
    }
    let _ = bot
        .send_message(message.chat.id, tr(lang, Msg::RateLimited))
        .reply_parameters(ReplyParameters::new(message.id))
        .await;
    false
}

pub fn is_admin_user(user_id: i64) -> bool {
    CONFIG.is_admin(user_id)
}

/// Replies with the denial notice when the sender is not a configured admin.
pub async fn check_admin_access(bot: &Bot, message: &Message, lang: Lang, command: &str) -> bool {
    let user_id = message.from.as_ref().map(user_id_i64).unwrap_or_default();
    if is_admin_user(user_id) {
        return true;
    }

    warn!(
        "Denied /{} for user {} in chat {}",
        command, user_id, message.chat.id.0
    );
    let _ = bot
        .send_message(message.chat.id, tr(lang, Msg::AccessDenied))
        .reply_parameters(ReplyParameters::new(message.id))
        .await;
    false
}
