use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::{ChatAction, User};
use tokio::task::JoinHandle;
use tracing::warn;

const TYPING_REFRESH_INTERVAL: Duration = Duration::from_secs(4);

/// Shows "typing…" in a chat until dropped.
pub struct TypingIndicator {
    task_handle: Option<JoinHandle<()>>,
}

impl TypingIndicator {
    pub fn start(bot: Bot, chat_id: ChatId) -> Self {
        let task_handle = tokio::spawn(async move {
            loop {
                if let Err(err) = bot.send_chat_action(chat_id, ChatAction::Typing).await {
                    warn!("send_chat_action failed: {err}");
                }
                tokio::time::sleep(TYPING_REFRESH_INTERVAL).await;
            }
        });
        TypingIndicator {
            task_handle: Some(task_handle),
        }
    }
}

impl Drop for TypingIndicator {
    fn drop(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

pub fn user_id_i64(user: &User) -> i64 {
    i64::try_from(user.id.0).unwrap_or_default()
}

/// `@username` when set, otherwise the full name.
pub fn display_name(user: &User) -> String {
    match user.username.as_deref() {
        Some(username) if !username.is_empty() => format!("@{username}"),
        _ => user.full_name(),
    }
}

/// Name stored in the users table; "Unknown" when the account has no username.
pub fn stored_username(user: &User) -> String {
    user.username
        .clone()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "Unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(username: Option<&str>) -> User {
        serde_json::from_value(serde_json::json!({
            "id": 42,
            "is_bot": false,
            "first_name": "Ann",
            "last_name": "Lee",
            "username": username,
        }))
        .unwrap()
    }

    #[test]
    fn display_name_prefers_username() {
        assert_eq!(display_name(&user(Some("ann"))), "@ann");
        assert_eq!(display_name(&user(None)), "Ann Lee");
        assert_eq!(stored_username(&user(None)), "Unknown");
        assert_eq!(user_id_i64(&user(None)), 42);
    }
}
