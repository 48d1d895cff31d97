use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::captcha::CaptchaMode;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserRow {
    pub user_id: i64,
    pub username: Option<String>,
    pub language: Option<String>,
    pub joined_at: DateTime<Utc>,
    pub captcha_passed: bool,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StylizationRow {
    pub id: i64,
    pub user_id: i64,
    pub style: Option<String>,
    pub preset: Option<String>,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl StylizationRow {
    pub fn format_name(&self) -> &str {
        self.preset
            .as_deref()
            .or(self.style.as_deref())
            .unwrap_or("unknown")
    }
}

#[derive(Debug, Clone)]
pub struct StylizationInsert {
    pub user_id: i64,
    pub style: Option<String>,
    pub preset: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct ChatSettingsRow {
    pub chat_id: i64,
    pub captcha_enabled: bool,
    pub captcha_mode: String,
    pub captcha_text: Option<String>,
    pub welcome_message: Option<String>,
    pub spam_filter: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatSettings {
    pub chat_id: i64,
    pub captcha_enabled: bool,
    pub captcha_mode: CaptchaMode,
    pub captcha_text: Option<String>,
    pub welcome_message: Option<String>,
    pub spam_filter: bool,
}

impl ChatSettings {
    pub fn defaults(chat_id: i64) -> Self {
        ChatSettings {
            chat_id,
            captcha_enabled: false,
            captcha_mode: CaptchaMode::Button,
            captcha_text: None,
            welcome_message: None,
            spam_filter: false,
        }
    }
}

impl From<ChatSettingsRow> for ChatSettings {
    fn from(row: ChatSettingsRow) -> Self {
        ChatSettings {
            chat_id: row.chat_id,
            captcha_enabled: row.captcha_enabled,
            captcha_mode: row.captcha_mode.parse().unwrap_or(CaptchaMode::Button),
            captcha_text: row.captcha_text,
            welcome_message: row.welcome_message,
            spam_filter: row.spam_filter,
        }
    }
}

/// One field of the chat settings row. Applied as a single upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsChange {
    CaptchaEnabled(bool),
    CaptchaMode(CaptchaMode),
    CaptchaText(Option<String>),
    WelcomeMessage(Option<String>),
    SpamFilter(bool),
}

impl SettingsChange {
    pub fn action(&self) -> &'static str {
        match self {
            SettingsChange::CaptchaEnabled(_) => "captcha_enabled",
            SettingsChange::CaptchaMode(_) => "captcha_mode",
            SettingsChange::CaptchaText(_) => "captcha_text",
            SettingsChange::WelcomeMessage(_) => "welcome_message",
            SettingsChange::SpamFilter(_) => "spam_filter",
        }
    }

    pub fn detail(&self) -> String {
        match self {
            SettingsChange::CaptchaEnabled(value) | SettingsChange::SpamFilter(value) => {
                value.to_string()
            }
            SettingsChange::CaptchaMode(mode) => mode.to_string(),
            SettingsChange::CaptchaText(text) | SettingsChange::WelcomeMessage(text) => {
                text.clone().unwrap_or_default()
            }
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ChatStatRow {
    pub chat_id: i64,
    pub user_id: i64,
    pub display_name: Option<String>,
    pub message_count: i64,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ReminderRow {
    pub id: i64,
    pub user_id: i64,
    pub chat_id: i64,
    pub text: String,
    pub fire_at: DateTime<Utc>,
}
