use std::str::FromStr;

use crate::db::models::{
    ChatSettings, ChatSettingsRow, ChatStatRow, ReminderRow, SettingsChange, StylizationInsert,
    StylizationRow, UserRow,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn init(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let in_memory = database_url.contains(":memory:");

        // Every in-memory connection is its own database, so keep exactly one alive.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(options).await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (\
                user_id INTEGER PRIMARY KEY,\
                username TEXT,\
                language TEXT,\
                joined_at TEXT NOT NULL,\
                captcha_passed INTEGER NOT NULL DEFAULT 0\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS stylizations (\
                id INTEGER PRIMARY KEY AUTOINCREMENT,\
                user_id INTEGER NOT NULL,\
                style TEXT,\
                preset TEXT,\
                text TEXT NOT NULL,\
                created_at TEXT NOT NULL\
            );",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_stylizations_user ON stylizations(user_id, created_at);",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS restricted_styles (\
                user_id INTEGER NOT NULL,\
                style TEXT NOT NULL,\
                PRIMARY KEY (user_id, style)\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS group_templates (\
                chat_id INTEGER PRIMARY KEY,\
                preset TEXT NOT NULL\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chat_settings (\
                chat_id INTEGER PRIMARY KEY,\
                captcha_enabled INTEGER NOT NULL DEFAULT 0,\
                captcha_mode TEXT NOT NULL DEFAULT 'button',\
                captcha_text TEXT,\
                welcome_message TEXT,\
                spam_filter INTEGER NOT NULL DEFAULT 0\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS reminders (\
                id INTEGER PRIMARY KEY AUTOINCREMENT,\
                user_id INTEGER NOT NULL,\
                chat_id INTEGER NOT NULL,\
                text TEXT NOT NULL,\
                fire_at TEXT NOT NULL,\
                delivered INTEGER NOT NULL DEFAULT 0\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chat_stats (\
                chat_id INTEGER NOT NULL,\
                user_id INTEGER NOT NULL,\
                display_name TEXT,\
                message_count INTEGER NOT NULL DEFAULT 0,\
                last_seen TEXT NOT NULL,\
                PRIMARY KEY (chat_id, user_id)\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS admin_log (\
                id INTEGER PRIMARY KEY AUTOINCREMENT,\
                admin_id INTEGER NOT NULL,\
                chat_id INTEGER NOT NULL,\
                action TEXT NOT NULL,\
                detail TEXT,\
                created_at TEXT NOT NULL\
            );",
        )
        .execute(&pool)
        .await?;

        info!("Database tables created successfully");

        Ok(Database { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Creates the user on first contact and refreshes the display name afterwards.
    pub async fn upsert_user(&self, user_id: i64, username: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (user_id, username, joined_at) VALUES (?, ?, ?) \
             ON CONFLICT(user_id) DO UPDATE SET username = excluded.username",
        )
        .bind(user_id)
        .bind(username)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_user(&self, user_id: i64) -> Result<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT user_id, username, language, joined_at, captcha_passed FROM users WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn user_language(&self, user_id: i64) -> Result<Option<String>> {
        let language = sqlx::query_scalar::<_, Option<String>>(
            "SELECT language FROM users WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(language.flatten())
    }

    pub async fn set_user_language(&self, user_id: i64, language: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (user_id, language, joined_at) VALUES (?, ?, ?) \
             ON CONFLICT(user_id) DO UPDATE SET language = excluded.language",
        )
        .bind(user_id)
        .bind(language)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_captcha_passed(&self, user_id: i64, username: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (user_id, username, joined_at, captcha_passed) VALUES (?, ?, ?, 1) \
             ON CONFLICT(user_id) DO UPDATE SET captcha_passed = 1",
        )
        .bind(user_id)
        .bind(username)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_recent_users(&self, limit: i64) -> Result<Vec<UserRow>> {
        let rows = sqlx::query_as::<_, UserRow>(
            "SELECT user_id, username, language, joined_at, captcha_passed \
             FROM users ORDER BY joined_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_user_ids(&self) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>("SELECT user_id FROM users ORDER BY user_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    pub async fn insert_stylization(&self, insert: StylizationInsert) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO stylizations (user_id, style, preset, text, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(insert.user_id)
        .bind(insert.style)
        .bind(insert.preset)
        .bind(insert.text)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn recent_stylizations(&self, user_id: i64, limit: i64) -> Result<Vec<StylizationRow>> {
        let rows = sqlx::query_as::<_, StylizationRow>(
            "SELECT id, user_id, style, preset, text, created_at FROM stylizations \
             WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn is_style_restricted(&self, user_id: i64, style: &str) -> Result<bool> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT 1 FROM restricted_styles WHERE user_id = ? AND style = ?",
        )
        .bind(user_id)
        .bind(style)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    pub async fn restricted_styles(&self, user_id: i64) -> Result<Vec<String>> {
        let styles = sqlx::query_scalar::<_, String>(
            "SELECT style FROM restricted_styles WHERE user_id = ? ORDER BY style",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(styles)
    }

    pub async fn restrict_style(&self, user_id: i64, style: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO restricted_styles (user_id, style) VALUES (?, ?)")
            .bind(user_id)
            .bind(style)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn unrestrict_style(&self, user_id: i64, style: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM restricted_styles WHERE user_id = ? AND style = ?")
            .bind(user_id)
            .bind(style)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_group_template(&self, chat_id: i64) -> Result<Option<String>> {
        let preset =
            sqlx::query_scalar::<_, String>("SELECT preset FROM group_templates WHERE chat_id = ?")
                .bind(chat_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(preset)
    }

    pub async fn set_group_template(&self, chat_id: i64, preset: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO group_templates (chat_id, preset) VALUES (?, ?) \
             ON CONFLICT(chat_id) DO UPDATE SET preset = excluded.preset",
        )
        .bind(chat_id)
        .bind(preset)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn clear_group_template(&self, chat_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM group_templates WHERE chat_id = ?")
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_chat_settings(&self, chat_id: i64) -> Result<ChatSettings> {
        let row = sqlx::query_as::<_, ChatSettingsRow>(
            "SELECT chat_id, captcha_enabled, captcha_mode, captcha_text, welcome_message, spam_filter \
             FROM chat_settings WHERE chat_id = ?",
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row
            .map(ChatSettings::from)
            .unwrap_or_else(|| ChatSettings::defaults(chat_id)))
    }

    pub async fn all_chat_settings(&self) -> Result<Vec<ChatSettings>> {
        let rows = sqlx::query_as::<_, ChatSettingsRow>(
            "SELECT chat_id, captcha_enabled, captcha_mode, captcha_text, welcome_message, spam_filter \
             FROM chat_settings ORDER BY chat_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ChatSettings::from).collect())
    }

    /// Applies the changes and the matching admin log rows in one transaction.
    pub async fn update_chat_settings(
        &self,
        admin_id: i64,
        chat_id: i64,
        changes: &[SettingsChange],
    ) -> Result<ChatSettings> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO chat_settings (chat_id) VALUES (?) ON CONFLICT(chat_id) DO NOTHING")
            .bind(chat_id)
            .execute(&mut *tx)
            .await?;

        for change in changes {
            let statement = format!(
                "UPDATE chat_settings SET {} = ? WHERE chat_id = ?",
                change.action()
            );
            let query = sqlx::query(&statement);
            let query = match change {
                SettingsChange::CaptchaEnabled(value) | SettingsChange::SpamFilter(value) => {
                    query.bind(*value)
                }
                SettingsChange::CaptchaMode(mode) => query.bind(mode.to_string()),
                SettingsChange::CaptchaText(text) | SettingsChange::WelcomeMessage(text) => {
                    query.bind(text.clone())
                }
            };
            query.bind(chat_id).execute(&mut *tx).await?;

            sqlx::query(
                "INSERT INTO admin_log (admin_id, chat_id, action, detail, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(admin_id)
            .bind(chat_id)
            .bind(change.action())
            .bind(change.detail())
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        }

        let row = sqlx::query_as::<_, ChatSettingsRow>(
            "SELECT chat_id, captcha_enabled, captcha_mode, captcha_text, welcome_message, spam_filter \
             FROM chat_settings WHERE chat_id = ?",
        )
        .bind(chat_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row.into())
    }

    #[cfg(test)]
    pub async fn admin_log_count(&self, chat_id: i64) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM admin_log WHERE chat_id = ?")
            .bind(chat_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn record_chat_activity(
        &self,
        chat_id: i64,
        user_id: i64,
        display_name: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO chat_stats (chat_id, user_id, display_name, message_count, last_seen) \
             VALUES (?, ?, ?, 1, ?) \
             ON CONFLICT(chat_id, user_id) DO UPDATE SET \
             message_count = chat_stats.message_count + 1, \
             display_name = excluded.display_name, \
             last_seen = excluded.last_seen",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(display_name)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn message_count(&self, chat_id: i64, user_id: i64) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT message_count FROM chat_stats WHERE chat_id = ? AND user_id = ?",
        )
        .bind(chat_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(count.unwrap_or(0))
    }

    pub async fn top_chat_users(&self, chat_id: i64, limit: i64) -> Result<Vec<ChatStatRow>> {
        let rows = sqlx::query_as::<_, ChatStatRow>(
            "SELECT chat_id, user_id, display_name, message_count, last_seen FROM chat_stats \
             WHERE chat_id = ? ORDER BY message_count DESC, last_seen DESC LIMIT ?",
        )
        .bind(chat_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn all_chat_stats(&self, limit: i64) -> Result<Vec<ChatStatRow>> {
        let rows = sqlx::query_as::<_, ChatStatRow>(
            "SELECT chat_id, user_id, display_name, message_count, last_seen FROM chat_stats \
             ORDER BY chat_id, message_count DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn insert_reminder(
        &self,
        user_id: i64,
        chat_id: i64,
        text: &str,
        fire_at: DateTime<Utc>,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO reminders (user_id, chat_id, text, fire_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(chat_id)
        .bind(text)
        .bind(fire_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn pending_reminders(&self) -> Result<Vec<ReminderRow>> {
        let rows = sqlx::query_as::<_, ReminderRow>(
            "SELECT id, user_id, chat_id, text, fire_at FROM reminders \
             WHERE delivered = 0 ORDER BY fire_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn mark_reminder_delivered(&self, reminder_id: i64) -> Result<()> {
        sqlx::query("UPDATE reminders SET delivered = 1 WHERE id = ?")
            .bind(reminder_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) async fn test_db() -> Database {
    Database::init("sqlite::memory:")
        .await
        .expect("in-memory database")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::captcha::CaptchaMode;

    #[tokio::test]
    async fn upsert_user_keeps_join_date_and_refreshes_name() {
        let db = test_db().await;
        db.upsert_user(1, "old").await.unwrap();
        let first = db.get_user(1).await.unwrap().unwrap();
        db.upsert_user(1, "new").await.unwrap();
        let second = db.get_user(1).await.unwrap().unwrap();
        assert_eq!(second.username.as_deref(), Some("new"));
        assert_eq!(first.joined_at, second.joined_at);
        assert!(!second.captcha_passed);
    }

    #[tokio::test]
    async fn language_preference_round_trips() {
        let db = test_db().await;
        assert_eq!(db.user_language(5).await.unwrap(), None);
        db.set_user_language(5, "en").await.unwrap();
        assert_eq!(db.user_language(5).await.unwrap().as_deref(), Some("en"));
    }

    #[tokio::test]
    async fn history_returns_latest_first_and_limited() {
        let db = test_db().await;
        for index in 0..7 {
            db.insert_stylization(StylizationInsert {
                user_id: 9,
                style: Some("bold".to_string()),
                preset: None,
                text: format!("t{index}"),
            })
            .await
            .unwrap();
        }
        let rows = db.recent_stylizations(9, 5).await.unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].text, "t6");
        assert_eq!(rows[0].format_name(), "bold");
    }

    #[tokio::test]
    async fn style_restrictions_toggle() {
        let db = test_db().await;
        assert!(!db.is_style_restricted(3, "zalgo").await.unwrap());
        db.restrict_style(3, "zalgo").await.unwrap();
        db.restrict_style(3, "zalgo").await.unwrap();
        assert!(db.is_style_restricted(3, "zalgo").await.unwrap());
        assert_eq!(db.restricted_styles(3).await.unwrap(), vec!["zalgo"]);
        assert!(db.unrestrict_style(3, "zalgo").await.unwrap());
        assert!(!db.unrestrict_style(3, "zalgo").await.unwrap());
    }

    #[tokio::test]
    async fn group_template_is_last_write_wins() {
        let db = test_db().await;
        db.set_group_template(-100, "meme").await.unwrap();
        db.set_group_template(-100, "quote").await.unwrap();
        assert_eq!(
            db.get_group_template(-100).await.unwrap().as_deref(),
            Some("quote")
        );
        db.clear_group_template(-100).await.unwrap();
        assert_eq!(db.get_group_template(-100).await.unwrap(), None);
    }

    #[tokio::test]
    async fn settings_default_then_update_with_admin_log() {
        let db = test_db().await;
        let defaults = db.get_chat_settings(-1).await.unwrap();
        assert_eq!(defaults, ChatSettings::defaults(-1));

        let updated = db
            .update_chat_settings(
                42,
                -1,
                &[
                    SettingsChange::CaptchaEnabled(true),
                    SettingsChange::CaptchaMode(CaptchaMode::Math),
                    SettingsChange::WelcomeMessage(Some("hi".to_string())),
                ],
            )
            .await
            .unwrap();
        assert!(updated.captcha_enabled);
        assert_eq!(updated.captcha_mode, CaptchaMode::Math);
        assert_eq!(updated.welcome_message.as_deref(), Some("hi"));
        assert!(!updated.spam_filter);
        assert_eq!(db.admin_log_count(-1).await.unwrap(), 3);
        assert_eq!(db.get_chat_settings(-1).await.unwrap(), updated);
    }

    #[tokio::test]
    async fn chat_activity_counts_per_chat_and_user() {
        let db = test_db().await;
        db.record_chat_activity(-1, 1, "a").await.unwrap();
        db.record_chat_activity(-1, 1, "a2").await.unwrap();
        db.record_chat_activity(-1, 2, "b").await.unwrap();
        db.record_chat_activity(-2, 1, "a").await.unwrap();
        assert_eq!(db.message_count(-1, 1).await.unwrap(), 2);
        assert_eq!(db.message_count(-2, 1).await.unwrap(), 1);
        let top = db.top_chat_users(-1, 10).await.unwrap();
        assert_eq!(top[0].user_id, 1);
        assert_eq!(top[0].display_name.as_deref(), Some("a2"));
        assert_eq!(top.len(), 2);
    }

    #[tokio::test]
    async fn delivered_reminders_are_not_pending() {
        let db = test_db().await;
        let id = db.insert_reminder(1, 1, "drink water", Utc::now()).await.unwrap();
        assert_eq!(db.pending_reminders().await.unwrap().len(), 1);
        db.mark_reminder_delivered(id).await.unwrap();
        assert!(db.pending_reminders().await.unwrap().is_empty());
    }
}
