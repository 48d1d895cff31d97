use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::CONFIG;
use crate::i18n::Lang;
use crate::styles::transform::escape_html;
use crate::utils::http::get_http_client;
use crate::utils::timing::log_api_timing;

/// Refresh the access token this long before the server-side expiry.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum GigaChatError {
    #[error("GigaChat credentials are not configured")]
    NotConfigured,
    #[error("GigaChat request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("GigaChat returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("GigaChat token response had no access token")]
    MissingToken,
    #[error("GigaChat completion was empty")]
    EmptyCompletion,
    #[error("could not encode token request: {0}")]
    Form(#[from] serde_urlencoded::ser::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tone {
    Sarcastic,
    Friendly,
    Formal,
    Neutral,
}

impl Tone {
    pub const ALL: [Tone; 4] = [Tone::Sarcastic, Tone::Friendly, Tone::Formal, Tone::Neutral];

    pub fn as_str(self) -> &'static str {
        match self {
            Tone::Sarcastic => "sarcastic",
            Tone::Friendly => "friendly",
            Tone::Formal => "formal",
            Tone::Neutral => "neutral",
        }
    }

    pub fn parse(value: &str) -> Option<Tone> {
        Tone::ALL
            .into_iter()
            .find(|tone| tone.as_str() == value.trim().to_lowercase())
    }

    pub fn label(self, lang: Lang) -> &'static str {
        match (self, lang) {
            (Tone::Sarcastic, Lang::Ru) => "Саркастичный",
            (Tone::Friendly, Lang::Ru) => "Дружелюбный",
            (Tone::Formal, Lang::Ru) => "Формальный",
            (Tone::Neutral, Lang::Ru) => "Нейтральный",
            (Tone::Sarcastic, Lang::En) => "Sarcastic",
            (Tone::Friendly, Lang::En) => "Friendly",
            (Tone::Formal, Lang::En) => "Formal",
            (Tone::Neutral, Lang::En) => "Neutral",
        }
    }

    fn instruction(self) -> &'static str {
        match self {
            Tone::Sarcastic => "Отвечай в саркастичном и остроумном тоне",
            Tone::Friendly => "Отвечай в тёплом и дружелюбном тоне",
            Tone::Formal => "Отвечай в профессиональном и формальном тоне",
            Tone::Neutral => "Отвечай в нейтральном и прямолинейном тоне",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiCommand {
    Gigachadify,
    MakePost,
    Rewrite,
    SmartReply(Tone),
}

impl AiCommand {
    pub fn name(self) -> &'static str {
        match self {
            AiCommand::Gigachadify => "gigachadify",
            AiCommand::MakePost => "make_post",
            AiCommand::Rewrite => "rewrite",
            AiCommand::SmartReply(_) => "smartreply",
        }
    }

    pub fn prompt(self, text: &str) -> String {
        match self {
            AiCommand::Gigachadify => format!(
                "Сделай этот текст максимально уверенным и мощным, как у ГигаЧада: {text}"
            ),
            AiCommand::MakePost => format!("Оформи этот текст как стильный пост для соцсетей: {text}"),
            AiCommand::Rewrite => format!("Перепиши этот текст более элегантно и стильно: {text}"),
            AiCommand::SmartReply(tone) => {
                format!("{} на это сообщение: {text}", tone.instruction())
            }
        }
    }

    /// Canned HTML reply used when the completion service is unavailable.
    pub fn fallback(self, lang: Lang, text: &str) -> String {
        let safe = escape_html(text);
        match (self, lang) {
            (AiCommand::Gigachadify, Lang::Ru) => format!(
                "💪 <b>МАКСИМАЛЬНЫЙ {}! ПОЛНАЯ МОЩЬ!</b> 💪",
                escape_html(&text.to_uppercase())
            ),
            (AiCommand::Gigachadify, Lang::En) => format!(
                "💪 <b>MAXIMUM {}! FULL POWER!</b> 💪",
                escape_html(&text.to_uppercase())
            ),
            (AiCommand::MakePost, Lang::Ru) => {
                format!("📜 <b>Эпичный пост:</b> {safe} ✨ #TextStylerPro")
            }
            (AiCommand::MakePost, Lang::En) => {
                format!("📜 <b>Epic post:</b> {safe} ✨ #TextStylerPro")
            }
            (AiCommand::Rewrite, Lang::Ru) => {
                format!("🖋 Переписано: {} в стильном виде.", escape_html(&capitalize(text)))
            }
            (AiCommand::Rewrite, Lang::En) => {
                format!("🖋 Rewritten: {} in style.", escape_html(&capitalize(text)))
            }
            (AiCommand::SmartReply(tone), Lang::Ru) => match tone {
                Tone::Sarcastic => format!("😏 Ох, {safe}? Серьёзно? Это... впечатляет. 😏"),
                Tone::Friendly => format!("😊 Эй, {safe} звучит круто! Продолжай в том же духе! 😊"),
                Tone::Formal => {
                    format!("Уважаемый пользователь, ваше сообщение «{safe}» принято. Спасибо.")
                }
                Tone::Neutral => format!("Спасибо за сообщение: {safe}."),
            },
            (AiCommand::SmartReply(tone), Lang::En) => match tone {
                Tone::Sarcastic => format!("😏 Oh, {safe}? Really? How... impressive. 😏"),
                Tone::Friendly => format!("😊 Hey, {safe} sounds great! Keep it up! 😊"),
                Tone::Formal => {
                    format!("Dear user, your message \"{safe}\" has been received. Thank you.")
                }
                Tone::Neutral => format!("Thanks for the message: {safe}."),
            },
        }
    }
}

fn capitalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let mut chars = lowered.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Runs `operation` up to `attempts` times, sleeping `delay` between failures.
pub async fn with_retry<T, E, F, Fut>(attempts: usize, delay: Duration, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts => {
                warn!("Attempt {}/{} failed: {}", attempt, attempts, err);
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) > now
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    /// Milliseconds since the epoch.
    expires_at: Option<i64>,
}

fn token_expiry(expires_at: Option<i64>, now: DateTime<Utc>) -> DateTime<Utc> {
    expires_at
        .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
        .unwrap_or_else(|| now + chrono::Duration::minutes(30))
}

fn extract_completion(value: &Value) -> Option<String> {
    value
        .pointer("/choices/0/message/content")
        .and_then(|v| v.as_str())
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
}

/// Chat completion client with a cached OAuth access token.
#[derive(Default)]
pub struct GigaChatClient {
    token: Mutex<Option<CachedToken>>,
}

impl GigaChatClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn retry_delay() -> Duration {
        Duration::from_millis(CONFIG.ai_retry_delay_ms)
    }

    async fn request_token() -> Result<CachedToken, GigaChatError> {
        let body = serde_urlencoded::to_string([("scope", CONFIG.gigachat_scope.as_str())])?;
        let response = get_http_client()
            .post(&CONFIG.gigachat_oauth_url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("Accept", "application/json")
            .header("RqUID", Uuid::new_v4().to_string())
            .header("Authorization", format!("Basic {}", CONFIG.gigachat_auth_key))
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GigaChatError::Status {
                status,
                body: body.chars().take(500).collect(),
            });
        }

        let parsed = response.json::<TokenResponse>().await?;
        let access_token = parsed
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or(GigaChatError::MissingToken)?;
        Ok(CachedToken {
            access_token,
            expires_at: token_expiry(parsed.expires_at, Utc::now()),
        })
    }

    async fn access_token(&self) -> Result<String, GigaChatError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|token| token.is_fresh(Utc::now())) {
            return Ok(token.access_token.clone());
        }

        debug!("Requesting new GigaChat access token");
        let token = with_retry(CONFIG.ai_retry_attempts, Self::retry_delay(), || {
            Self::request_token()
        })
        .await?;
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    async fn request_completion(token: &str, prompt: &str) -> Result<String, GigaChatError> {
        let payload = json!({
            "model": CONFIG.gigachat_model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": CONFIG.gigachat_max_tokens,
        });

        let response = get_http_client()
            .post(&CONFIG.gigachat_api_url)
            .bearer_auth(token)
            .timeout(Duration::from_secs(60))
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GigaChatError::Status {
                status,
                body: body.chars().take(500).collect(),
            });
        }

        let value = response.json::<Value>().await?;
        extract_completion(&value).ok_or(GigaChatError::EmptyCompletion)
    }

    pub async fn complete(&self, command: AiCommand, text: &str) -> Result<String, GigaChatError> {
        if !CONFIG.gigachat_configured() {
            return Err(GigaChatError::NotConfigured);
        }

        let prompt = command.prompt(text);
        log_api_timing("gigachat", &CONFIG.gigachat_model, command.name(), || async {
            let token = self.access_token().await?;
            with_retry(CONFIG.ai_retry_attempts, Self::retry_delay(), || {
                Self::request_completion(&token, &prompt)
            })
            .await
        })
        .await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiReply {
    pub text: String,
    pub fell_back: bool,
}

/// Runs an AI command, substituting the canned reply on any failure. The
/// completion text is escaped for HTML parse mode.
pub async fn run_ai_command(
    client: &GigaChatClient,
    command: AiCommand,
    text: &str,
    lang: Lang,
) -> AiReply {
    match client.complete(command, text).await {
        Ok(reply) => AiReply {
            text: escape_html(&reply),
            fell_back: false,
        },
        Err(err) => {
            warn!("GigaChat {} failed: {}", command.name(), err);
            AiReply {
                text: command.fallback(lang, text),
                fell_back: true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn retry_stops_after_first_success() {
        let calls = AtomicUsize::new(0);
        let result: Result<u32, String> = with_retry(3, Duration::from_millis(1), || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err("boom".to_string())
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_gives_up_after_all_attempts() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), String> = with_retry(3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("down".to_string()) }
        })
        .await;
        assert_eq!(result, Err("down".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn tones_parse_from_callback_names() {
        for tone in Tone::ALL {
            assert_eq!(Tone::parse(tone.as_str()), Some(tone));
        }
        assert_eq!(Tone::parse("angry"), None);
    }

    #[test]
    fn smartreply_prompt_carries_tone_instruction() {
        let prompt = AiCommand::SmartReply(Tone::Formal).prompt("привет");
        assert!(prompt.starts_with("Отвечай в профессиональном"));
        assert!(prompt.ends_with("привет"));
    }

    #[test]
    fn fallbacks_escape_user_text() {
        let reply = AiCommand::MakePost.fallback(Lang::En, "<b>x</b>");
        assert!(reply.contains("&lt;b&gt;x&lt;/b&gt;"));
        let loud = AiCommand::Gigachadify.fallback(Lang::Ru, "сила");
        assert!(loud.contains("СИЛА"));
        let rewritten = AiCommand::Rewrite.fallback(Lang::En, "hELLO");
        assert!(rewritten.contains("Hello"));
    }

    #[test]
    fn completion_content_is_read_from_first_choice() {
        let value = json!({"choices": [{"message": {"content": "  hi  "}}]});
        assert_eq!(extract_completion(&value).as_deref(), Some("hi"));
        assert_eq!(extract_completion(&json!({"choices": []})), None);
    }

    #[test]
    fn cached_token_refreshes_before_expiry() {
        let now = Utc::now();
        let token = CachedToken {
            access_token: "t".to_string(),
            expires_at: now + chrono::Duration::seconds(30),
        };
        assert!(!token.is_fresh(now));
        let token = CachedToken {
            access_token: "t".to_string(),
            expires_at: now + chrono::Duration::minutes(10),
        };
        assert!(token.is_fresh(now));
    }

    #[test]
    fn token_expiry_reads_epoch_millis() {
        let now = Utc::now();
        let expiry = token_expiry(Some(1_700_000_000_000), now);
        assert_eq!(expiry.timestamp(), 1_700_000_000);
        assert!(token_expiry(None, now) > now);
    }
}
