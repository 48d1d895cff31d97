use std::env;
use std::net::SocketAddr;

use anyhow::Result;
use base64::{engine::general_purpose, Engine as _};
use once_cell::sync::Lazy;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub log_level: String,
    pub database_url: String,
    pub admin_ids: Vec<i64>,
    pub default_language: String,
    pub gigachat_auth_key: String,
    pub gigachat_oauth_url: String,
    pub gigachat_api_url: String,
    pub gigachat_scope: String,
    pub gigachat_model: String,
    pub gigachat_max_tokens: u32,
    pub ai_retry_attempts: usize,
    pub ai_retry_delay_ms: u64,
    pub classifier_endpoint: String,
    pub classifier_api_key: String,
    pub spam_label: String,
    pub spam_threshold: f32,
    pub captcha_fail_delay_seconds: u64,
    pub quotes_endpoint: String,
    pub jokes_endpoint: String,
    pub translate_endpoint: String,
    pub broadcast_delay_ms: u64,
    pub dashboard_enabled: bool,
    pub dashboard_addr: SocketAddr,
    pub dashboard_token: String,
    pub telegram_max_length: usize,
    pub rate_limit_seconds: u64,
}

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|value| value.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_f32(name: &str, default: f32) -> f32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<f32>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

/// Values that do not fit in `u32` fall back to `default`.
fn env_u32(name: &str, default: u32) -> u32 {
    u32::try_from(env_u64(name, u64::from(default))).unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn parse_id_list(raw: &str) -> Vec<i64> {
    raw.split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match entry.parse::<i64>() {
            Ok(id) => Some(id),
            Err(_) => {
                warn!("Ignoring invalid admin id '{}'", entry);
                None
            }
        })
        .collect()
}

/// Accepts either a ready-made Basic key or a client id/secret pair.
fn resolve_gigachat_auth_key() -> String {
    let key = env_string("GIGACHAT_AUTH_KEY", "");
    if !key.trim().is_empty() {
        return key.trim().to_string();
    }

    let client_id = env_string("GIGACHAT_CLIENT_ID", "");
    let client_secret = env_string("GIGACHAT_CLIENT_SECRET", "");
    if client_id.trim().is_empty() || client_secret.trim().is_empty() {
        return String::new();
    }
    general_purpose::STANDARD.encode(format!("{}:{}", client_id.trim(), client_secret.trim()))
}

fn parse_dashboard_addr(value: &str) -> SocketAddr {
    value.parse::<SocketAddr>().unwrap_or_else(|_| {
        warn!(
            "Invalid DASHBOARD_ADDR '{}'; falling back to 127.0.0.1:8080",
            value
        );
        SocketAddr::from(([127, 0, 0, 1], 8080))
    })
}

impl Config {
    pub fn load() -> Result<Self> {
        let bot_token = env::var("BOT_TOKEN").unwrap_or_default();
        if bot_token.trim().is_empty() {
            return Err(anyhow::anyhow!("BOT_TOKEN is required"));
        }

        let admin_ids = parse_id_list(&env_string("ADMIN_IDS", ""));
        if admin_ids.is_empty() {
            warn!("ADMIN_IDS is empty; administrative commands are disabled");
        }

        Ok(Config {
            bot_token,
            log_level: env_string("LOG_LEVEL", "info").to_lowercase(),
            database_url: env_string("DATABASE_URL", "sqlite://textstyler.db"),
            admin_ids,
            default_language: env_string("DEFAULT_LANGUAGE", "ru").to_lowercase(),
            gigachat_auth_key: resolve_gigachat_auth_key(),
            gigachat_oauth_url: env_string(
                "GIGACHAT_OAUTH_URL",
                "https://ngw.devices.sberbank.ru:9443/api/v2/oauth",
            ),
            gigachat_api_url: env_string(
                "GIGACHAT_API_URL",
                "https://gigachat.devices.sberbank.ru/api/v1/chat/completions",
            ),
            gigachat_scope: env_string("GIGACHAT_SCOPE", "GIGACHAT_API_PERS"),
            gigachat_model: env_string("GIGACHAT_MODEL", "GigaChat"),
            gigachat_max_tokens: env_u32("GIGACHAT_MAX_TOKENS", 200),
            ai_retry_attempts: env_usize("AI_RETRY_ATTEMPTS", 3).max(1),
            ai_retry_delay_ms: env_u64("AI_RETRY_DELAY_MS", 2000),
            classifier_endpoint: env_string("CLASSIFIER_ENDPOINT", ""),
            classifier_api_key: env_string("CLASSIFIER_API_KEY", ""),
            spam_label: env_string("SPAM_LABEL", "NEGATIVE"),
            spam_threshold: env_f32("SPAM_THRESHOLD", 0.9),
            captcha_fail_delay_seconds: env_u64("CAPTCHA_FAIL_DELAY_SECONDS", 300),
            quotes_endpoint: env_string("QUOTES_ENDPOINT", "https://zenquotes.io/api/random"),
            jokes_endpoint: env_string(
                "JOKES_ENDPOINT",
                "https://official-joke-api.appspot.com/random_joke",
            ),
            translate_endpoint: env_string(
                "TRANSLATE_ENDPOINT",
                "https://api.mymemory.translated.net/get",
            ),
            broadcast_delay_ms: env_u64("BROADCAST_DELAY_MS", 50),
            dashboard_enabled: env_bool("DASHBOARD_ENABLED", true),
            dashboard_addr: parse_dashboard_addr(&env_string("DASHBOARD_ADDR", "127.0.0.1:8080")),
            dashboard_token: env_string("DASHBOARD_TOKEN", ""),
            telegram_max_length: env_usize("TELEGRAM_MAX_LENGTH", 4000),
            rate_limit_seconds: env_u64("RATE_LIMIT_SECONDS", 5),
        })
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }

    pub fn gigachat_configured(&self) -> bool {
        !self.gigachat_auth_key.trim().is_empty()
    }

    pub fn classifier_configured(&self) -> bool {
        !self.classifier_endpoint.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_admin_ids_and_skips_garbage() {
        assert_eq!(parse_id_list("1, 2,,abc, -100"), vec![1, 2, -100]);
        assert!(parse_id_list("").is_empty());
    }

    #[test]
    fn oversized_u32_values_fall_back_to_default() {
        env::set_var("TEXTSTYLER_TEST_MAX_TOKENS_OVERFLOW", "4294967296");
        assert_eq!(env_u32("TEXTSTYLER_TEST_MAX_TOKENS_OVERFLOW", 200), 200);
        env::set_var("TEXTSTYLER_TEST_MAX_TOKENS_OK", "512");
        assert_eq!(env_u32("TEXTSTYLER_TEST_MAX_TOKENS_OK", 200), 512);
        assert_eq!(env_u32("TEXTSTYLER_TEST_MAX_TOKENS_UNSET", 200), 200);
    }

    #[test]
    fn bad_dashboard_addr_falls_back_to_loopback() {
        let addr = parse_dashboard_addr("not-an-addr");
        assert_eq!(addr, SocketAddr::from(([127, 0, 0, 1], 8080)));
    }
}
