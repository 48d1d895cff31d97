use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;
use url::Url;

use crate::config::CONFIG;
use crate::utils::http::get_http_client;
use crate::utils::language::source_language_for;
use crate::utils::timing::log_api_timing;

const SERVICE_TIMEOUT: Duration = Duration::from_secs(10);

async fn fetch_json(url: &str) -> Result<Value> {
    let response = get_http_client()
        .get(url)
        .timeout(SERVICE_TIMEOUT)
        .send()
        .await
        .with_context(|| format!("request to {url} failed"))?;
    if !response.status().is_success() {
        let status = response.status();
        warn!("Service {} responded with {}", url, status);
        return Err(anyhow!("{url} responded with {status}"));
    }
    Ok(response.json::<Value>().await?)
}

#[derive(Deserialize)]
struct ZenQuote {
    q: String,
    a: String,
}

/// Accepts the ZenQuotes array shape or a flat `{content, author}` object.
fn parse_quote(value: Value) -> Option<String> {
    if let Ok(mut quotes) = serde_json::from_value::<Vec<ZenQuote>>(value.clone()) {
        if quotes.is_empty() {
            return None;
        }
        let quote = quotes.swap_remove(0);
        return Some(format!("«{}» — {}", quote.q.trim(), quote.a.trim()));
    }

    let content = value.get("content").and_then(|v| v.as_str())?.trim();
    let author = value
        .get("author")
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown")
        .trim();
    if content.is_empty() {
        return None;
    }
    Some(format!("«{content}» — {author}"))
}

#[derive(Deserialize)]
struct Joke {
    setup: String,
    punchline: String,
}

fn parse_joke(value: Value) -> Option<String> {
    let joke = match value {
        Value::Array(mut items) if !items.is_empty() => {
            serde_json::from_value::<Joke>(items.swap_remove(0)).ok()?
        }
        other => serde_json::from_value::<Joke>(other).ok()?,
    };
    Some(format!("{}\n\n{}", joke.setup.trim(), joke.punchline.trim()))
}

fn parse_translation(value: &Value) -> Option<String> {
    let status = value
        .get("responseStatus")
        .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .unwrap_or(200);
    if status != 200 {
        return None;
    }
    value
        .pointer("/responseData/translatedText")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn translate_url(endpoint: &str, text: &str, source: &str, target: &str) -> Result<Url> {
    let langpair = format!("{source}|{target}");
    Url::parse_with_params(endpoint, &[("q", text), ("langpair", langpair.as_str())])
        .with_context(|| format!("invalid translate endpoint {endpoint}"))
}

pub async fn random_quote() -> Result<String> {
    log_api_timing("quotes", "-", "random_quote", || async {
        let value = fetch_json(&CONFIG.quotes_endpoint).await?;
        parse_quote(value).ok_or_else(|| anyhow!("quote response had no quote"))
    })
    .await
}

pub async fn random_joke() -> Result<String> {
    log_api_timing("jokes", "-", "random_joke", || async {
        let value = fetch_json(&CONFIG.jokes_endpoint).await?;
        parse_joke(value).ok_or_else(|| anyhow!("joke response had no joke"))
    })
    .await
}

/// Translates `text` into the two-letter language `target`.
pub async fn translate(text: &str, target: &str) -> Result<String> {
    let target = target.trim().to_lowercase();
    let source = source_language_for(text, &target, &CONFIG.default_language);
    let url = translate_url(&CONFIG.translate_endpoint, text, &source, &target)?;
    log_api_timing("translate", "-", &format!("{source}->{target}"), || async {
        let value = fetch_json(url.as_str()).await?;
        parse_translation(&value).ok_or_else(|| anyhow!("translation response was empty"))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quote_accepts_both_shapes() {
        let zen = json!([{"q": "Stay hungry.", "a": "Steve Jobs", "h": "<b>..</b>"}]);
        assert_eq!(
            parse_quote(zen).as_deref(),
            Some("«Stay hungry.» — Steve Jobs")
        );
        let flat = json!({"content": "Less is more.", "author": "Mies"});
        assert_eq!(parse_quote(flat).as_deref(), Some("«Less is more.» — Mies"));
        assert_eq!(parse_quote(json!([])), None);
    }

    #[test]
    fn joke_joins_setup_and_punchline() {
        let joke = json!({"id": 1, "type": "general", "setup": "Why?", "punchline": "Because."});
        assert_eq!(parse_joke(joke).as_deref(), Some("Why?\n\nBecause."));
        let wrapped = json!([{"setup": "A", "punchline": "B"}]);
        assert_eq!(parse_joke(wrapped).as_deref(), Some("A\n\nB"));
        assert_eq!(parse_joke(json!({"oops": true})), None);
    }

    #[test]
    fn translation_requires_ok_status() {
        let ok = json!({"responseData": {"translatedText": "Hello"}, "responseStatus": 200});
        assert_eq!(parse_translation(&ok).as_deref(), Some("Hello"));
        let failed = json!({"responseData": {"translatedText": "INVALID"}, "responseStatus": "403"});
        assert_eq!(parse_translation(&failed), None);
    }

    #[test]
    fn translate_url_encodes_query() {
        let url = translate_url("https://api.example.test/get", "привет мир", "ru", "en").unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(pairs[0], ("q".to_string(), "привет мир".to_string()));
        assert_eq!(pairs[1], ("langpair".to_string(), "ru|en".to_string()));
    }
}
