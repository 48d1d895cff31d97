use once_cell::sync::Lazy;
use regex::Regex;
use whatlang::{detect, Lang as Detected, Script};

const MIN_ALPHA_CHARS: usize = 2;
const LATIN_CONFIDENCE_THRESHOLD: f64 = 0.68;
const NON_LATIN_CONFIDENCE_THRESHOLD: f64 = 0.5;

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://\S+|www\.\S+").expect("valid url regex"));
static MENTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(^|\s)@[a-z0-9_]{3,}").expect("valid mention regex"));
static WHITESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

fn normalize_text_for_detection(text: &str) -> String {
    let without_urls = URL_RE.replace_all(text, " ");
    let without_mentions = MENTION_RE.replace_all(&without_urls, " ");
    WHITESPACE_RE
        .replace_all(&without_mentions, " ")
        .trim()
        .to_string()
}

fn two_letter_code(lang: Detected) -> Option<&'static str> {
    let code = match lang {
        Detected::Eng => "en",
        Detected::Rus => "ru",
        Detected::Ukr => "uk",
        Detected::Bel => "be",
        Detected::Deu => "de",
        Detected::Fra => "fr",
        Detected::Spa => "es",
        Detected::Por => "pt",
        Detected::Ita => "it",
        Detected::Nld => "nl",
        Detected::Pol => "pl",
        Detected::Tur => "tr",
        Detected::Cmn => "zh",
        Detected::Jpn => "ja",
        Detected::Kor => "ko",
        Detected::Ara => "ar",
        Detected::Heb => "he",
        Detected::Hin => "hi",
        _ => return None,
    };
    Some(code)
}

/// ISO 639-1 code of the text's language when detection is confident enough.
pub fn detect_language_code(text: &str) -> Option<&'static str> {
    let normalized = normalize_text_for_detection(text);
    if normalized.chars().filter(|ch| ch.is_alphabetic()).count() < MIN_ALPHA_CHARS {
        return None;
    }

    let info = detect(&normalized)?;
    let threshold = match info.script() {
        Script::Latin => LATIN_CONFIDENCE_THRESHOLD,
        _ => NON_LATIN_CONFIDENCE_THRESHOLD,
    };
    if !info.is_reliable() && info.confidence() < threshold {
        return None;
    }
    two_letter_code(info.lang())
}

/// Source language for a translation request, never equal to the target.
pub fn source_language_for(text: &str, target: &str, fallback: &str) -> String {
    let source = detect_language_code(text).unwrap_or(fallback);
    if source.eq_ignore_ascii_case(target) {
        // The translation API rejects identical language pairs.
        return if target.eq_ignore_ascii_case("en") {
            "ru".to_string()
        } else {
            "en".to_string()
        };
    }
    source.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_russian_and_english() {
        assert_eq!(
            detect_language_code("Привет, как у тебя сегодня дела на работе?"),
            Some("ru")
        );
        assert_eq!(
            detect_language_code("The weather is lovely today and we are going outside"),
            Some("en")
        );
    }

    #[test]
    fn short_or_symbolic_text_is_undetected() {
        assert_eq!(detect_language_code("👍 12345"), None);
        assert_eq!(detect_language_code("https://example.com"), None);
    }

    #[test]
    fn source_never_matches_target() {
        assert_eq!(source_language_for("12345", "ru", "ru"), "en");
        assert_eq!(source_language_for("12345", "en", "en"), "ru");
        assert_eq!(source_language_for("12345", "de", "ru"), "ru");
    }
}
