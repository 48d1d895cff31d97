pub mod access;
pub mod admin;
pub mod ai;
pub mod callbacks;
pub mod captcha;
pub mod commands;
pub mod inline;
pub mod messages;
pub mod responses;

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, User};
use tracing::warn;

use crate::config::CONFIG;
use crate::i18n::{tr, Lang, Msg};
use crate::state::AppState;
use crate::styles::{StyleKind, StyleRegistry};
use crate::utils::telegram::user_id_i64;

const KEYBOARD_COLUMNS: usize = 3;

/// Stored preference first, then the client's language, then the default.
pub async fn user_lang(state: &AppState, user: Option<&User>) -> Lang {
    let Some(user) = user else {
        return Lang::resolve(None, None, &CONFIG.default_language);
    };
    let stored = match state.db.user_language(user_id_i64(user)).await {
        Ok(stored) => stored,
        Err(err) => {
            warn!("Failed to read language for {}: {}", user.id, err);
            None
        }
    };
    Lang::resolve(
        stored.as_deref(),
        user.language_code.as_deref(),
        &CONFIG.default_language,
    )
}

pub fn text_or_sample(text: &str, lang: Lang) -> String {
    let text = text.trim();
    if text.is_empty() {
        tr(lang, Msg::SampleText).to_string()
    } else {
        text.to_string()
    }
}

/// One button per registry entry; callback data is `<prefix>:<name>`.
pub fn format_keyboard(
    registry: &StyleRegistry,
    kind: StyleKind,
    prefix: &str,
    lang: Lang,
) -> InlineKeyboardMarkup {
    let buttons: Vec<InlineKeyboardButton> = registry
        .all(kind)
        .iter()
        .map(|style| {
            InlineKeyboardButton::callback(style.label(lang), format!("{prefix}:{}", style.name))
        })
        .collect();
    InlineKeyboardMarkup::new(
        buttons
            .chunks(KEYBOARD_COLUMNS)
            .map(|row| row.to_vec())
            .collect::<Vec<_>>(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_input_becomes_sample_text() {
        assert_eq!(text_or_sample("  ", Lang::En), "Sample text");
        assert_eq!(text_or_sample(" hi ", Lang::En), "hi");
    }

    #[test]
    fn keyboard_covers_every_preset() {
        let registry = StyleRegistry::builtin();
        let keyboard = format_keyboard(&registry, StyleKind::Preset, "gpreset", Lang::En);
        let total: usize = keyboard.inline_keyboard.iter().map(Vec::len).sum();
        assert_eq!(total, registry.all(StyleKind::Preset).len());
        assert!(keyboard
            .inline_keyboard
            .iter()
            .all(|row| row.len() <= KEYBOARD_COLUMNS));
    }
}
