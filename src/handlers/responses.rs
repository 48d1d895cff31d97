use std::time::Duration;

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{
    InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId, ParseMode, ReplyParameters,
};
use teloxide::RequestError;
use tracing::{error, warn};

use crate::config::CONFIG;
use crate::db::models::StylizationInsert;
use crate::export::{plain_text_for_export, render_pdf, PdfError};
use crate::i18n::{tr, Lang, Msg};
use crate::state::AppState;
use crate::styles::StyleKind;

const TELEGRAM_RETRY_ATTEMPTS: usize = 3;
pub const EXPORT_CALLBACK: &str = "export:pdf";
pub const EDIT_CALLBACK_PREFIX: &str = "edit:";

pub fn telegram_retryable_error(err: &RequestError) -> bool {
    matches!(
        err,
        RequestError::Network(_) | RequestError::RetryAfter(_) | RequestError::Io(_)
    )
}

enum HtmlToken<'a> {
    Tag(&'a str),
    /// One visible character, possibly written as an entity.
    Visible(&'a str),
}

fn entity_len(rest: &str) -> Option<usize> {
    let end = rest.char_indices().take(12).find(|(_, ch)| *ch == ';')?.0;
    let body = &rest[1..end];
    let valid = !body.is_empty() && body.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '#');
    valid.then_some(end + 1)
}

fn html_tokens(text: &str) -> impl Iterator<Item = HtmlToken<'_>> {
    let mut rest = text;
    std::iter::from_fn(move || {
        let ch = rest.chars().next()?;
        let len = match ch {
            '<' => rest.find('>').map(|end| end + 1),
            '&' => entity_len(rest),
            _ => None,
        };
        let (token, tail) = match (ch, len) {
            ('<', Some(len)) => (HtmlToken::Tag(&rest[..len]), &rest[len..]),
            (_, Some(len)) => (HtmlToken::Visible(&rest[..len]), &rest[len..]),
            (_, None) => {
                let len = ch.len_utf8();
                (HtmlToken::Visible(&rest[..len]), &rest[len..])
            }
        };
        rest = tail;
        Some(token)
    })
}

fn tag_name(tag: &str) -> &str {
    let inner = tag.trim_start_matches('<').trim_start_matches('/');
    let end = inner
        .find(|ch: char| ch.is_whitespace() || ch == '>' || ch == '/')
        .unwrap_or(inner.len());
    &inner[..end]
}

/// Cuts HTML `text` to at most `limit` visible characters, marking the cut.
/// Tags and entities are never split and tags left open are closed.
pub fn truncate_for_telegram(text: &str, limit: usize) -> String {
    let visible = html_tokens(text)
        .filter(|token| matches!(token, HtmlToken::Visible(_)))
        .count();
    if visible <= limit {
        return text.to_string();
    }

    let budget = limit.saturating_sub(1);
    let mut kept = 0;
    let mut open: Vec<&str> = Vec::new();
    let mut out = String::with_capacity(text.len());
    for token in html_tokens(text) {
        match token {
            HtmlToken::Visible(piece) => {
                if kept == budget {
                    break;
                }
                out.push_str(piece);
                kept += 1;
            }
            HtmlToken::Tag(tag) if tag.starts_with("</") => {
                let name = tag_name(tag);
                if let Some(pos) = open.iter().rposition(|candidate| candidate.eq_ignore_ascii_case(name)) {
                    open.remove(pos);
                    out.push_str(tag);
                }
            }
            HtmlToken::Tag(tag) => {
                if !tag.ends_with("/>") {
                    open.push(tag_name(tag));
                }
                out.push_str(tag);
            }
        }
    }

    out.push('…');
    for name in open.iter().rev() {
        out.push_str(&format!("</{name}>"));
    }
    out
}

pub async fn send_html(
    bot: &Bot,
    chat_id: ChatId,
    text: &str,
    reply_to: Option<MessageId>,
    markup: Option<InlineKeyboardMarkup>,
) -> Result<Message> {
    let mut delay = Duration::from_secs_f32(1.5);
    for attempt in 0..TELEGRAM_RETRY_ATTEMPTS {
        let mut request = bot.send_message(chat_id, text.to_string()).parse_mode(ParseMode::Html);
        if let Some(reply_to) = reply_to {
            request = request.reply_parameters(ReplyParameters::new(reply_to).allow_sending_without_reply());
        }
        if let Some(markup) = markup.clone() {
            request = request.reply_markup(markup);
        }
        match request.await {
            Ok(message) => return Ok(message),
            Err(err) => {
                if !telegram_retryable_error(&err) || attempt + 1 == TELEGRAM_RETRY_ATTEMPTS {
                    return Err(err.into());
                }
                warn!("send_message attempt {} failed: {err}", attempt + 1);
                if let RequestError::RetryAfter(wait) = err {
                    tokio::time::sleep(wait.duration()).await;
                } else {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    unreachable!("send_message retry loop exhausted")
}

pub async fn reply_text(bot: &Bot, message: &Message, text: impl Into<String>) -> Result<()> {
    bot.send_message(message.chat.id, text.into())
        .reply_parameters(ReplyParameters::new(message.id).allow_sending_without_reply())
        .await?;
    Ok(())
}

pub fn result_keyboard(lang: Lang, kind: Option<(StyleKind, &str)>) -> InlineKeyboardMarkup {
    let mut row = vec![InlineKeyboardButton::callback(
        tr(lang, Msg::ExportButton),
        EXPORT_CALLBACK,
    )];
    if let Some((kind, name)) = kind {
        row.push(InlineKeyboardButton::callback(
            tr(lang, Msg::EditButton),
            format!("{EDIT_CALLBACK_PREFIX}{kind}:{name}"),
        ));
    }
    InlineKeyboardMarkup::new(vec![row])
}

pub fn parse_edit_callback(data: &str) -> Option<(StyleKind, &str)> {
    let rest = data.strip_prefix(EDIT_CALLBACK_PREFIX)?;
    let (kind, name) = rest.split_once(':')?;
    if name.is_empty() {
        return None;
    }
    Some((StyleKind::parse(kind)?, name))
}

/// Sends a styled result with the export/edit keyboard, remembers it for
/// export and records it in the user's history.
#[allow(clippy::too_many_arguments)]
pub async fn deliver_styled(
    bot: &Bot,
    state: &AppState,
    chat_id: ChatId,
    user_id: i64,
    reply_to: Option<MessageId>,
    lang: Lang,
    output: &str,
    source_text: &str,
    format: Option<(StyleKind, &str)>,
) -> Result<()> {
    let output = truncate_for_telegram(output, CONFIG.telegram_max_length);
    send_html(bot, chat_id, &output, reply_to, Some(result_keyboard(lang, format))).await?;
    state.remember_result(user_id, &output);

    if let Some((kind, name)) = format {
        let (style, preset) = match kind {
            StyleKind::Style => (Some(name.to_string()), None),
            StyleKind::Preset => (None, Some(name.to_string())),
        };
        if let Err(err) = state
            .db
            .insert_stylization(StylizationInsert {
                user_id,
                style,
                preset,
                text: source_text.to_string(),
            })
            .await
        {
            error!("Failed to record stylization for {}: {}", user_id, err);
        }
    }
    Ok(())
}

/// Renders `text` as a PDF in memory and sends it as a document.
pub async fn send_pdf(bot: &Bot, chat_id: ChatId, text: &str, lang: Lang) -> Result<()> {
    let bytes = match render_pdf(text) {
        Ok(bytes) => bytes,
        Err(PdfError::Empty) => {
            bot.send_message(chat_id, tr(lang, Msg::NothingToExport)).await?;
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    bot.send_document(chat_id, InputFile::memory(bytes).file_name("styled.pdf"))
        .caption(tr(lang, Msg::PdfExported))
        .await?;
    Ok(())
}

/// Exports the last styled result of `user_id`.
pub async fn send_last_result_pdf(
    bot: &Bot,
    state: &AppState,
    chat_id: ChatId,
    user_id: i64,
    lang: Lang,
) -> Result<()> {
    let html = state.last_result(user_id).unwrap_or_default();
    send_pdf(bot, chat_id, &plain_text_for_export(&html), lang).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_is_char_safe() {
        assert_eq!(truncate_for_telegram("привет", 10), "привет");
        assert_eq!(truncate_for_telegram("привет", 4), "при…");
    }

    #[test]
    fn truncation_keeps_styled_output_well_formed() {
        let registry = crate::styles::StyleRegistry::builtin();
        let long = "a".repeat(4100);
        let styled = registry.apply(StyleKind::Style, "bold", &long).unwrap();
        let cut = truncate_for_telegram(&styled, 4000);
        assert!(cut.starts_with("<b>"));
        assert!(cut.ends_with("…</b>"));
        assert_eq!(cut.chars().filter(|ch| *ch == 'a').count(), 3999);
    }

    #[test]
    fn truncation_counts_entities_as_one_character() {
        assert_eq!(truncate_for_telegram("a&amp;b&lt;c", 5), "a&amp;b&lt;c");
        assert_eq!(truncate_for_telegram("a&amp;b&lt;c", 3), "a&amp;…");
        assert_eq!(
            truncate_for_telegram("<pre>x&gt;y</pre> <i>tail</i>", 3),
            "<pre>x&gt;…</pre>"
        );
    }

    #[test]
    fn truncation_closes_nested_tags_in_order() {
        assert_eq!(
            truncate_for_telegram("🚨 <b><i>abcdef</i></b> 🚨", 5),
            "🚨 <b><i>ab…</i></b>"
        );
    }

    #[test]
    fn edit_callback_round_trips_through_keyboard_data() {
        let keyboard = result_keyboard(Lang::En, Some((StyleKind::Preset, "meme")));
        let buttons = &keyboard.inline_keyboard[0];
        assert_eq!(buttons.len(), 2);
        assert_eq!(
            parse_edit_callback("edit:preset:meme"),
            Some((StyleKind::Preset, "meme"))
        );
        assert_eq!(parse_edit_callback("edit:nope:meme"), None);
        assert_eq!(parse_edit_callback("edit:style:"), None);
    }

    #[test]
    fn ai_results_only_offer_export() {
        let keyboard = result_keyboard(Lang::Ru, None);
        assert_eq!(keyboard.inline_keyboard[0].len(), 1);
    }
}
