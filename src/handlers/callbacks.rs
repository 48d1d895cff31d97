use anyhow::Result;
use teloxide::prelude::*;
use tracing::{info, warn};

use crate::captcha::PAYLOAD_PREFIX;
use crate::handlers::access::is_admin_user;
use crate::handlers::admin::GROUP_PRESET_PREFIX;
use crate::handlers::ai::{run_and_deliver, TONE_CALLBACK_PREFIX};
use crate::handlers::captcha::captcha_callback;
use crate::handlers::commands::{send_help, HELP_CALLBACK};
use crate::handlers::responses::{parse_edit_callback, send_last_result_pdf, EXPORT_CALLBACK};
use crate::handlers::user_lang;
use crate::i18n::{tr, trf, Lang, Msg};
use crate::llm::gigachat::{AiCommand, Tone};
use crate::state::{AppState, PendingInput};
use crate::styles::StyleKind;
use crate::utils::telegram::user_id_i64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction<'a> {
    Captcha,
    Choose(StyleKind, &'a str),
    GroupPreset(&'a str),
    Tone(&'a str),
    Help,
    Export,
    Unknown,
}

pub fn route(data: &str) -> CallbackAction<'_> {
    if data.starts_with(&format!("{PAYLOAD_PREFIX}:")) {
        return CallbackAction::Captcha;
    }
    if data == HELP_CALLBACK {
        return CallbackAction::Help;
    }
    if data == EXPORT_CALLBACK {
        return CallbackAction::Export;
    }
    if let Some((kind, name)) = parse_edit_callback(data) {
        return CallbackAction::Choose(kind, name);
    }
    if let Some(name) = data.strip_prefix(TONE_CALLBACK_PREFIX) {
        return CallbackAction::Tone(name);
    }
    match data.split_once(':') {
        Some(("style", name)) => CallbackAction::Choose(StyleKind::Style, name),
        Some(("preset", name)) => CallbackAction::Choose(StyleKind::Preset, name),
        Some((prefix, name)) if prefix == GROUP_PRESET_PREFIX => CallbackAction::GroupPreset(name),
        _ => CallbackAction::Unknown,
    }
}

pub async fn handle_callback_query(bot: Bot, state: AppState, query: CallbackQuery) -> Result<()> {
    let Some(data) = query.data.clone() else {
        return Ok(());
    };
    if route(&data) == CallbackAction::Captcha {
        return captcha_callback(bot, state, query, data).await;
    }

    let user_id = user_id_i64(&query.from);
    let chat_id = query
        .message
        .as_ref()
        .map(|message| message.chat().id)
        .unwrap_or(ChatId(user_id));
    let lang = user_lang(&state, Some(&query.from)).await;

    let outcome = match route(&data) {
        CallbackAction::Choose(kind, name) => {
            choose_format(&bot, &state, chat_id, user_id, lang, kind, name).await
        }
        CallbackAction::GroupPreset(name) => {
            choose_group_preset(&bot, &state, &query, chat_id, user_id, lang, name).await
        }
        CallbackAction::Tone(name) => choose_tone(&bot, &state, chat_id, user_id, lang, name)
            .await
            .map(|()| None),
        CallbackAction::Help => send_help(&bot, chat_id, lang).await.map(|()| None),
        CallbackAction::Export => send_last_result_pdf(&bot, &state, chat_id, user_id, lang)
            .await
            .map(|()| None),
        CallbackAction::Captcha | CallbackAction::Unknown => {
            warn!("Unhandled callback data {:?}", data);
            Ok(None)
        }
    };

    // Answered on every path, failures included.
    let mut request = bot.answer_callback_query(query.id.clone());
    if let Some(text) = callback_notice(&outcome, lang) {
        request = request.text(text).show_alert(true);
    }
    if let Err(err) = request.await {
        warn!("answer_callback_query failed: {err}");
    }
    outcome.map(|_| ())
}

/// Alert text for the callback answer: the action's refusal, or a generic
/// failure notice when the action errored.
fn callback_notice(outcome: &Result<Option<String>>, lang: Lang) -> Option<String> {
    match outcome {
        Ok(notice) => notice.clone(),
        Err(_) => Some(tr(lang, Msg::ActionFailed).to_string()),
    }
}

/// Arms the pending input for a style or preset. Returns an alert text when refused.
async fn choose_format(
    bot: &Bot,
    state: &AppState,
    chat_id: ChatId,
    user_id: i64,
    lang: Lang,
    kind: StyleKind,
    name: &str,
) -> Result<Option<String>> {
    let Some(style) = state.registry.get(kind, name) else {
        return Ok(Some(trf(lang, Msg::UnknownStyle, &[name])));
    };
    if kind == StyleKind::Style && state.db.is_style_restricted(user_id, name).await? {
        return Ok(Some(trf(lang, Msg::StyleRestricted, &[name])));
    }

    state.pending_inputs.set(
        chat_id.0,
        user_id,
        PendingInput::Format {
            kind,
            name: style.name.to_string(),
        },
    );
    bot.send_message(chat_id, trf(lang, Msg::EnterText, &[style.label(lang)]))
        .await?;
    Ok(None)
}

async fn choose_group_preset(
    bot: &Bot,
    state: &AppState,
    query: &CallbackQuery,
    chat_id: ChatId,
    user_id: i64,
    lang: Lang,
    name: &str,
) -> Result<Option<String>> {
    if !is_admin_user(user_id) {
        warn!("Denied group template change by {} in chat {}", user_id, chat_id);
        return Ok(Some(tr(lang, Msg::AccessDenied).to_string()));
    }
    let Some(preset) = state.registry.get(StyleKind::Preset, name) else {
        return Ok(Some(trf(lang, Msg::UnknownStyle, &[name])));
    };

    state.db.set_group_template(chat_id.0, preset.name).await?;
    info!("Group template {} set for chat {}", preset.name, chat_id);
    let text = trf(lang, Msg::GroupTemplateSet, &[preset.label(lang)]);
    match query.message.as_ref() {
        Some(message) => {
            bot.edit_message_text(chat_id, message.id(), text).await?;
        }
        None => {
            bot.send_message(chat_id, text).await?;
        }
    }
    Ok(None)
}

/// Runs the smart reply when `/smartreply <text>` is waiting for a tone, or
/// asks for the text otherwise.
async fn choose_tone(
    bot: &Bot,
    state: &AppState,
    chat_id: ChatId,
    user_id: i64,
    lang: Lang,
    name: &str,
) -> Result<()> {
    let Some(tone) = Tone::parse(name) else {
        warn!("Unknown tone {:?}", name);
        return Ok(());
    };

    let waiting = state.pending_inputs.take_if(chat_id.0, user_id, |input| {
        matches!(input, PendingInput::SmartReplyTone { .. })
    });
    if let Some(PendingInput::SmartReplyTone { text }) = waiting {
        return run_and_deliver(
            bot,
            state,
            chat_id,
            user_id,
            None,
            lang,
            AiCommand::SmartReply(tone),
            &text,
        )
        .await;
    }

    state
        .pending_inputs
        .set(chat_id.0, user_id, PendingInput::SmartReplyText { tone });
    bot.send_message(chat_id, trf(lang, Msg::EnterText, &[tone.label(lang)]))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_every_known_prefix() {
        assert_eq!(route("cap:-1:2:ok"), CallbackAction::Captcha);
        assert_eq!(route("style:bold"), CallbackAction::Choose(StyleKind::Style, "bold"));
        assert_eq!(route("preset:meme"), CallbackAction::Choose(StyleKind::Preset, "meme"));
        assert_eq!(route("gpreset:quote"), CallbackAction::GroupPreset("quote"));
        assert_eq!(route("tone:formal"), CallbackAction::Tone("formal"));
        assert_eq!(route("help"), CallbackAction::Help);
        assert_eq!(route("export:pdf"), CallbackAction::Export);
        assert_eq!(
            route("edit:preset:alert"),
            CallbackAction::Choose(StyleKind::Preset, "alert")
        );
        assert_eq!(route("whatever"), CallbackAction::Unknown);
    }

    #[test]
    fn failed_actions_still_get_an_answer_text() {
        let failed: Result<Option<String>> = Err(anyhow::anyhow!("send failed"));
        assert_eq!(
            callback_notice(&failed, Lang::En).as_deref(),
            Some("Something went wrong. Try again later.")
        );

        let refused: Result<Option<String>> = Ok(Some("denied".to_string()));
        assert_eq!(callback_notice(&refused, Lang::En).as_deref(), Some("denied"));

        let done: Result<Option<String>> = Ok(None);
        assert_eq!(callback_notice(&done, Lang::Ru), None);
    }
}
