use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, MessageId, ReplyParameters};
use tracing::info;

use crate::handlers::access::check_rate_limit;
use crate::handlers::responses::deliver_styled;
use crate::handlers::{text_or_sample, user_lang};
use crate::i18n::{tr, trf, Lang, Msg};
use crate::llm::gigachat::{run_ai_command, AiCommand, AiReply, Tone};
use crate::state::{AppState, PendingInput};
use crate::utils::telegram::{user_id_i64, TypingIndicator};

pub const TONE_CALLBACK_PREFIX: &str = "tone:";

pub fn tone_keyboard(lang: Lang) -> InlineKeyboardMarkup {
    let buttons: Vec<InlineKeyboardButton> = Tone::ALL
        .iter()
        .map(|tone| {
            InlineKeyboardButton::callback(
                tone.label(lang),
                format!("{TONE_CALLBACK_PREFIX}{}", tone.as_str()),
            )
        })
        .collect();
    InlineKeyboardMarkup::new(buttons.chunks(2).map(|row| row.to_vec()).collect::<Vec<_>>())
}

/// A fallback reply is announced with the error notice in front of it.
pub fn ai_reply_text(reply: &AiReply, lang: Lang) -> String {
    if reply.fell_back {
        trf(lang, Msg::AiError, &[&reply.text])
    } else {
        reply.text.clone()
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn run_and_deliver(
    bot: &Bot,
    state: &AppState,
    chat_id: ChatId,
    user_id: i64,
    reply_to: Option<MessageId>,
    lang: Lang,
    command: AiCommand,
    text: &str,
) -> Result<()> {
    let reply = {
        let _typing = TypingIndicator::start(bot.clone(), chat_id);
        run_ai_command(&state.gigachat, command, text, lang).await
    };
    info!(
        "AI command {} for {} finished (fallback: {})",
        command.name(),
        user_id,
        reply.fell_back
    );
    let output = ai_reply_text(&reply, lang);
    deliver_styled(bot, state, chat_id, user_id, reply_to, lang, &output, text, None).await
}

pub async fn ai_command_handler(
    bot: Bot,
    state: AppState,
    message: Message,
    command: AiCommand,
    arg: String,
) -> Result<()> {
    let Some(user) = message.from.as_ref() else {
        return Ok(());
    };
    let lang = user_lang(&state, Some(user)).await;
    if !check_rate_limit(&bot, &message, lang).await {
        return Ok(());
    }
    let text = text_or_sample(&arg, lang);
    run_and_deliver(
        &bot,
        &state,
        message.chat.id,
        user_id_i64(user),
        Some(message.id),
        lang,
        command,
        &text,
    )
    .await
}

/// `/smartreply <text>` remembers the text and waits for a tone; a bare
/// `/smartreply` asks for the tone first and then for the text.
pub async fn smartreply_handler(bot: Bot, state: AppState, message: Message, arg: String) -> Result<()> {
    let Some(user) = message.from.as_ref() else {
        return Ok(());
    };
    let lang = user_lang(&state, Some(user)).await;
    let text = arg.trim();
    if !text.is_empty() {
        state.pending_inputs.set(
            message.chat.id.0,
            user_id_i64(user),
            PendingInput::SmartReplyTone {
                text: text.to_string(),
            },
        );
    }

    bot.send_message(message.chat.id, tr(lang, Msg::ChooseTone))
        .reply_parameters(ReplyParameters::new(message.id))
        .reply_markup(tone_keyboard(lang))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tone_keyboard_lists_every_tone() {
        let keyboard = tone_keyboard(Lang::En);
        let total: usize = keyboard.inline_keyboard.iter().map(Vec::len).sum();
        assert_eq!(total, Tone::ALL.len());
    }

    #[test]
    fn fallback_replies_carry_error_notice() {
        let reply = AiReply {
            text: "canned".to_string(),
            fell_back: true,
        };
        assert_eq!(
            ai_reply_text(&reply, Lang::En),
            "GigaChat API error, using fallback: canned"
        );
        let ok = AiReply {
            text: "fresh".to_string(),
            fell_back: false,
        };
        assert_eq!(ai_reply_text(&ok, Lang::En), "fresh");
    }
}
