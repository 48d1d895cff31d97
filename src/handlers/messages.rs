use std::collections::HashSet;

use anyhow::Result;
use teloxide::prelude::*;
use tracing::{info, warn};

use crate::handlers::ai::run_and_deliver;
use crate::handlers::responses::{deliver_styled, reply_text};
use crate::handlers::user_lang;
use crate::i18n::{trf, Lang, Msg};
use crate::llm::gigachat::AiCommand;
use crate::moderation::{moderate_message, Verdict};
use crate::state::{AppState, PendingInput};
use crate::styles::StyleKind;
use crate::utils::telegram::{display_name, user_id_i64};

/// Plain text pipeline: spam gate, activity stats, pending input, auto-format.
pub async fn text_message_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let Some(text) = message.text() else {
        return Ok(());
    };
    if text.trim_start().starts_with('/') {
        return Ok(());
    }
    let Some(user) = message.from.as_ref() else {
        return Ok(());
    };
    if user.is_bot {
        return Ok(());
    }

    let chat_id = message.chat.id;
    let user_id = user_id_i64(user);
    let is_group = message.chat.is_group() || message.chat.is_supergroup();
    let lang = user_lang(&state, Some(user)).await;

    if is_group {
        let name = display_name(user);
        let settings = state.db.get_chat_settings(chat_id.0).await?;
        let verdict = moderate_message(
            &state.db,
            state.classifier.as_ref(),
            &state.spam_policy,
            settings.spam_filter,
            chat_id.0,
            user_id,
            &name,
            text,
        )
        .await?;
        if verdict == Verdict::Delete {
            info!("Deleting spam from {} in chat {}", user_id, chat_id);
            if let Err(err) = bot.delete_message(chat_id, message.id).await {
                warn!("delete_message failed: {err}");
            }
            bot.send_message(chat_id, trf(lang, Msg::SpamDeleted, &[&name]))
                .await?;
            return Ok(());
        }
    }

    let pending = state.pending_inputs.take_if(chat_id.0, user_id, |input| {
        !matches!(input, PendingInput::SmartReplyTone { .. })
    });
    if let Some(input) = pending {
        return apply_pending_input(&bot, &state, &message, user_id, lang, input, text).await;
    }

    auto_format(&bot, &state, &message, user_id, lang, is_group, text).await
}

async fn apply_pending_input(
    bot: &Bot,
    state: &AppState,
    message: &Message,
    user_id: i64,
    lang: Lang,
    input: PendingInput,
    text: &str,
) -> Result<()> {
    match input {
        PendingInput::Format { kind, name } => {
            if kind == StyleKind::Style && state.db.is_style_restricted(user_id, &name).await? {
                return reply_text(bot, message, trf(lang, Msg::StyleRestricted, &[&name])).await;
            }
            let Some(output) = state.registry.apply(kind, &name, text) else {
                return reply_text(bot, message, trf(lang, Msg::UnknownStyle, &[&name])).await;
            };
            deliver_styled(
                bot,
                state,
                message.chat.id,
                user_id,
                Some(message.id),
                lang,
                &output,
                text,
                Some((kind, &name)),
            )
            .await
        }
        PendingInput::SmartReplyText { tone } => {
            run_and_deliver(
                bot,
                state,
                message.chat.id,
                user_id,
                Some(message.id),
                lang,
                AiCommand::SmartReply(tone),
                text,
            )
            .await
        }
        PendingInput::SmartReplyTone { .. } => Ok(()),
    }
}

async fn auto_format(
    bot: &Bot,
    state: &AppState,
    message: &Message,
    user_id: i64,
    lang: Lang,
    is_group: bool,
    text: &str,
) -> Result<()> {
    let group_template = if is_group {
        state.db.get_group_template(message.chat.id.0).await?
    } else {
        None
    };
    let restricted: HashSet<String> = state
        .db
        .restricted_styles(user_id)
        .await?
        .into_iter()
        .collect();

    let Some(formatted) =
        state
            .registry
            .resolve_auto_format(group_template.as_deref(), text, &restricted)
    else {
        return Ok(());
    };

    if let Some(keyword) = formatted.keyword {
        reply_text(bot, message, trf(lang, Msg::AutoFormatted, &[keyword])).await?;
    }
    deliver_styled(
        bot,
        state,
        message.chat.id,
        user_id,
        Some(message.id),
        lang,
        &formatted.output,
        text,
        Some((formatted.kind, formatted.name)),
    )
    .await
}
