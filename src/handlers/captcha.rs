use std::future::Future;

use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{ChatPermissions, InlineKeyboardButton, InlineKeyboardMarkup, MessageId, User};
use teloxide::RequestError;
use tracing::{info, warn};

use crate::captcha::{
    generate, parse_payload, Challenge, GateAction, PayloadError, PendingChallenges, Resolution,
};
use crate::db::database::Database;
use crate::db::models::ChatSettings;
use crate::handlers::user_lang;
use crate::i18n::{tr, trf, Msg};
use crate::scheduler::{TaskKey, TaskScheduler};
use crate::state::AppState;
use crate::utils::telegram::{display_name, stored_username, user_id_i64};

fn log_api_error<T>(operation: &str, result: Result<T, RequestError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("{operation} failed: {err}");
            None
        }
    }
}

fn telegram_user_id(user_id: i64) -> UserId {
    UserId(u64::try_from(user_id).unwrap_or_default())
}

pub fn challenge_keyboard(challenge: &Challenge) -> Result<InlineKeyboardMarkup, PayloadError> {
    let buttons = challenge
        .options
        .iter()
        .map(|option| {
            challenge
                .payload_for(option)
                .map(|data| InlineKeyboardButton::callback(option.label.clone(), data))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(InlineKeyboardMarkup::new(vec![buttons]))
}

/// Mutes each human newcomer and posts their challenge when the chat has the gate on.
pub async fn new_members_handler(bot: Bot, state: AppState, message: Message) -> Result<()> {
    let chat_id = message.chat.id;
    let settings = state.db.get_chat_settings(chat_id.0).await?;
    if !settings.captcha_enabled {
        return Ok(());
    }

    let members = message.new_chat_members().unwrap_or(&[]);
    for member in members.iter().filter(|member| !member.is_bot) {
        if let Err(err) = challenge_member(&bot, &state, chat_id, member, &settings).await {
            warn!(
                "Failed to challenge {} in chat {}: {err:#}",
                member.id, chat_id
            );
        }
    }
    Ok(())
}

async fn challenge_member(
    bot: &Bot,
    state: &AppState,
    chat_id: ChatId,
    member: &User,
    settings: &ChatSettings,
) -> Result<()> {
    let user_id = user_id_i64(member);
    state
        .db
        .upsert_user(user_id, &stored_username(member))
        .await?;
    log_api_error(
        "restrict_chat_member",
        bot.restrict_chat_member(chat_id, member.id, ChatPermissions::empty())
            .await,
    );

    let lang = user_lang(state, Some(member)).await;
    let challenge = {
        let mut rng = rand::thread_rng();
        generate(
            &mut rng,
            settings.captcha_mode,
            chat_id.0,
            user_id,
            &display_name(member),
            settings.captcha_text.as_deref(),
            lang,
        )
    };
    let keyboard = challenge_keyboard(&challenge)?;
    let sent = bot
        .send_message(chat_id, challenge.prompt.clone())
        .reply_markup(keyboard)
        .await?;

    info!(
        "CAPTCHA ({}) sent to {} in chat {}",
        challenge.mode, user_id, chat_id
    );
    state.challenges.insert(challenge, sent.id.0);
    Ok(())
}

/// Removes a member who failed the challenge, unless an admin turned the gate
/// off meanwhile, in which case the member is unmuted instead.
async fn kick_after_failure(
    bot: Bot,
    db: Database,
    challenges: PendingChallenges,
    chat_id: i64,
    user_id: i64,
    message_id: i32,
) {
    challenges.remove(chat_id, user_id);
    let chat = ChatId(chat_id);
    let member = telegram_user_id(user_id);

    let gate_enabled = match db.get_chat_settings(chat_id).await {
        Ok(settings) => settings.captcha_enabled,
        Err(err) => {
            warn!("Could not read settings for chat {}: {}", chat_id, err);
            true
        }
    };
    if !gate_enabled {
        log_api_error(
            "restrict_chat_member",
            bot.restrict_chat_member(chat, member, ChatPermissions::all())
                .await,
        );
        return;
    }

    if log_api_error("ban_chat_member", bot.ban_chat_member(chat, member).await).is_some() {
        log_api_error(
            "unban_chat_member",
            bot.unban_chat_member(chat, member).await,
        );
        info!("Kicked {} from chat {} after failed CAPTCHA", user_id, chat_id);
    }
    log_api_error(
        "delete_message",
        bot.delete_message(chat, MessageId(message_id)).await,
    );
}

pub async fn captcha_callback(bot: Bot, state: AppState, query: CallbackQuery, data: String) -> Result<()> {
    let lang = user_lang(&state, Some(&query.from)).await;
    let payload = match parse_payload(&data) {
        Ok(payload) => payload,
        Err(err) => {
            warn!("Bad CAPTCHA payload {:?}: {}", data, err);
            return answer(&bot, &query, tr(lang, Msg::CaptchaExpired), false).await;
        }
    };

    let origin_chat = query.message.as_ref().map(|message| message.chat().id.0);
    if origin_chat.is_some_and(|chat| chat != payload.chat_id) {
        return answer(&bot, &query, tr(lang, Msg::CaptchaExpired), false).await;
    }
    let Some(pending) = state.challenges.get(payload.chat_id, payload.user_id) else {
        return answer(&bot, &query, tr(lang, Msg::CaptchaExpired), false).await;
    };

    let settings = state.db.get_chat_settings(payload.chat_id).await?;
    let responder = user_id_i64(&query.from);
    let resolution = state.gate.resolve(
        &pending.challenge,
        responder,
        &payload.answer,
        settings.welcome_message.as_deref(),
    );

    let chat = ChatId(payload.chat_id);
    let member = telegram_user_id(payload.user_id);
    let message_id = MessageId(pending.message_id);
    let name = display_name(&query.from);

    if let Resolution::Passed { actions } | Resolution::Failed { actions } = &resolution {
        sync_kick_schedule(
            &state.scheduler,
            TaskKey::captcha_kick(payload.chat_id, payload.user_id),
            actions,
            || {
                kick_after_failure(
                    bot.clone(),
                    state.db.clone(),
                    state.challenges.clone(),
                    payload.chat_id,
                    payload.user_id,
                    pending.message_id,
                )
            },
        );
    }

    match resolution {
        Resolution::NotYourChallenge => {
            answer(&bot, &query, tr(lang, Msg::CaptchaNotYours), true).await?;
        }
        Resolution::Passed { actions } => {
            state.challenges.remove(payload.chat_id, payload.user_id);
            for action in actions {
                match action {
                    GateAction::RestoreSendPermission => {
                        log_api_error(
                            "restrict_chat_member",
                            bot.restrict_chat_member(chat, member, ChatPermissions::all())
                                .await,
                        );
                    }
                    GateAction::MarkPassed => {
                        state
                            .db
                            .mark_captcha_passed(responder, &stored_username(&query.from))
                            .await?;
                    }
                    GateAction::SendWelcome(text) => {
                        log_api_error("send_message", bot.send_message(chat, text).await);
                    }
                    GateAction::CancelKick
                    | GateAction::EditToFailureNotice
                    | GateAction::ScheduleKick(_) => {}
                }
            }
            let notice = trf(lang, Msg::CaptchaPassed, &[&name]);
            log_api_error(
                "edit_message_text",
                bot.edit_message_text(chat, message_id, notice.clone())
                    .reply_markup(InlineKeyboardMarkup::new(
                        Vec::<Vec<InlineKeyboardButton>>::new(),
                    ))
                    .await,
            );
            info!("{} passed CAPTCHA in chat {}", responder, payload.chat_id);
            answer(&bot, &query, &notice, false).await?;
        }
        Resolution::Failed { actions } => {
            let notice = trf(lang, Msg::CaptchaFailed, &[&name]);
            if actions.contains(&GateAction::EditToFailureNotice) {
                // The buttons stay so a correct answer can still cancel the kick.
                let text = format!("{}\n\n{}", pending.challenge.prompt, notice);
                let keyboard = challenge_keyboard(&pending.challenge)?;
                log_api_error(
                    "edit_message_text",
                    bot.edit_message_text(chat, message_id, text)
                        .reply_markup(keyboard)
                        .await,
                );
            }
            info!("{} failed CAPTCHA in chat {}", responder, payload.chat_id);
            answer(&bot, &query, &notice, true).await?;
        }
    }
    Ok(())
}

/// Applies the timer side of a resolution. A pass cancels the pending kick; a
/// failure arms one unless a kick is already waiting for this member.
fn sync_kick_schedule<F, Fut>(
    scheduler: &TaskScheduler,
    key: TaskKey,
    actions: &[GateAction],
    kick: F,
) where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut kick = Some(kick);
    for action in actions {
        match action {
            GateAction::CancelKick => {
                scheduler.cancel(&key);
            }
            GateAction::ScheduleKick(delay) if !scheduler.is_scheduled(&key) => {
                if let Some(kick) = kick.take() {
                    scheduler.schedule(key, *delay, kick());
                }
            }
            _ => {}
        }
    }
}

async fn answer(bot: &Bot, query: &CallbackQuery, text: &str, alert: bool) -> Result<()> {
    bot.answer_callback_query(query.id.clone())
        .text(text.to_string())
        .show_alert(alert)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::captcha::{CaptchaGate, CaptchaMode, MAX_CALLBACK_BYTES};
    use crate::i18n::Lang;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use teloxide::types::InlineKeyboardButtonKind;

    fn resolution_actions(resolution: Resolution) -> Vec<GateAction> {
        match resolution {
            Resolution::Passed { actions } | Resolution::Failed { actions } => actions,
            Resolution::NotYourChallenge => Vec::new(),
        }
    }

    #[tokio::test]
    async fn correct_answer_after_a_miss_cancels_the_kick() {
        let mut rng = StdRng::seed_from_u64(4);
        let challenge = generate(&mut rng, CaptchaMode::Math, -100, 7, "Ann", None, Lang::En);
        let wrong = challenge
            .options
            .iter()
            .find(|option| option.answer != challenge.correct)
            .unwrap()
            .answer
            .clone();
        let gate = CaptchaGate::new(Duration::from_millis(40));
        let scheduler = TaskScheduler::new();
        let key = TaskKey::captcha_kick(-100, 7);
        let kicks = Arc::new(AtomicUsize::new(0));
        let kick = || {
            let kicks = Arc::clone(&kicks);
            async move {
                kicks.fetch_add(1, Ordering::SeqCst);
            }
        };

        let missed = gate.resolve(&challenge, 7, &wrong, None);
        assert!(matches!(missed, Resolution::Failed { .. }));
        let missed = resolution_actions(missed);
        sync_kick_schedule(&scheduler, key, &missed, kick);
        assert!(scheduler.is_scheduled(&key));

        // A second miss keeps the original timer.
        sync_kick_schedule(&scheduler, key, &missed, kick);
        assert_eq!(scheduler.len(), 1);

        let passed = gate.resolve(&challenge, 7, &challenge.correct, Some("hi"));
        assert!(matches!(passed, Resolution::Passed { .. }));
        let passed = resolution_actions(passed);
        assert!(passed.contains(&GateAction::RestoreSendPermission));
        sync_kick_schedule(&scheduler, key, &passed, kick);
        assert!(!scheduler.is_scheduled(&key));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(kicks.load(Ordering::SeqCst), 0);
        assert!(!scheduler.is_scheduled(&key));
    }

    #[tokio::test]
    async fn unanswered_miss_fires_the_kick_once() {
        let scheduler = TaskScheduler::new();
        let key = TaskKey::captcha_kick(-100, 8);
        let kicks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&kicks);
        let actions = [
            GateAction::EditToFailureNotice,
            GateAction::ScheduleKick(Duration::from_millis(10)),
        ];
        sync_kick_schedule(&scheduler, key, &actions, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(kicks.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn keyboard_buttons_carry_parseable_payloads() {
        let mut rng = StdRng::seed_from_u64(9);
        let challenge = generate(
            &mut rng,
            CaptchaMode::Math,
            -1001234567890,
            987654321,
            "Ann",
            None,
            Lang::En,
        );
        let keyboard = challenge_keyboard(&challenge).unwrap();
        assert_eq!(keyboard.inline_keyboard[0].len(), 3);
        for button in &keyboard.inline_keyboard[0] {
            let InlineKeyboardButtonKind::CallbackData(data) = &button.kind else {
                panic!("expected callback button");
            };
            assert!(data.len() <= MAX_CALLBACK_BYTES);
            let payload = parse_payload(data).unwrap();
            assert_eq!(payload.chat_id, -1001234567890);
            assert_eq!(payload.user_id, 987654321);
            assert_eq!(payload.answer, button.text);
        }
    }

    #[test]
    fn negative_ids_never_map_to_real_users() {
        assert_eq!(telegram_user_id(-5), UserId(0));
        assert_eq!(telegram_user_id(42), UserId(42));
    }
}
