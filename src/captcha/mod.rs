use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;

use crate::i18n::{tr, trf, Lang, Msg};

pub const PAYLOAD_PREFIX: &str = "cap";
pub const BUTTON_ANSWER: &str = "ok";
/// Telegram rejects callback data longer than this.
pub const MAX_CALLBACK_BYTES: usize = 64;

const MATH_OPERAND_MAX: u32 = 10;
const MATH_MAX_OFFSET: i64 = 5;
const TEXT_WORDS: &[&str] = &[
    "apple", "river", "cloud", "tiger", "piano", "lemon", "rocket", "forest", "candle", "pepper",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptchaMode {
    Button,
    Math,
    Text,
}

impl CaptchaMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CaptchaMode::Button => "button",
            CaptchaMode::Math => "math",
            CaptchaMode::Text => "text",
        }
    }
}

impl fmt::Display for CaptchaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown captcha mode: {0}")]
pub struct UnknownMode(pub String);

impl FromStr for CaptchaMode {
    type Err = UnknownMode;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "button" => Ok(CaptchaMode::Button),
            "math" => Ok(CaptchaMode::Math),
            "text" => Ok(CaptchaMode::Text),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("callback data is not a captcha payload")]
    WrongPrefix,
    #[error("captcha payload is missing the {0} field")]
    MissingField(&'static str),
    #[error("captcha payload has a malformed {0} id")]
    BadId(&'static str),
    #[error("captcha payload is {0} bytes, over the callback limit")]
    TooLong(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptchaPayload {
    pub chat_id: i64,
    pub user_id: i64,
    pub answer: String,
}

pub fn encode_payload(chat_id: i64, user_id: i64, answer: &str) -> Result<String, PayloadError> {
    let payload = format!("{PAYLOAD_PREFIX}:{chat_id}:{user_id}:{answer}");
    if payload.len() > MAX_CALLBACK_BYTES {
        return Err(PayloadError::TooLong(payload.len()));
    }
    Ok(payload)
}

pub fn parse_payload(data: &str) -> Result<CaptchaPayload, PayloadError> {
    let mut parts = data.splitn(4, ':');
    if parts.next() != Some(PAYLOAD_PREFIX) {
        return Err(PayloadError::WrongPrefix);
    }
    let chat_id = parts
        .next()
        .ok_or(PayloadError::MissingField("chat"))?
        .parse::<i64>()
        .map_err(|_| PayloadError::BadId("chat"))?;
    let user_id = parts
        .next()
        .ok_or(PayloadError::MissingField("user"))?
        .parse::<i64>()
        .map_err(|_| PayloadError::BadId("user"))?;
    let answer = parts
        .next()
        .filter(|answer| !answer.is_empty())
        .ok_or(PayloadError::MissingField("answer"))?;
    Ok(CaptchaPayload {
        chat_id,
        user_id,
        answer: answer.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeOption {
    pub label: String,
    pub answer: String,
}

#[derive(Debug, Clone)]
pub struct Challenge {
    pub chat_id: i64,
    pub user_id: i64,
    pub mode: CaptchaMode,
    pub prompt: String,
    pub options: Vec<ChallengeOption>,
    pub correct: String,
}

impl Challenge {
    pub fn payload_for(&self, option: &ChallengeOption) -> Result<String, PayloadError> {
        encode_payload(self.chat_id, self.user_id, &option.answer)
    }
}

/// Builds a challenge for a member who just joined. `custom_prompt` is the
/// chat's configured challenge text, if any.
pub fn generate<R: Rng + ?Sized>(
    rng: &mut R,
    mode: CaptchaMode,
    chat_id: i64,
    user_id: i64,
    member_name: &str,
    custom_prompt: Option<&str>,
    lang: Lang,
) -> Challenge {
    let (instruction, options, correct) = match mode {
        CaptchaMode::Button => {
            let instruction = trf(lang, Msg::CaptchaPrompt, &[member_name]);
            let option = ChallengeOption {
                label: tr(lang, Msg::CaptchaButton).to_string(),
                answer: BUTTON_ANSWER.to_string(),
            };
            (instruction, vec![option], BUTTON_ANSWER.to_string())
        }
        CaptchaMode::Math => {
            let a = rng.gen_range(1..=MATH_OPERAND_MAX);
            let b = rng.gen_range(1..=MATH_OPERAND_MAX);
            let sum = i64::from(a + b);
            let instruction = trf(
                lang,
                Msg::CaptchaMathPrompt,
                &[member_name, &a.to_string(), &b.to_string()],
            );
            let mut answers = vec![sum];
            answers.extend(math_decoys(rng, sum));
            answers.shuffle(rng);
            let options = answers
                .into_iter()
                .map(|value| ChallengeOption {
                    label: value.to_string(),
                    answer: value.to_string(),
                })
                .collect();
            (instruction, options, sum.to_string())
        }
        CaptchaMode::Text => {
            let picked: Vec<&str> = TEXT_WORDS.choose_multiple(rng, 3).copied().collect();
            let word = picked[0];
            let instruction = trf(lang, Msg::CaptchaTextPrompt, &[member_name, word]);
            let mut options: Vec<ChallengeOption> = picked
                .iter()
                .map(|candidate| ChallengeOption {
                    label: candidate.to_string(),
                    answer: candidate.to_string(),
                })
                .collect();
            options.shuffle(rng);
            (instruction, options, word.to_string())
        }
    };

    let prompt = match custom_prompt.map(str::trim).filter(|text| !text.is_empty()) {
        Some(custom) if mode == CaptchaMode::Button => custom.to_string(),
        Some(custom) => format!("{custom}\n{instruction}"),
        None => instruction,
    };

    Challenge {
        chat_id,
        user_id,
        mode,
        prompt,
        options,
        correct,
    }
}

/// Two distinct wrong sums, each a non-zero offset of at most five away from
/// the correct one and still positive.
fn math_decoys<R: Rng + ?Sized>(rng: &mut R, sum: i64) -> Vec<i64> {
    let offsets: Vec<i64> = (-MATH_MAX_OFFSET..=MATH_MAX_OFFSET)
        .filter(|offset| *offset != 0 && sum + offset > 0)
        .collect();
    offsets
        .choose_multiple(rng, 2)
        .map(|offset| sum + offset)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateAction {
    RestoreSendPermission,
    CancelKick,
    MarkPassed,
    SendWelcome(String),
    EditToFailureNotice,
    ScheduleKick(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    NotYourChallenge,
    Passed { actions: Vec<GateAction> },
    Failed { actions: Vec<GateAction> },
}

#[derive(Debug, Clone)]
pub struct CaptchaGate {
    fail_delay: Duration,
}

impl CaptchaGate {
    pub fn new(fail_delay: Duration) -> Self {
        CaptchaGate { fail_delay }
    }

    /// Decides what happens when `responder` taps `answer` on `challenge`.
    pub fn resolve(
        &self,
        challenge: &Challenge,
        responder: i64,
        answer: &str,
        welcome: Option<&str>,
    ) -> Resolution {
        if responder != challenge.user_id {
            return Resolution::NotYourChallenge;
        }

        if answer == challenge.correct {
            let mut actions = vec![
                GateAction::RestoreSendPermission,
                GateAction::CancelKick,
                GateAction::MarkPassed,
            ];
            if let Some(text) = welcome.map(str::trim).filter(|text| !text.is_empty()) {
                actions.push(GateAction::SendWelcome(text.to_string()));
            }
            return Resolution::Passed { actions };
        }

        Resolution::Failed {
            actions: vec![
                GateAction::EditToFailureNotice,
                GateAction::ScheduleKick(self.fail_delay),
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct PendingChallenge {
    pub challenge: Challenge,
    pub message_id: i32,
}

/// Challenges awaiting an answer, keyed by (chat, user).
#[derive(Debug, Clone, Default)]
pub struct PendingChallenges {
    inner: Arc<Mutex<HashMap<(i64, i64), PendingChallenge>>>,
}

impl PendingChallenges {
    pub fn insert(&self, challenge: Challenge, message_id: i32) {
        let key = (challenge.chat_id, challenge.user_id);
        self.inner.lock().insert(
            key,
            PendingChallenge {
                challenge,
                message_id,
            },
        );
    }

    pub fn get(&self, chat_id: i64, user_id: i64) -> Option<PendingChallenge> {
        self.inner.lock().get(&(chat_id, user_id)).cloned()
    }

    pub fn remove(&self, chat_id: i64, user_id: i64) -> Option<PendingChallenge> {
        self.inner.lock().remove(&(chat_id, user_id))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn challenge(mode: CaptchaMode, seed: u64) -> Challenge {
        let mut rng = StdRng::seed_from_u64(seed);
        generate(&mut rng, mode, -100123, 42, "Ann", None, Lang::En)
    }

    #[test]
    fn math_options_hold_exactly_one_correct_sum() {
        for seed in 0..500 {
            let challenge = challenge(CaptchaMode::Math, seed);
            let correct: i64 = challenge.correct.parse().unwrap();
            let values: Vec<i64> = challenge
                .options
                .iter()
                .map(|option| option.answer.parse().unwrap())
                .collect();
            assert_eq!(values.len(), 3);
            assert_eq!(values.iter().filter(|v| **v == correct).count(), 1);
            for value in values.iter().filter(|v| **v != correct) {
                let offset = (value - correct).abs();
                assert!((1..=5).contains(&offset), "offset {offset} out of range");
                assert!(*value > 0);
            }
            assert!((2..=20).contains(&correct));
        }
    }

    #[test]
    fn text_challenge_shows_the_correct_word() {
        for seed in 0..50 {
            let challenge = challenge(CaptchaMode::Text, seed);
            assert!(challenge.prompt.contains(&challenge.correct));
            assert_eq!(challenge.options.len(), 3);
            let mut answers: Vec<&str> = challenge
                .options
                .iter()
                .map(|option| option.answer.as_str())
                .collect();
            answers.sort();
            answers.dedup();
            assert_eq!(answers.len(), 3);
        }
    }

    #[test]
    fn button_challenge_uses_custom_prompt() {
        let mut rng = StdRng::seed_from_u64(1);
        let challenge = generate(
            &mut rng,
            CaptchaMode::Button,
            -1,
            2,
            "Ann",
            Some("Press the button"),
            Lang::En,
        );
        assert_eq!(challenge.prompt, "Press the button");
        assert_eq!(challenge.options.len(), 1);
        assert_eq!(challenge.correct, BUTTON_ANSWER);
    }

    #[test]
    fn payload_round_trips_negative_chat_ids() {
        let data = encode_payload(-1001234567890, 987654321, "12").unwrap();
        assert_eq!(data, "cap:-1001234567890:987654321:12");
        let parsed = parse_payload(&data).unwrap();
        assert_eq!(parsed.chat_id, -1001234567890);
        assert_eq!(parsed.user_id, 987654321);
        assert_eq!(parsed.answer, "12");
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert_eq!(parse_payload("style:bold"), Err(PayloadError::WrongPrefix));
        assert_eq!(parse_payload("cap:x:1:ok"), Err(PayloadError::BadId("chat")));
        assert_eq!(
            parse_payload("cap:1:2"),
            Err(PayloadError::MissingField("answer"))
        );
        assert!(matches!(
            encode_payload(1, 2, &"x".repeat(80)),
            Err(PayloadError::TooLong(_))
        ));
    }

    #[test]
    fn every_generated_option_fits_callback_limit() {
        for mode in [CaptchaMode::Button, CaptchaMode::Math, CaptchaMode::Text] {
            let challenge = challenge(mode, 3);
            for option in &challenge.options {
                assert!(challenge.payload_for(option).is_ok());
            }
        }
    }

    #[test]
    fn correct_answer_restores_permission_and_cancels_kick() {
        let gate = CaptchaGate::new(Duration::from_secs(300));
        let challenge = challenge(CaptchaMode::Math, 9);
        let resolution = gate.resolve(&challenge, 42, &challenge.correct, Some("Welcome!"));
        match resolution {
            Resolution::Passed { actions } => {
                assert!(actions.contains(&GateAction::RestoreSendPermission));
                assert!(actions.contains(&GateAction::CancelKick));
                assert!(actions.contains(&GateAction::SendWelcome("Welcome!".to_string())));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn wrong_answer_schedules_kick_without_restoring() {
        let gate = CaptchaGate::new(Duration::from_secs(300));
        let challenge = challenge(CaptchaMode::Button, 1);
        match gate.resolve(&challenge, 42, "nope", None) {
            Resolution::Failed { actions } => {
                assert!(!actions.contains(&GateAction::RestoreSendPermission));
                assert!(actions.contains(&GateAction::ScheduleKick(Duration::from_secs(300))));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn other_members_cannot_answer() {
        let gate = CaptchaGate::new(Duration::from_secs(1));
        let challenge = challenge(CaptchaMode::Button, 1);
        assert_eq!(
            gate.resolve(&challenge, 7, BUTTON_ANSWER, None),
            Resolution::NotYourChallenge
        );
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("MATH".parse::<CaptchaMode>(), Ok(CaptchaMode::Math));
        assert!("emoji".parse::<CaptchaMode>().is_err());
        assert_eq!(CaptchaMode::Text.to_string(), "text");
    }
}
