use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::captcha::{CaptchaGate, PendingChallenges};
use crate::db::database::Database;
use crate::llm::gigachat::{GigaChatClient, Tone};
use crate::moderation::{Classifier, SpamPolicy};
use crate::scheduler::TaskScheduler;
use crate::styles::{StyleKind, StyleRegistry};

/// What the next plain message from a user in a chat is taken as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingInput {
    Format { kind: StyleKind, name: String },
    SmartReplyText { tone: Tone },
    /// `/smartreply <text>` waiting for the tone button.
    SmartReplyTone { text: String },
}

/// Keyed by (chat, user) so a choice in one chat never captures text from another.
#[derive(Clone, Default)]
pub struct PendingInputs {
    inner: Arc<Mutex<HashMap<(i64, i64), PendingInput>>>,
}

impl PendingInputs {
    pub fn set(&self, chat_id: i64, user_id: i64, input: PendingInput) {
        self.inner.lock().insert((chat_id, user_id), input);
    }

    pub fn take(&self, chat_id: i64, user_id: i64) -> Option<PendingInput> {
        self.inner.lock().remove(&(chat_id, user_id))
    }

    /// Removes the entry only when it matches `predicate`.
    pub fn take_if(
        &self,
        chat_id: i64,
        user_id: i64,
        predicate: impl FnOnce(&PendingInput) -> bool,
    ) -> Option<PendingInput> {
        let mut inner = self.inner.lock();
        match inner.get(&(chat_id, user_id)) {
            Some(input) if predicate(input) => inner.remove(&(chat_id, user_id)),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub registry: Arc<StyleRegistry>,
    pub scheduler: TaskScheduler,
    pub gate: CaptchaGate,
    pub challenges: PendingChallenges,
    pub classifier: Arc<dyn Classifier>,
    pub spam_policy: Arc<SpamPolicy>,
    pub gigachat: Arc<GigaChatClient>,
    pub pending_inputs: PendingInputs,
    /// Last styled output per user, used by the "Export to PDF" button.
    pub last_results: Arc<Mutex<HashMap<i64, String>>>,
}

impl AppState {
    pub fn new(
        db: Database,
        classifier: Arc<dyn Classifier>,
        spam_policy: SpamPolicy,
        captcha_fail_delay: Duration,
    ) -> Self {
        AppState {
            db,
            registry: Arc::new(StyleRegistry::builtin()),
            scheduler: TaskScheduler::new(),
            gate: CaptchaGate::new(captcha_fail_delay),
            challenges: PendingChallenges::default(),
            classifier,
            spam_policy: Arc::new(spam_policy),
            gigachat: Arc::new(GigaChatClient::new()),
            pending_inputs: PendingInputs::default(),
            last_results: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn remember_result(&self, user_id: i64, output: &str) {
        self.last_results.lock().insert(user_id, output.to_string());
    }

    pub fn last_result(&self, user_id: i64) -> Option<String> {
        self.last_results.lock().get(&user_id).cloned()
    }
}
