use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::CONFIG;
use crate::db::database::Database;
use crate::utils::http::get_http_client;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub score: f32,
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier endpoint is not configured")]
    NotConfigured,
    #[error("classifier request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("classifier returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("classifier returned no predictions")]
    Empty,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<Prediction, ClassifierError>;
}

/// Text classification over an HF-inference compatible endpoint.
pub struct HttpClassifier {
    endpoint: String,
    api_key: String,
}

impl HttpClassifier {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        HttpClassifier {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    pub fn from_config() -> Self {
        Self::new(
            CONFIG.classifier_endpoint.clone(),
            CONFIG.classifier_api_key.clone(),
        )
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ClassifierResponse {
    Nested(Vec<Vec<Prediction>>),
    Flat(Vec<Prediction>),
}

fn top_prediction(response: ClassifierResponse) -> Option<Prediction> {
    let predictions = match response {
        ClassifierResponse::Nested(batches) => batches.into_iter().next().unwrap_or_default(),
        ClassifierResponse::Flat(predictions) => predictions,
    };
    predictions
        .into_iter()
        .max_by(|a, b| a.score.total_cmp(&b.score))
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, text: &str) -> Result<Prediction, ClassifierError> {
        if self.endpoint.trim().is_empty() {
            return Err(ClassifierError::NotConfigured);
        }

        let mut request = get_http_client()
            .post(&self.endpoint)
            .timeout(Duration::from_secs(15))
            .json(&json!({ "inputs": text }));
        if !self.api_key.trim().is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Status {
                status,
                body: body.chars().take(500).collect(),
            });
        }

        let parsed = response.json::<ClassifierResponse>().await?;
        top_prediction(parsed).ok_or(ClassifierError::Empty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Delete,
    Allow,
}

#[derive(Debug, Clone)]
pub struct SpamPolicy {
    pub label: String,
    pub threshold: f32,
}

impl SpamPolicy {
    pub fn from_config() -> Self {
        SpamPolicy {
            label: CONFIG.spam_label.clone(),
            threshold: CONFIG.spam_threshold,
        }
    }

    pub fn verdict(&self, prediction: &Prediction, enabled: bool) -> Verdict {
        if enabled
            && prediction.label.eq_ignore_ascii_case(&self.label)
            && prediction.score > self.threshold
        {
            Verdict::Delete
        } else {
            Verdict::Allow
        }
    }
}

impl Default for SpamPolicy {
    fn default() -> Self {
        SpamPolicy {
            label: "NEGATIVE".to_string(),
            threshold: 0.9,
        }
    }
}

/// Runs the spam gate for one group message. Allowed messages count towards
/// the sender's activity, deleted ones do not.
#[allow(clippy::too_many_arguments)]
pub async fn moderate_message(
    db: &Database,
    classifier: &dyn Classifier,
    policy: &SpamPolicy,
    spam_filter: bool,
    chat_id: i64,
    user_id: i64,
    display_name: &str,
    text: &str,
) -> Result<Verdict> {
    let verdict = if spam_filter {
        match classifier.classify(text).await {
            Ok(prediction) => {
                debug!(
                    "Classified message in chat {}: label={} score={:.3}",
                    chat_id, prediction.label, prediction.score
                );
                policy.verdict(&prediction, true)
            }
            Err(err) => {
                warn!("Spam classifier failed for chat {}: {}", chat_id, err);
                Verdict::Allow
            }
        }
    } else {
        Verdict::Allow
    };

    if verdict == Verdict::Allow {
        db.record_chat_activity(chat_id, user_id, display_name)
            .await?;
    }
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::database::test_db;

    struct FixedClassifier(Option<Prediction>);

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn classify(&self, _text: &str) -> Result<Prediction, ClassifierError> {
            self.0.clone().ok_or(ClassifierError::Empty)
        }
    }

    fn prediction(label: &str, score: f32) -> Prediction {
        Prediction {
            label: label.to_string(),
            score,
        }
    }

    #[test]
    fn threshold_is_strict_and_label_case_insensitive() {
        let policy = SpamPolicy::default();
        assert_eq!(policy.verdict(&prediction("negative", 0.95), true), Verdict::Delete);
        assert_eq!(policy.verdict(&prediction("NEGATIVE", 0.9), true), Verdict::Allow);
        assert_eq!(policy.verdict(&prediction("POSITIVE", 0.99), true), Verdict::Allow);
        assert_eq!(policy.verdict(&prediction("NEGATIVE", 0.99), false), Verdict::Allow);
    }

    #[test]
    fn top_prediction_handles_both_shapes() {
        let nested: ClassifierResponse = serde_json::from_str(
            r#"[[{"label":"POSITIVE","score":0.1},{"label":"NEGATIVE","score":0.9}]]"#,
        )
        .unwrap();
        assert_eq!(top_prediction(nested), Some(prediction("NEGATIVE", 0.9)));

        let flat: ClassifierResponse =
            serde_json::from_str(r#"[{"label":"POSITIVE","score":0.7}]"#).unwrap();
        assert_eq!(top_prediction(flat), Some(prediction("POSITIVE", 0.7)));

        let empty: ClassifierResponse = serde_json::from_str("[]").unwrap();
        assert_eq!(top_prediction(empty), None);
    }

    #[tokio::test]
    async fn spam_is_deleted_without_counting() {
        let db = test_db().await;
        let classifier = FixedClassifier(Some(prediction("NEGATIVE", 0.95)));
        let verdict = moderate_message(
            &db,
            &classifier,
            &SpamPolicy::default(),
            true,
            -1,
            7,
            "bob",
            "buy now",
        )
        .await
        .unwrap();
        assert_eq!(verdict, Verdict::Delete);
        assert_eq!(db.message_count(-1, 7).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn allowed_messages_increment_by_one() {
        let db = test_db().await;
        let policy = SpamPolicy::default();
        for classifier in [
            FixedClassifier(Some(prediction("POSITIVE", 0.99))),
            FixedClassifier(Some(prediction("NEGATIVE", 0.5))),
            FixedClassifier(None),
        ] {
            let verdict =
                moderate_message(&db, &classifier, &policy, true, -1, 7, "bob", "hello")
                    .await
                    .unwrap();
            assert_eq!(verdict, Verdict::Allow);
        }
        assert_eq!(db.message_count(-1, 7).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn disabled_filter_never_deletes() {
        let db = test_db().await;
        let classifier = FixedClassifier(Some(prediction("NEGATIVE", 0.99)));
        let verdict = moderate_message(
            &db,
            &classifier,
            &SpamPolicy::default(),
            false,
            -1,
            7,
            "bob",
            "anything",
        )
        .await
        .unwrap();
        assert_eq!(verdict, Verdict::Allow);
        assert_eq!(db.message_count(-1, 7).await.unwrap(), 1);
    }
}
