//! Judge capability abstraction
//!
//! The judge classifies a player's question against the hidden scenario and
//! answers with one of a fixed, closed set of categories. The trait keeps the
//! engine independent of the concrete classifier so tests can script answers.

mod gemini;

pub use gemini::GeminiJudge;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// The closed set of answers a judge may give.
///
/// This enumeration is fixed by the rules of the game and is never extended
/// at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnswerCategory {
    Yes,
    No,
    Irrelevant,
    Both,
}

impl AnswerCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            AnswerCategory::Yes => "YES",
            AnswerCategory::No => "NO",
            AnswerCategory::Irrelevant => "IRRELEVANT",
            AnswerCategory::Both => "BOTH",
        }
    }

    /// Fixed display text shown to the player for each category.
    pub fn display_text(self) -> &'static str {
        match self {
            AnswerCategory::Yes => "Yes.",
            AnswerCategory::No => "No.",
            AnswerCategory::Irrelevant => "Doesn't matter.",
            AnswerCategory::Both => "Yes and no.",
        }
    }

    /// Parse a judge's raw reply into a category.
    ///
    /// Accepts an exact category token first, then falls back to keyword
    /// spotting for judges that wrap the token in prose. `BOTH` and
    /// `IRRELEVANT` are checked before `YES`/`NO` because their spellings
    /// contain neither.
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        let upper = raw.trim().to_uppercase();
        match upper.as_str() {
            "YES" => return Some(AnswerCategory::Yes),
            "NO" => return Some(AnswerCategory::No),
            "IRRELEVANT" => return Some(AnswerCategory::Irrelevant),
            "BOTH" => return Some(AnswerCategory::Both),
            _ => {}
        }
        if upper.contains("BOTH") {
            Some(AnswerCategory::Both)
        } else if upper.contains("IRRELEVANT") {
            Some(AnswerCategory::Irrelevant)
        } else if upper.contains("YES") {
            Some(AnswerCategory::Yes)
        } else if upper.contains("NO") {
            Some(AnswerCategory::No)
        } else {
            None
        }
    }
}

impl fmt::Display for AnswerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Judge error with classification
#[derive(Debug, Error)]
#[error("{message}")]
pub struct JudgeError {
    pub kind: JudgeErrorKind,
    pub message: String,
}

impl JudgeError {
    pub fn new(kind: JudgeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(JudgeErrorKind::Network, message)
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::new(JudgeErrorKind::RateLimit, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(JudgeErrorKind::ServerError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(JudgeErrorKind::Auth, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(JudgeErrorKind::InvalidRequest, message)
    }

    pub fn bad_answer(message: impl Into<String>) -> Self {
        Self::new(JudgeErrorKind::BadAnswer, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(JudgeErrorKind::Unknown, message)
    }
}

/// Error classification for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgeErrorKind {
    /// Network issues, timeouts - retryable
    Network,
    /// Rate limited (429) - retryable with backoff
    RateLimit,
    /// Server error (5xx) - retryable
    ServerError,
    /// Authentication failed (401, 403) - not retryable
    Auth,
    /// Bad request (400) - not retryable
    InvalidRequest,
    /// The judge replied with something outside the answer set - retryable
    BadAnswer,
    /// Unknown error
    Unknown,
}

impl JudgeErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network | Self::RateLimit | Self::ServerError | Self::BadAnswer
        )
    }
}

/// Common interface for answer classifiers.
///
/// A judge has no side effects on session state; it only maps a question plus
/// the scenario's two texts onto a category.
#[async_trait]
pub trait Judge: Send + Sync {
    /// Classify one question against the scenario.
    async fn classify(
        &self,
        question: &str,
        surface: &str,
        bottom: &str,
    ) -> Result<AnswerCategory, JudgeError>;

    /// Identifier of the underlying model, for logging.
    fn model_id(&self) -> &str;
}

#[async_trait]
impl<T: Judge + ?Sized> Judge for Arc<T> {
    async fn classify(
        &self,
        question: &str,
        surface: &str,
        bottom: &str,
    ) -> Result<AnswerCategory, JudgeError> {
        (**self).classify(question, surface, bottom).await
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }
}

/// Logging wrapper for judges
pub struct LoggingJudge {
    inner: Arc<dyn Judge>,
    model_id: String,
}

impl LoggingJudge {
    pub fn new(inner: Arc<dyn Judge>) -> Self {
        let model_id = inner.model_id().to_string();
        Self { inner, model_id }
    }
}

#[async_trait]
impl Judge for LoggingJudge {
    async fn classify(
        &self,
        question: &str,
        surface: &str,
        bottom: &str,
    ) -> Result<AnswerCategory, JudgeError> {
        let start = std::time::Instant::now();
        let result = self.inner.classify(question, surface, bottom).await;
        let duration = start.elapsed();

        match &result {
            Ok(category) => {
                tracing::info!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    category = %category,
                    "Judge classified question"
                );
            }
            Err(e) => {
                tracing::error!(
                    model = %self.model_id,
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    retryable = e.kind.is_retryable(),
                    "Judge call failed"
                );
            }
        }

        result
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// Judge configuration sourced from the environment
#[derive(Debug, Clone, Default)]
pub struct JudgeConfig {
    /// API key for the Gemini backend
    pub gemini_api_key: Option<String>,
    /// Optional LLM gateway base URL, routed through instead of the public API
    pub gateway: Option<String>,
}

impl JudgeConfig {
    pub fn from_env() -> Self {
        Self {
            gemini_api_key: std::env::var("GEMINI_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            gateway: std::env::var("LLM_GATEWAY").ok().filter(|g| !g.is_empty()),
        }
    }

    pub fn has_judge(&self) -> bool {
        self.gemini_api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenient_parse_accepts_exact_tokens() {
        assert_eq!(
            AnswerCategory::parse_lenient("YES"),
            Some(AnswerCategory::Yes)
        );
        assert_eq!(
            AnswerCategory::parse_lenient(" no "),
            Some(AnswerCategory::No)
        );
        assert_eq!(
            AnswerCategory::parse_lenient("irrelevant"),
            Some(AnswerCategory::Irrelevant)
        );
        assert_eq!(
            AnswerCategory::parse_lenient("Both"),
            Some(AnswerCategory::Both)
        );
    }

    #[test]
    fn lenient_parse_spots_keywords_in_prose() {
        assert_eq!(
            AnswerCategory::parse_lenient("The answer is BOTH, partially."),
            Some(AnswerCategory::Both)
        );
        // "NO" appears inside "NOT", so YES must win when both occur.
        assert_eq!(
            AnswerCategory::parse_lenient("yes, that is not wrong"),
            Some(AnswerCategory::Yes)
        );
        assert_eq!(AnswerCategory::parse_lenient("maybe?"), None);
    }

    #[test]
    fn display_text_is_fixed_per_category() {
        assert_eq!(AnswerCategory::Yes.display_text(), "Yes.");
        assert_eq!(AnswerCategory::Both.display_text(), "Yes and no.");
    }

    #[test]
    fn retryable_kinds() {
        assert!(JudgeErrorKind::Network.is_retryable());
        assert!(JudgeErrorKind::BadAnswer.is_retryable());
        assert!(!JudgeErrorKind::Auth.is_retryable());
        assert!(!JudgeErrorKind::InvalidRequest.is_retryable());
    }
}
