//! Google Gemini judge implementation

use super::{AnswerCategory, Judge, JudgeError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MODEL_API_NAME: &str = "gemini-3.0-flash";
const MODEL_ID: &str = "gemini-3-flash";

/// Gemini-backed judge.
///
/// Sends the scenario's two texts plus the player's question to
/// `generateContent` with a host-role instruction that demands a strict JSON
/// answer, then parses the reply leniently.
pub struct GeminiJudge {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiJudge {
    pub fn new(api_key: String, gateway: Option<&str>) -> Self {
        let base_url = match gateway {
            Some(gw) => format!(
                "{}/gemini/v1/models/{}-latest:generateContent",
                gw.trim_end_matches('/'),
                MODEL_API_NAME
            ),
            None => format!(
                "https://generativelanguage.googleapis.com/v1/models/{}-latest:generateContent",
                MODEL_API_NAME
            ),
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_key,
            base_url,
        }
    }

    fn build_request(question: &str, surface: &str, bottom: &str) -> GeminiRequest {
        let instruction = "You are the host of a lateral-thinking puzzle game. \
             Players ask closed-form questions about a hidden scenario and you answer \
             from the full solution. You must output exactly one JSON object of the form \
             {\"answer_type\": \"YES\" | \"NO\" | \"IRRELEVANT\" | \"BOTH\"} and nothing else.\n\
             Rules:\n\
             - YES: the guess is correct or consistent with the solution.\n\
             - NO: the guess is wrong or contradicts the solution.\n\
             - IRRELEVANT: the question has no bearing on the solution.\n\
             - BOTH: the guess is partly right and partly wrong, or the situation is mixed.";

        let prompt = format!(
            "Solution (hidden from the player): {bottom}\n\
             Scenario (visible to the player): {surface}\n\
             Player question: {question}"
        );

        GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart {
                    text: prompt,
                }],
            }],
            system_instruction: Some(GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: instruction.to_string(),
                }],
            }),
            generation_config: Some(GeminiGenerationConfig {
                max_output_tokens: Some(64),
                temperature: Some(0.0),
            }),
        }
    }

    fn classify_error(status: reqwest::StatusCode, body: &str) -> JudgeError {
        match status.as_u16() {
            401 | 403 => JudgeError::auth(format!("Authentication failed: {body}")),
            429 => JudgeError::rate_limit(format!("Rate limited: {body}")),
            400 => JudgeError::invalid_request(format!("Invalid request: {body}")),
            500..=599 => JudgeError::server_error(format!("Server error: {body}")),
            _ => JudgeError::unknown(format!("HTTP {status}: {body}")),
        }
    }

    /// Pull the reply text out of the first candidate, then map it onto a
    /// category: strict `{"answer_type": ...}` JSON first, keyword fallback
    /// second.
    fn parse_answer(response: &GeminiResponse) -> Result<AnswerCategory, JudgeError> {
        let text = response
            .candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(JudgeError::bad_answer("Judge returned an empty reply"));
        }

        if let Ok(verdict) = serde_json::from_str::<GeminiVerdict>(text.trim()) {
            if let Some(category) = AnswerCategory::parse_lenient(&verdict.answer_type) {
                return Ok(category);
            }
        }

        AnswerCategory::parse_lenient(&text).ok_or_else(|| {
            JudgeError::bad_answer(format!("Judge reply was not a recognized answer: {text}"))
        })
    }
}

#[async_trait]
impl Judge for GeminiJudge {
    async fn classify(
        &self,
        question: &str,
        surface: &str,
        bottom: &str,
    ) -> Result<AnswerCategory, JudgeError> {
        if self.api_key.is_empty() {
            return Err(JudgeError::auth("GEMINI_API_KEY is not configured"));
        }

        let request = Self::build_request(question, surface, bottom);

        let response = self
            .client
            .post(&self.base_url)
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    JudgeError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    JudgeError::network(format!("Connection failed: {e}"))
                } else {
                    JudgeError::unknown(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| JudgeError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(Self::classify_error(status, &body));
        }

        let gemini_response: GeminiResponse = serde_json::from_str(&body).map_err(|e| {
            JudgeError::unknown(format!("Failed to parse response: {e} - body: {body}"))
        })?;

        Self::parse_answer(&gemini_response)
    }

    fn model_id(&self) -> &str {
        MODEL_ID
    }
}

// Gemini API types

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

/// The strict reply shape the system instruction demands.
#[derive(Debug, Deserialize)]
struct GeminiVerdict {
    answer_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(text: &str) -> GeminiResponse {
        GeminiResponse {
            candidates: vec![GeminiCandidate {
                content: GeminiContent {
                    role: Some("model".to_string()),
                    parts: vec![GeminiPart {
                        text: text.to_string(),
                    }],
                },
            }],
        }
    }

    #[test]
    fn parses_strict_json_verdict() {
        let response = reply(r#"{"answer_type": "YES"}"#);
        assert_eq!(
            GeminiJudge::parse_answer(&response).unwrap(),
            AnswerCategory::Yes
        );
    }

    #[test]
    fn falls_back_to_keyword_spotting() {
        let response = reply("I would say IRRELEVANT here.");
        assert_eq!(
            GeminiJudge::parse_answer(&response).unwrap(),
            AnswerCategory::Irrelevant
        );
    }

    #[test]
    fn rejects_unrecognizable_replies() {
        let err = GeminiJudge::parse_answer(&reply("perhaps")).unwrap_err();
        assert_eq!(err.kind, super::super::JudgeErrorKind::BadAnswer);

        let err = GeminiJudge::parse_answer(&GeminiResponse { candidates: vec![] }).unwrap_err();
        assert_eq!(err.kind, super::super::JudgeErrorKind::BadAnswer);
    }
}
