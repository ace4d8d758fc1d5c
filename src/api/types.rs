//! API request and response types
//!
//! Responses derive `Deserialize` as well because the bundled game client
//! consumes the same shapes.

use crate::db::{Message, PuzzleView, Session};
use serde::{Deserialize, Serialize};

/// Request to open a new session
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub soup_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<u8>,
}

/// Request to submit a question
#[derive(Debug, Serialize, Deserialize)]
pub struct AskRequest {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub stream: bool,
}

/// Response with a session and its puzzle view
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session: Session,
    pub puzzle: PuzzleView,
}

/// Response with the caller's sessions
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionListResponse {
    pub items: Vec<Session>,
}

/// Response with a session's transcript
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageListResponse {
    pub items: Vec<Message>,
}

/// Response for a quit
#[derive(Debug, Serialize, Deserialize)]
pub struct QuitResponse {
    pub session: Session,
}

/// Error envelope returned on every rejected or failed operation
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorDetail,
}

/// Categorical code, displayable message, and per-request correlation id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    pub request_id: String,
}
