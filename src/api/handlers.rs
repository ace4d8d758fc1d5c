//! HTTP request handlers

use super::stream::stream_response;
use super::types::{
    AskRequest, CreateSessionRequest, ErrorDetail, ErrorEnvelope, MessageListResponse,
    QuitResponse, SessionListResponse, SessionResponse,
};
use super::AppState;
use crate::db::{SoupType, User};
use crate::engine::EngineError;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Session listing and creation
        .route("/api/sessions", get(list_sessions).post(create_session))
        // Session retrieval
        .route("/api/sessions/:id", get(get_session))
        // Transcript reads and question submission (the exchange)
        .route(
            "/api/sessions/:id/messages",
            get(list_messages).post(post_question),
        )
        // Lifecycle transitions
        .route("/api/sessions/:id/reveal", post(reveal_session))
        .route("/api/sessions/:id/quit", post(quit_session))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Identity
// ============================================================

/// Resolve the caller from the opaque `X-External-Id` header, creating the
/// user record on first sight.
async fn require_user(state: &AppState, headers: &HeaderMap) -> Result<User, ApiError> {
    let external_id = headers
        .get("x-external-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized, "Missing or invalid X-External-Id"))?;

    state
        .users
        .resolve(external_id)
        .await
        .map_err(|e| ApiError::new(ErrorCode::Internal, format!("Failed to resolve user: {e}")))
}

// ============================================================
// Sessions
// ============================================================

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<u32>,
}

async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<SessionListResponse>, ApiError> {
    let user = require_user(&state, &headers).await?;
    let limit = query.limit.unwrap_or(50).min(100);
    let items = state.engine.sessions_for(&user, limit).await?;
    Ok(Json(SessionListResponse { items }))
}

async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let user = require_user(&state, &headers).await?;

    let soup_type: SoupType = req
        .soup_type
        .parse()
        .map_err(|_| ApiError::new(ErrorCode::InvalidArgument, "Invalid soup_type"))?;

    let (session, puzzle) = state
        .engine
        .open_session(&user, soup_type, req.difficulty)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse { session, puzzle }),
    ))
}

async fn get_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let user = require_user(&state, &headers).await?;
    let (session, puzzle) = state.engine.session_detail(&user, &id).await?;
    Ok(Json(SessionResponse { session, puzzle }))
}

async fn list_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<MessageListResponse>, ApiError> {
    let user = require_user(&state, &headers).await?;
    let limit = query.limit.unwrap_or(100).min(100) as usize;

    let mut items = state.engine.transcript(&user, &id).await?;
    items.truncate(limit);
    Ok(Json(MessageListResponse { items }))
}

// ============================================================
// The exchange
// ============================================================

/// Submit a question. Validation failures are reported as a plain error
/// response before anything is written; after that, delivery follows the
/// requested mode: a single JSON reply, or the frame sequence over a
/// long-lived body.
async fn post_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<AskRequest>,
) -> Result<Response, ApiError> {
    let user = require_user(&state, &headers).await?;
    let content = req.content.unwrap_or_default();

    let exchange = state.engine.prepare(&user, &id, &content).await?;

    if req.stream {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let engine = state.engine.clone();
        tokio::spawn(async move {
            engine.submit_question_streamed(exchange, tx).await;
        });
        Ok(stream_response(rx))
    } else {
        let reply = state.engine.submit_question(exchange).await?;
        Ok(Json(reply).into_response())
    }
}

// ============================================================
// Lifecycle
// ============================================================

async fn reveal_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let user = require_user(&state, &headers).await?;
    let (session, puzzle) = state.engine.reveal(&user, &id).await?;
    Ok(Json(SessionResponse { session, puzzle }))
}

async fn quit_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<QuitResponse>, ApiError> {
    let user = require_user(&state, &headers).await?;
    let session = state.engine.quit(&user, &id).await?;
    Ok(Json(QuitResponse { session }))
}

// ============================================================
// Version
// ============================================================

async fn get_version() -> &'static str {
    concat!("turtle-soup ", env!("CARGO_PKG_VERSION"))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorCode {
    Unauthorized,
    InvalidArgument,
    NotFound,
    Forbidden,
    IllegalState,
    JudgeUnavailable,
    Internal,
}

impl ErrorCode {
    fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::IllegalState => "ILLEGAL_STATE",
            ErrorCode::JudgeUnavailable => "JUDGE_UNAVAILABLE",
            ErrorCode::Internal => "INTERNAL",
        }
    }

    fn status(self) -> StatusCode {
        match self {
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::IllegalState => StatusCode::CONFLICT,
            ErrorCode::JudgeUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

struct ApiError {
    code: ErrorCode,
    message: String,
}

impl ApiError {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let code = match &e {
            EngineError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            EngineError::NotFound(_) => ErrorCode::NotFound,
            EngineError::Forbidden(_) => ErrorCode::Forbidden,
            EngineError::IllegalState(_) => ErrorCode::IllegalState,
            EngineError::JudgeUnavailable(_) => ErrorCode::JudgeUnavailable,
            EngineError::Internal(_) => ErrorCode::Internal,
        };
        Self::new(code, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = new_request_id();
        tracing::debug!(
            code = self.code.as_str(),
            request_id = %request_id,
            message = %self.message,
            "Request rejected"
        );

        let body = Json(ErrorEnvelope {
            error: ErrorDetail {
                code: self.code.as_str().to_string(),
                message: self.message,
                request_id,
            },
        });
        (self.code.status(), body).into_response()
    }
}

/// Correlation identifier unique per request, carried in every error
/// envelope.
fn new_request_id() -> String {
    format!(
        "req_{:08x}{:04x}",
        rand::random::<u32>(),
        rand::random::<u16>()
    )
}
