//! Client-side session layer
//!
//! Maintains an ordered, append-only view of a session's messages with
//! optimistic entries, reconciles it against server-confirmed state (a
//! single reply or a frame stream), and supersedes in-flight streaming
//! exchanges with silent cancellation.

mod http;
mod log;
mod stream;

pub use http::GameClient;
pub use log::{ExchangePhase, ExchangeTicket, LogEntry, SessionLog};
pub use stream::drive_stream;

use thiserror::Error;

/// Errors surfaced by the client layer.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Only one exchange may be in flight per session; a new submission
    /// while one is pending is rejected at the boundary, not queued.
    #[error("an exchange is already in flight for this session")]
    ExchangeInFlight,
    #[error("no session is attached")]
    NoSession,
    /// A structured rejection from the server's error envelope.
    #[error("{message} ({code})")]
    Server {
        code: String,
        message: String,
        request_id: String,
    },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}
