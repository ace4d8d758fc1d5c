//! Stream wire format for incremental exchange delivery
//!
//! A frame is a named, data-carrying unit. On the wire it is UTF-8 text: one
//! `event:` line naming the frame, one or more `data:` lines carrying the
//! payload, and a blank line terminating the frame. Payloads are serialized
//! as JSON; a decoder that cannot parse a payload as JSON passes it through
//! as opaque text instead of failing.
//!
//! The decoder is incremental: it accepts bytes in arbitrary-sized chunks
//! (a chunk may even split a multi-byte UTF-8 scalar) and yields complete
//! frames as they become available, buffering the rest.

#[cfg(test)]
mod proptests;

use crate::db::{SessionStatus, SessionSummary};
use crate::judge::AnswerCategory;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Frame name for the acceptance of a submitted question.
pub const FRAME_ACCEPTED: &str = "exchange.accepted";
/// Frame name for an incremental fragment of the answer text.
pub const FRAME_ANSWER_PARTIAL: &str = "answer.partial";
/// Frame name for the finished, persisted answer.
pub const FRAME_ANSWER_COMPLETE: &str = "answer.complete";
/// Frame name for the refreshed session counters.
pub const FRAME_SESSION_UPDATED: &str = "session.updated";
/// Frame name for a terminal failure.
pub const FRAME_ERROR: &str = "error";

/// Frame name used when a block arrives without an `event:` line.
const DEFAULT_FRAME_NAME: &str = "message";

/// One named, data-carrying unit of the stream protocol.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub name: String,
    pub payload: Value,
}

impl Frame {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Encode the frame into its wire text, including the terminating blank
    /// line. The payload serializes to a single JSON line, but multi-line
    /// bodies are emitted as one `data:` line each so the decoder's join
    /// rule round-trips them.
    pub fn encode(&self) -> String {
        let body = self.payload.to_string();
        let mut out = String::with_capacity(body.len() + self.name.len() + 16);
        out.push_str("event: ");
        out.push_str(&self.name);
        out.push('\n');
        for line in body.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

/// Incremental frame decoder.
///
/// Feed it raw bytes as they arrive; it returns every frame completed by the
/// chunk. Frame boundaries never have to align with chunk boundaries.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one chunk and return the frames it completed, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(end) = find_blank_line(&self.buf) {
            let block: Vec<u8> = self.buf.drain(..end + 2).collect();
            let text = String::from_utf8_lossy(&block);
            if let Some(frame) = parse_block(&text) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Bytes held back waiting for a frame terminator.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn find_blank_line(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

/// Parse one terminated block into a frame.
///
/// A block with no `data:` lines carries nothing and is dropped. A block
/// with no `event:` line gets the default name. Payload data lines are
/// joined with `\n` and parsed as JSON, degrading to opaque text.
fn parse_block(block: &str) -> Option<Frame> {
    let mut name = DEFAULT_FRAME_NAME.to_string();
    let mut data = String::new();

    for line in block.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            name = rest.trim().to_string();
        } else if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.trim());
        }
    }

    if data.is_empty() {
        return None;
    }

    let payload = serde_json::from_str(&data).unwrap_or(Value::String(data));
    Some(Frame::new(name, payload))
}

// ============================================================
// Typed frame boundary
// ============================================================

/// Payload of `exchange.accepted`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedPayload {
    pub user_message_id: String,
}

/// Payload of `answer.partial`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerPartialPayload {
    pub delta: String,
}

/// Payload of `answer.complete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerCompletePayload {
    pub judge_message_id: String,
    pub content: String,
    pub answer_category: AnswerCategory,
}

/// Payload of `session.updated`. Fields the producer did not include stay
/// `None` and are left untouched by the consumer's merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUpdatedPayload {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
}

impl From<&SessionSummary> for SessionUpdatedPayload {
    fn from(summary: &SessionSummary) -> Self {
        Self {
            session_id: summary.id.clone(),
            question_count: Some(summary.question_count),
            status: Some(summary.status),
        }
    }
}

/// Payload of `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// A frame validated against the exchange protocol's schema.
///
/// Consumers validate once at this boundary and operate on typed values
/// from then on.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeFrame {
    Accepted(AcceptedPayload),
    AnswerPartial(AnswerPartialPayload),
    AnswerComplete(AnswerCompletePayload),
    SessionUpdated(SessionUpdatedPayload),
    Error(ErrorPayload),
}

impl ExchangeFrame {
    pub fn name(&self) -> &'static str {
        match self {
            ExchangeFrame::Accepted(_) => FRAME_ACCEPTED,
            ExchangeFrame::AnswerPartial(_) => FRAME_ANSWER_PARTIAL,
            ExchangeFrame::AnswerComplete(_) => FRAME_ANSWER_COMPLETE,
            ExchangeFrame::SessionUpdated(_) => FRAME_SESSION_UPDATED,
            ExchangeFrame::Error(_) => FRAME_ERROR,
        }
    }

    /// Lower the typed frame onto the generic wire representation.
    pub fn into_frame(self) -> Frame {
        let name = self.name();
        let payload = match self {
            ExchangeFrame::Accepted(p) => serde_json::to_value(p),
            ExchangeFrame::AnswerPartial(p) => serde_json::to_value(p),
            ExchangeFrame::AnswerComplete(p) => serde_json::to_value(p),
            ExchangeFrame::SessionUpdated(p) => serde_json::to_value(p),
            ExchangeFrame::Error(p) => serde_json::to_value(p),
        }
        .unwrap_or(Value::Null);
        Frame::new(name, payload)
    }
}

/// Why a wire frame failed schema validation.
#[derive(Debug, Error)]
pub enum FrameSchemaError {
    #[error("unknown frame name: {0}")]
    UnknownName(String),
    #[error("invalid {name} payload: {source}")]
    Payload {
        name: &'static str,
        source: serde_json::Error,
    },
}

impl TryFrom<Frame> for ExchangeFrame {
    type Error = FrameSchemaError;

    fn try_from(frame: Frame) -> Result<Self, <Self as TryFrom<Frame>>::Error> {
        fn payload<T: serde::de::DeserializeOwned>(
            name: &'static str,
            value: Value,
        ) -> Result<T, FrameSchemaError> {
            serde_json::from_value(value).map_err(|source| FrameSchemaError::Payload { name, source })
        }

        match frame.name.as_str() {
            FRAME_ACCEPTED => Ok(ExchangeFrame::Accepted(payload(
                FRAME_ACCEPTED,
                frame.payload,
            )?)),
            FRAME_ANSWER_PARTIAL => Ok(ExchangeFrame::AnswerPartial(payload(
                FRAME_ANSWER_PARTIAL,
                frame.payload,
            )?)),
            FRAME_ANSWER_COMPLETE => Ok(ExchangeFrame::AnswerComplete(payload(
                FRAME_ANSWER_COMPLETE,
                frame.payload,
            )?)),
            FRAME_SESSION_UPDATED => Ok(ExchangeFrame::SessionUpdated(payload(
                FRAME_SESSION_UPDATED,
                frame.payload,
            )?)),
            FRAME_ERROR => Ok(ExchangeFrame::Error(payload(FRAME_ERROR, frame.payload)?)),
            other => Err(FrameSchemaError::UnknownName(other.to_string())),
        }
    }
}
