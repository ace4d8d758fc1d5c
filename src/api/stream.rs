//! Streaming delivery of exchange events
//!
//! Lowers engine events onto wire frames and wraps the frame sequence into
//! a long-lived HTTP response body. The body ends when the engine closes the
//! event channel, which happens right after the terminal frame.

use crate::engine::ExchangeEvent;
use crate::judge::AnswerCategory;
use crate::wire::{
    AcceptedPayload, AnswerCompletePayload, AnswerPartialPayload, ErrorPayload, ExchangeFrame,
    Frame,
};
use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

/// Map one engine event onto its wire frame.
pub fn event_frame(event: ExchangeEvent) -> Frame {
    let typed = match event {
        ExchangeEvent::Accepted { user_message } => ExchangeFrame::Accepted(AcceptedPayload {
            user_message_id: user_message.id,
        }),
        ExchangeEvent::AnswerDelta { delta } => {
            ExchangeFrame::AnswerPartial(AnswerPartialPayload { delta })
        }
        ExchangeEvent::AnswerDone { message } => {
            ExchangeFrame::AnswerComplete(AnswerCompletePayload {
                judge_message_id: message.id,
                content: message.content,
                answer_category: message.answer_category.unwrap_or(AnswerCategory::Irrelevant),
            })
        }
        ExchangeEvent::SessionUpdated { session } => {
            ExchangeFrame::SessionUpdated((&session).into())
        }
        ExchangeEvent::Failed { message } => ExchangeFrame::Error(ErrorPayload { message }),
    };
    typed.into_frame()
}

/// Build the streaming response over a running exchange's event channel.
pub fn stream_response(events: mpsc::Receiver<ExchangeEvent>) -> Response {
    let frames = ReceiverStream::new(events)
        .map(|event| Ok::<_, Infallible>(event_frame(event).encode()));

    (
        [
            (header::CONTENT_TYPE, "text/event-stream; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(frames),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SessionSummary;
    use crate::state::SessionStatus;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn events_map_onto_the_protocol_frames() {
        let frame = event_frame(ExchangeEvent::AnswerDelta {
            delta: "Yes.".to_string(),
        });
        assert_eq!(frame.name, "answer.partial");
        assert_eq!(frame.payload, json!({"delta": "Yes."}));

        let frame = event_frame(ExchangeEvent::SessionUpdated {
            session: SessionSummary {
                id: "s1".to_string(),
                question_count: 3,
                status: SessionStatus::Playing,
                updated_at: Utc::now(),
            },
        });
        assert_eq!(frame.name, "session.updated");
        assert_eq!(
            frame.payload,
            json!({"session_id": "s1", "question_count": 3, "status": "PLAYING"})
        );

        let frame = event_frame(ExchangeEvent::Failed {
            message: "boom".to_string(),
        });
        assert_eq!(frame.name, "error");
        assert_eq!(frame.payload, json!({"message": "boom"}));
    }
}
