//! Driving a streamed exchange into the session log
//!
//! Reads the response body chunk by chunk, feeds the frame decoder, and
//! applies every schema-valid frame to the log under the exchange's ticket.
//! Cancellation aborts the read loop without surfacing an error; the stale
//! ticket then shields the log from anything still in flight.

use super::log::{ExchangeTicket, SessionLog};
use crate::wire::{ExchangeFrame, FrameDecoder};
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Pump a byte stream through the frame decoder into the log until the
/// stream ends, fails, or the token is cancelled.
pub async fn drive_stream<S, B, E>(
    mut body: S,
    log: Arc<Mutex<SessionLog>>,
    ticket: ExchangeTicket,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut decoder = FrameDecoder::new();

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                log.lock().unwrap().cancel(ticket);
                return;
            }
            chunk = body.next() => match chunk {
                Some(Ok(bytes)) => {
                    for frame in decoder.feed(bytes.as_ref()) {
                        match ExchangeFrame::try_from(frame) {
                            Ok(typed) => {
                                log.lock().unwrap().apply_frame(ticket, typed);
                            }
                            Err(e) => {
                                tracing::debug!(error = %e, "Skipping frame outside the exchange schema");
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    // A transport error caused by our own abort is not a failure.
                    if !cancel.is_cancelled() {
                        log.lock().unwrap().fail(ticket, &format!("stream failed: {e}"));
                    }
                    return;
                }
                None => {
                    if !cancel.is_cancelled() {
                        log.lock().unwrap().finish(ticket);
                    }
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ExchangePhase;
    use crate::db::SessionSummary;
    use crate::judge::AnswerCategory;
    use crate::state::SessionStatus;
    use crate::wire::{
        AcceptedPayload, AnswerCompletePayload, AnswerPartialPayload, ExchangeFrame,
    };
    use chrono::Utc;
    use std::convert::Infallible;
    use tokio_stream::wrappers::ReceiverStream;

    fn fresh_log() -> Arc<Mutex<SessionLog>> {
        Arc::new(Mutex::new(SessionLog::new(SessionSummary {
            id: "s1".to_string(),
            question_count: 0,
            status: SessionStatus::Playing,
            updated_at: Utc::now(),
        })))
    }

    fn happy_path_wire() -> String {
        [
            ExchangeFrame::Accepted(AcceptedPayload {
                user_message_id: "m1".to_string(),
            }),
            ExchangeFrame::AnswerPartial(AnswerPartialPayload {
                delta: "Yes.".to_string(),
            }),
            ExchangeFrame::AnswerComplete(AnswerCompletePayload {
                judge_message_id: "m2".to_string(),
                content: "Yes.".to_string(),
                answer_category: AnswerCategory::Yes,
            }),
        ]
        .into_iter()
        .map(|f| f.into_frame().encode())
        .collect()
    }

    #[tokio::test]
    async fn applies_frames_from_arbitrarily_chunked_bytes() {
        let log = fresh_log();
        let ticket = log.lock().unwrap().begin_exchange("q").unwrap();

        let wire = happy_path_wire();
        let chunks: Vec<Result<Vec<u8>, Infallible>> = wire
            .as_bytes()
            .chunks(7)
            .map(|c| Ok(c.to_vec()))
            .collect();

        drive_stream(
            futures::stream::iter(chunks),
            log.clone(),
            ticket,
            CancellationToken::new(),
        )
        .await;

        let log = log.lock().unwrap();
        assert_eq!(log.entries()[1].content, "Yes.");
        assert_eq!(log.entries()[1].answer_category, Some(AnswerCategory::Yes));
        assert_eq!(log.phase(), None);
        assert!(log.last_error().is_none());
    }

    #[tokio::test]
    async fn superseded_stream_applies_nothing_and_raises_no_error() {
        let log = fresh_log();
        let first = log.lock().unwrap().begin_exchange("first").unwrap();

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Vec<u8>, Infallible>>(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(drive_stream(
            ReceiverStream::new(rx),
            log.clone(),
            first,
            cancel.clone(),
        ));

        // Supersede: drop the first exchange and start a second, the way the
        // game client does before a new streaming submission.
        {
            let mut log = log.lock().unwrap();
            log.cancel(first);
            log.begin_exchange("second").unwrap();
        }

        // Frames for the superseded exchange keep arriving; the stale ticket
        // must shield the log.
        let stale = ExchangeFrame::AnswerPartial(AnswerPartialPayload {
            delta: "stale answer".to_string(),
        })
        .into_frame()
        .encode();
        tx.send(Ok(stale.into_bytes())).await.unwrap();
        tokio::task::yield_now().await;

        cancel.cancel();
        drop(tx);
        task.await.unwrap();

        let log = log.lock().unwrap();
        // The second exchange's placeholder saw none of the stale content.
        assert_eq!(log.entries()[3].content, "");
        assert_eq!(log.entries()[1].content, "");
        assert!(log.last_error().is_none(), "cancellation must be silent");
        assert_eq!(log.phase(), Some(ExchangePhase::Pending));
    }

    #[tokio::test]
    async fn transport_failure_is_reported() {
        let log = fresh_log();
        let ticket = log.lock().unwrap().begin_exchange("q").unwrap();

        let chunks: Vec<Result<Vec<u8>, String>> =
            vec![Err("connection reset".to_string())];
        drive_stream(
            futures::stream::iter(chunks),
            log.clone(),
            ticket,
            CancellationToken::new(),
        )
        .await;

        let log = log.lock().unwrap();
        assert!(log.last_error().unwrap().contains("connection reset"));
        assert_eq!(log.phase(), None);
    }
}
