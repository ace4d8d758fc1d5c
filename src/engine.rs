//! Exchange protocol engine
//!
//! Coordinates one question/answer exchange at a time for a session: it
//! validates the request against the session state machine, persists the
//! player's question, asks the judge, persists the answer, and advances the
//! question counter. The same engine serves both delivery modes; streaming
//! callers receive the intermediate events over a channel, synchronous
//! callers get the assembled reply.

mod traits;

#[cfg(test)]
pub mod testing;

pub use traits::{
    DatabaseStore, DbUserDirectory, SessionStore, StoreError, UserDirectory,
};

use crate::db::{
    Message, MessageRole, Puzzle, PuzzleView, Session, SessionStatus, SessionSummary, SoupType,
    User,
};
use crate::judge::Judge;
use crate::state::{self, PlayerAction, StateError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Type alias for the production engine with concrete collaborators
pub type ProductionEngine = ExchangeEngine<DatabaseStore, Arc<dyn Judge>>;

/// Errors surfaced to callers of the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    IllegalState(String),
    #[error("The judge is unavailable: {0}")]
    JudgeUnavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(msg) => EngineError::NotFound(msg),
            StoreError::InvalidState(msg) => EngineError::IllegalState(msg),
            StoreError::Internal(msg) => EngineError::Internal(msg),
        }
    }
}

impl From<StateError> for EngineError {
    fn from(e: StateError) -> Self {
        EngineError::IllegalState(e.to_string())
    }
}

/// One validated exchange: the question plus the session and puzzle snapshot
/// it will be answered against. Held only for the duration of the exchange.
#[derive(Debug)]
pub struct Exchange {
    session: Session,
    puzzle: Puzzle,
    question: String,
}

impl Exchange {
    pub fn session_id(&self) -> &str {
        &self.session.id
    }
}

/// Events emitted while an exchange runs, in emission order.
#[derive(Debug, Clone)]
pub enum ExchangeEvent {
    /// The question was persisted; carries the authoritative USER message.
    Accepted { user_message: Message },
    /// An incremental fragment of the answer text.
    AnswerDelta { delta: String },
    /// The answer was persisted; carries the authoritative JUDGE message.
    AnswerDone { message: Message },
    /// The counters were refreshed after the exchange completed.
    SessionUpdated { session: SessionSummary },
    /// The exchange failed after acceptance; terminal.
    Failed { message: String },
}

/// The assembled outcome of a completed exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeReply {
    pub user_message: Message,
    pub judge_message: Message,
    /// Refreshed counters; absent when the post-exchange refresh failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionSummary>,
}

/// Destination for exchange events. Synchronous callers run silent;
/// streaming callers forward into a channel. Sends are best-effort: a
/// consumer that has gone away must not abort the exchange.
enum EventSink {
    Silent,
    Channel(mpsc::Sender<ExchangeEvent>),
}

impl EventSink {
    async fn emit(&self, event: ExchangeEvent) {
        if let EventSink::Channel(tx) = self {
            let _ = tx.send(event).await;
        }
    }
}

/// The exchange protocol engine.
pub struct ExchangeEngine<S, J> {
    store: S,
    judge: J,
}

impl<S: SessionStore, J: Judge> ExchangeEngine<S, J> {
    pub fn new(store: S, judge: J) -> Self {
        Self { store, judge }
    }

    // ==================== Session lifecycle ====================

    /// Open a new session: deal a random active puzzle of the requested soup
    /// type and create a PLAYING session against it.
    pub async fn open_session(
        &self,
        user: &User,
        soup_type: SoupType,
        difficulty: Option<u8>,
    ) -> Result<(Session, PuzzleView), EngineError> {
        let puzzle = self.store.pick_random_puzzle(soup_type, difficulty).await?;
        let title = format!("Turtle Soup · {}", puzzle.title);
        let session = self
            .store
            .create_session(&user.id, &puzzle, Some(&title))
            .await?;

        tracing::info!(
            session_id = %session.id,
            puzzle_id = %puzzle.id,
            soup_type = %soup_type,
            "Opened session"
        );
        Ok((session, puzzle.public_view()))
    }

    /// Fetch a session with its puzzle view. The solution text is included
    /// only once the session has been revealed.
    pub async fn session_detail(
        &self,
        user: &User,
        session_id: &str,
    ) -> Result<(Session, PuzzleView), EngineError> {
        let session = self.owned_session(user, session_id).await?;
        let puzzle = self.puzzle_for(&session).await?;
        let view = if session.status == SessionStatus::Revealed {
            puzzle.revealed_view()
        } else {
            puzzle.public_view()
        };
        Ok((session, view))
    }

    /// List the caller's sessions, newest first.
    pub async fn sessions_for(
        &self,
        user: &User,
        limit: u32,
    ) -> Result<Vec<Session>, EngineError> {
        Ok(self.store.list_sessions_for_user(&user.id, limit).await?)
    }

    /// The session's ordered transcript.
    pub async fn transcript(
        &self,
        user: &User,
        session_id: &str,
    ) -> Result<Vec<Message>, EngineError> {
        let session = self.owned_session(user, session_id).await?;
        Ok(self.store.list_messages(&session.id).await?)
    }

    /// Expose the solution and end the game. Legal only from PLAYING.
    pub async fn reveal(
        &self,
        user: &User,
        session_id: &str,
    ) -> Result<(Session, PuzzleView), EngineError> {
        let session = self.owned_session(user, session_id).await?;
        state::transition(session.status, PlayerAction::Reveal)?;

        let updated = self
            .store
            .set_session_status(&session.id, SessionStatus::Revealed)
            .await?;
        let puzzle = self.puzzle_for(&updated).await?;

        tracing::info!(session_id = %updated.id, "Session revealed");
        Ok((updated, puzzle.revealed_view()))
    }

    /// Abandon the game without revealing. Legal only from PLAYING.
    pub async fn quit(&self, user: &User, session_id: &str) -> Result<Session, EngineError> {
        let session = self.owned_session(user, session_id).await?;
        state::transition(session.status, PlayerAction::Quit)?;

        let updated = self
            .store
            .set_session_status(&session.id, SessionStatus::Quit)
            .await?;

        tracing::info!(session_id = %updated.id, "Session quit");
        Ok(updated)
    }

    // ==================== The exchange ====================

    /// Validate a question submission. Everything that can be rejected is
    /// rejected here, before any write: ownership, the PLAYING guard, the
    /// non-empty question, and puzzle resolution.
    pub async fn prepare(
        &self,
        user: &User,
        session_id: &str,
        question: &str,
    ) -> Result<Exchange, EngineError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(EngineError::InvalidArgument(
                "content is required".to_string(),
            ));
        }

        let session = self.owned_session(user, session_id).await?;
        state::transition(session.status, PlayerAction::Ask)?;
        let puzzle = self.puzzle_for(&session).await?;

        Ok(Exchange {
            session,
            puzzle,
            question: question.to_string(),
        })
    }

    /// Run a prepared exchange and return the assembled reply.
    pub async fn submit_question(&self, exchange: Exchange) -> Result<ExchangeReply, EngineError> {
        self.execute(&exchange, &EventSink::Silent).await
    }

    /// Run a prepared exchange, forwarding events into the channel as each
    /// step lands. A failure after acceptance becomes a terminal `Failed`
    /// event; the channel closes when this returns.
    pub async fn submit_question_streamed(
        &self,
        exchange: Exchange,
        events: mpsc::Sender<ExchangeEvent>,
    ) {
        let sink = EventSink::Channel(events.clone());
        if let Err(e) = self.execute(&exchange, &sink).await {
            tracing::warn!(
                session_id = %exchange.session.id,
                error = %e,
                "Streamed exchange failed"
            );
            let _ = events
                .send(ExchangeEvent::Failed {
                    message: e.to_string(),
                })
                .await;
        }
    }

    /// The six sequential steps of one exchange.
    ///
    /// If the judge fails, the already-persisted USER message is retained
    /// and neither a JUDGE message nor a counter increment happens; callers
    /// may resubmit the same question.
    async fn execute(
        &self,
        exchange: &Exchange,
        sink: &EventSink,
    ) -> Result<ExchangeReply, EngineError> {
        let session_id = &exchange.session.id;

        let user_message = self
            .store
            .append_message(session_id, MessageRole::User, &exchange.question, None)
            .await
            .map_err(|e| EngineError::Internal(format!("failed to save question: {e}")))?;
        sink.emit(ExchangeEvent::Accepted {
            user_message: user_message.clone(),
        })
        .await;

        let category = self
            .judge
            .classify(
                &exchange.question,
                &exchange.puzzle.surface,
                &exchange.puzzle.bottom,
            )
            .await
            .map_err(|e| EngineError::JudgeUnavailable(e.to_string()))?;

        let answer_text = category.display_text();
        sink.emit(ExchangeEvent::AnswerDelta {
            delta: answer_text.to_string(),
        })
        .await;

        let judge_message = self
            .store
            .append_message(session_id, MessageRole::Judge, answer_text, Some(category))
            .await
            .map_err(|e| EngineError::Internal(format!("failed to save answer: {e}")))?;
        sink.emit(ExchangeEvent::AnswerDone {
            message: judge_message.clone(),
        })
        .await;

        self.store
            .increment_question_count(session_id)
            .await
            .map_err(|e| {
                EngineError::Internal(format!("failed to advance question counter: {e}"))
            })?;

        // The refresh is best-effort: on failure the reply simply omits the
        // summary and the stream omits `session.updated`.
        let session = match self.store.get_session(session_id).await {
            Ok(session) => {
                let summary = session.summary();
                sink.emit(ExchangeEvent::SessionUpdated {
                    session: summary.clone(),
                })
                .await;
                Some(summary)
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %session_id,
                    error = %e,
                    "Failed to refresh session after exchange"
                );
                None
            }
        };

        Ok(ExchangeReply {
            user_message,
            judge_message,
            session,
        })
    }

    // ==================== Helpers ====================

    async fn owned_session(&self, user: &User, session_id: &str) -> Result<Session, EngineError> {
        let session = self.store.get_session(session_id).await?;
        if session.user_id != user.id {
            return Err(EngineError::Forbidden("Not your session".to_string()));
        }
        Ok(session)
    }

    /// A session's puzzle must exist; a dangling reference is an internal
    /// inconsistency, not a caller error.
    async fn puzzle_for(&self, session: &Session) -> Result<Puzzle, EngineError> {
        self.store
            .get_puzzle(&session.puzzle_id)
            .await
            .map_err(|e| EngineError::Internal(format!("puzzle missing for session: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{harness, harness_with_judge, ScriptedJudge, SECRET_BOTTOM};
    use super::*;
    use crate::judge::{AnswerCategory, JudgeError};

    #[tokio::test]
    async fn completed_exchanges_advance_the_counter_once_each() {
        let t = harness(AnswerCategory::Yes);

        for round in 1..=3i64 {
            let exchange = t
                .engine
                .prepare(&t.user, &t.session.id, "Was he at sea?")
                .await
                .unwrap();
            let reply = t.engine.submit_question(exchange).await.unwrap();
            assert_eq!(reply.session.as_ref().unwrap().question_count, round);
        }

        // The streamed mode counts identically.
        let exchange = t
            .engine
            .prepare(&t.user, &t.session.id, "Did he know?")
            .await
            .unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        t.engine.submit_question_streamed(exchange, tx).await;
        while rx.recv().await.is_some() {}

        let session = t.db.get_session(&t.session.id).unwrap();
        assert_eq!(session.question_count, 4);
    }

    #[tokio::test]
    async fn streamed_exchange_emits_frames_in_order() {
        let t = harness(AnswerCategory::Yes);
        let exchange = t
            .engine
            .prepare(&t.user, &t.session.id, "Was it albatross?")
            .await
            .unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        t.engine.submit_question_streamed(exchange, tx).await;

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], ExchangeEvent::Accepted { .. }));
        match &events[1] {
            ExchangeEvent::AnswerDelta { delta } => assert_eq!(delta, "Yes."),
            other => panic!("expected delta, got {other:?}"),
        }
        match &events[2] {
            ExchangeEvent::AnswerDone { message } => {
                assert_eq!(message.answer_category, Some(AnswerCategory::Yes));
            }
            other => panic!("expected done, got {other:?}"),
        }
        match &events[3] {
            ExchangeEvent::SessionUpdated { session } => {
                assert_eq!(session.question_count, 1);
            }
            other => panic!("expected session update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn judge_failure_leaves_resumable_partial_state() {
        let t = harness_with_judge(ScriptedJudge::failing());
        let exchange = t
            .engine
            .prepare(&t.user, &t.session.id, "Was he alone?")
            .await
            .unwrap();

        let err = t.engine.submit_question(exchange).await.unwrap_err();
        assert!(matches!(err, EngineError::JudgeUnavailable(_)));

        let messages = t.db.list_messages(&t.session.id).unwrap();
        assert_eq!(messages.len(), 1, "the question must be retained");
        assert_eq!(messages[0].role, crate::db::MessageRole::User);
        assert_eq!(t.db.get_session(&t.session.id).unwrap().question_count, 0);
    }

    #[tokio::test]
    async fn a_failed_question_can_be_resubmitted() {
        let t = harness_with_judge(ScriptedJudge::sequence(vec![
            Err(JudgeError::network("blip")),
            Ok(AnswerCategory::No),
        ]));

        let exchange = t
            .engine
            .prepare(&t.user, &t.session.id, "Was he alone?")
            .await
            .unwrap();
        assert!(matches!(
            t.engine.submit_question(exchange).await.unwrap_err(),
            EngineError::JudgeUnavailable(_)
        ));

        // The same question again; this time the judge answers.
        let exchange = t
            .engine
            .prepare(&t.user, &t.session.id, "Was he alone?")
            .await
            .unwrap();
        let reply = t.engine.submit_question(exchange).await.unwrap();
        assert_eq!(reply.judge_message.answer_category, Some(AnswerCategory::No));

        // The unanswered first question stays in the transcript; only the
        // answered exchange moved the counter.
        let messages = t.db.list_messages(&t.session.id).unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(t.db.get_session(&t.session.id).unwrap().question_count, 1);
    }

    #[tokio::test]
    async fn streamed_judge_failure_ends_with_error_event() {
        let t = harness_with_judge(ScriptedJudge::failing());
        let exchange = t
            .engine
            .prepare(&t.user, &t.session.id, "Was he alone?")
            .await
            .unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        t.engine.submit_question_streamed(exchange, tx).await;

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ExchangeEvent::Accepted { .. }));
        assert!(matches!(events[1], ExchangeEvent::Failed { .. }));
    }

    #[tokio::test]
    async fn operations_on_terminal_sessions_are_rejected_without_side_effects() {
        let t = harness(AnswerCategory::Yes);
        t.engine.reveal(&t.user, &t.session.id).await.unwrap();

        let err = t
            .engine
            .prepare(&t.user, &t.session.id, "One more?")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::IllegalState(_)));

        // Re-reveal is a rejection, not a no-op success.
        assert!(matches!(
            t.engine.reveal(&t.user, &t.session.id).await.unwrap_err(),
            EngineError::IllegalState(_)
        ));
        assert!(matches!(
            t.engine.quit(&t.user, &t.session.id).await.unwrap_err(),
            EngineError::IllegalState(_)
        ));

        assert!(t.db.list_messages(&t.session.id).unwrap().is_empty());
        assert_eq!(t.db.get_session(&t.session.id).unwrap().question_count, 0);
    }

    #[tokio::test]
    async fn solution_stays_private_until_reveal() {
        let t = harness(AnswerCategory::No);

        let exchange = t
            .engine
            .prepare(&t.user, &t.session.id, "Is the logbook involved?")
            .await
            .unwrap();
        let reply = t.engine.submit_question(exchange).await.unwrap();
        let reply_json = serde_json::to_string(&reply).unwrap();
        assert!(!reply_json.contains(SECRET_BOTTOM));

        let (_, view) = t
            .engine
            .session_detail(&t.user, &t.session.id)
            .await
            .unwrap();
        assert!(view.bottom.is_none());
        assert!(!serde_json::to_string(&view).unwrap().contains(SECRET_BOTTOM));

        let (session, view) = t.engine.reveal(&t.user, &t.session.id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Revealed);
        assert!(session.ended_at.is_some());
        assert!(view.bottom.as_deref().unwrap().contains(SECRET_BOTTOM));

        // After the reveal, the detail view keeps exposing the solution.
        let (_, view) = t
            .engine
            .session_detail(&t.user, &t.session.id)
            .await
            .unwrap();
        assert!(view.bottom.is_some());
    }

    #[tokio::test]
    async fn foreign_sessions_are_forbidden() {
        let t = harness(AnswerCategory::Yes);
        let stranger = t.db.get_or_create_user("someone-else").unwrap();

        let err = t
            .engine
            .prepare(&stranger, &t.session.id, "Hello?")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));

        assert!(matches!(
            t.engine.reveal(&stranger, &t.session.id).await.unwrap_err(),
            EngineError::Forbidden(_)
        ));
    }

    #[tokio::test]
    async fn blank_questions_are_rejected_before_any_write() {
        let t = harness(AnswerCategory::Yes);

        let err = t
            .engine
            .prepare(&t.user, &t.session.id, "   \n\t ")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
        assert!(t.db.list_messages(&t.session.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_sessions_are_not_found() {
        let t = harness(AnswerCategory::Yes);
        let err = t
            .engine
            .prepare(&t.user, "no-such-session", "Hello?")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn quit_marks_the_session_ended() {
        let t = harness(AnswerCategory::Yes);
        let session = t.engine.quit(&t.user, &t.session.id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Quit);
        assert!(session.ended_at.is_some());
    }
}
