//! Reconciliation of the client-held message log
//!
//! Each submitted question inserts an optimistic USER entry and an empty
//! JUDGE placeholder immediately, so the view reflects the pending turn
//! before the network answers. The in-flight exchange is an explicit little
//! state machine keyed by a generation ticket; frames carrying a stale
//! ticket are ignored, which is what makes superseding an exchange safe.

use super::ClientError;
use crate::db::{Message, MessageRole, SessionSummary};
use crate::engine::ExchangeReply;
use crate::judge::AnswerCategory;
use crate::wire::{ExchangeFrame, SessionUpdatedPayload};

/// One entry of the client-held transcript view.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub answer_category: Option<AnswerCategory>,
    /// Whether the entry carries server-confirmed state.
    pub confirmed: bool,
}

impl LogEntry {
    fn optimistic_user(ticket: ExchangeTicket, question: &str) -> Self {
        Self {
            id: format!("local-user-{}", ticket.0),
            role: MessageRole::User,
            content: question.to_string(),
            answer_category: None,
            confirmed: false,
        }
    }

    fn placeholder_judge(ticket: ExchangeTicket) -> Self {
        Self {
            id: format!("local-judge-{}", ticket.0),
            role: MessageRole::Judge,
            content: String::new(),
            answer_category: None,
            confirmed: false,
        }
    }

    fn from_message(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            role: message.role,
            content: message.content.clone(),
            answer_category: message.answer_category,
            confirmed: true,
        }
    }
}

/// Phase of the one exchange that may be in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangePhase {
    /// Optimistic entries inserted, nothing confirmed yet.
    Pending,
    /// The server accepted the question; frames are arriving.
    Streaming,
    /// The authoritative answer has been applied.
    Committed,
    /// The exchange failed; the error is held for display.
    Failed,
}

/// Generation ticket identifying one in-flight exchange. Applying state with
/// a stale ticket is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeTicket(u64);

#[derive(Debug)]
struct InFlight {
    ticket: ExchangeTicket,
    phase: ExchangePhase,
}

/// The reconciled, ordered view of one session.
pub struct SessionLog {
    session: SessionSummary,
    entries: Vec<LogEntry>,
    in_flight: Option<InFlight>,
    next_ticket: u64,
    last_error: Option<String>,
}

impl SessionLog {
    pub fn new(session: SessionSummary) -> Self {
        Self {
            session,
            entries: Vec::new(),
            in_flight: None,
            next_ticket: 0,
            last_error: None,
        }
    }

    /// Build a log from a fetched transcript.
    pub fn with_transcript(session: SessionSummary, messages: &[Message]) -> Self {
        let mut log = Self::new(session);
        log.entries = messages.iter().map(LogEntry::from_message).collect();
        log
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn session(&self) -> &SessionSummary {
        &self.session
    }

    /// Phase of the in-flight exchange, if any.
    pub fn phase(&self) -> Option<ExchangePhase> {
        self.in_flight.as_ref().map(|f| f.phase)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn take_error(&mut self) -> Option<String> {
        self.last_error.take()
    }

    /// Replace the held session snapshot, e.g. after a reveal or quit.
    pub fn set_session(&mut self, session: SessionSummary) {
        self.session = session;
    }

    /// Start an exchange: insert the optimistic pair and hand back the
    /// ticket every later application must present.
    pub fn begin_exchange(&mut self, question: &str) -> Result<ExchangeTicket, ClientError> {
        if self.in_flight.is_some() {
            return Err(ClientError::ExchangeInFlight);
        }

        self.next_ticket += 1;
        let ticket = ExchangeTicket(self.next_ticket);
        self.entries.push(LogEntry::optimistic_user(ticket, question));
        self.entries.push(LogEntry::placeholder_judge(ticket));
        self.in_flight = Some(InFlight {
            ticket,
            phase: ExchangePhase::Pending,
        });
        Ok(ticket)
    }

    /// Apply one validated frame from the stream. Returns false when the
    /// ticket is stale and the frame was dropped.
    pub fn apply_frame(&mut self, ticket: ExchangeTicket, frame: ExchangeFrame) -> bool {
        if !self.is_current(ticket) {
            return false;
        }

        match frame {
            ExchangeFrame::Accepted(payload) => {
                self.set_phase(ExchangePhase::Streaming);
                // The optimistic USER entry sits just above the placeholder.
                let index = self.entries.len().wrapping_sub(2);
                if let Some(entry) = self.entries.get_mut(index) {
                    if entry.role == MessageRole::User {
                        entry.id = payload.user_message_id;
                        entry.confirmed = true;
                    }
                }
            }
            ExchangeFrame::AnswerPartial(payload) => {
                if let Some(last) = self.entries.last_mut() {
                    if last.role == MessageRole::Judge {
                        last.content.push_str(&payload.delta);
                    }
                }
            }
            ExchangeFrame::AnswerComplete(payload) => {
                if let Some(last) = self.entries.last_mut() {
                    if last.role == MessageRole::Judge {
                        last.id = payload.judge_message_id;
                        last.content = payload.content;
                        last.answer_category = Some(payload.answer_category);
                        last.confirmed = true;
                    }
                }
                self.set_phase(ExchangePhase::Committed);
            }
            ExchangeFrame::SessionUpdated(payload) => {
                self.merge_session(&payload);
            }
            ExchangeFrame::Error(payload) => {
                // Surface the message; already-applied optimistic state stays.
                self.last_error = Some(payload.message);
                self.set_phase(ExchangePhase::Failed);
            }
        }
        true
    }

    /// Apply a non-streaming reply: the authoritative pair replaces the last
    /// two (optimistic) entries, or is appended when fewer than two exist.
    pub fn apply_reply(&mut self, ticket: ExchangeTicket, reply: &ExchangeReply) -> bool {
        if !self.is_current(ticket) {
            return false;
        }

        if self.entries.len() >= 2 {
            self.entries.truncate(self.entries.len() - 2);
        }
        self.entries.push(LogEntry::from_message(&reply.user_message));
        self.entries.push(LogEntry::from_message(&reply.judge_message));

        if let Some(summary) = &reply.session {
            self.session = summary.clone();
        }
        self.in_flight = None;
        true
    }

    /// Record a failure for the in-flight exchange. Optimistic entries are
    /// kept so the player sees what they asked.
    pub fn fail(&mut self, ticket: ExchangeTicket, message: &str) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.last_error = Some(message.to_string());
        self.in_flight = None;
        true
    }

    /// Silently drop the in-flight exchange. Cancellation initiated by the
    /// client itself is not a failure: no error is recorded.
    pub fn cancel(&mut self, ticket: ExchangeTicket) {
        if self.is_current(ticket) {
            self.in_flight = None;
        }
    }

    /// Note that the stream carrying this exchange ended. An end before the
    /// answer completed (and without an error frame) is abnormal.
    pub fn finish(&mut self, ticket: ExchangeTicket) {
        let Some(in_flight) = &self.in_flight else {
            return;
        };
        if in_flight.ticket != ticket {
            return;
        }
        if !matches!(
            in_flight.phase,
            ExchangePhase::Committed | ExchangePhase::Failed
        ) {
            self.last_error = Some("stream ended before the answer completed".to_string());
        }
        self.in_flight = None;
    }

    fn is_current(&self, ticket: ExchangeTicket) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|f| f.ticket == ticket)
    }

    fn set_phase(&mut self, phase: ExchangePhase) {
        if let Some(in_flight) = &mut self.in_flight {
            in_flight.phase = phase;
        }
    }

    /// Merge only the fields the payload actually carries; everything else
    /// in the snapshot is preserved.
    fn merge_session(&mut self, payload: &SessionUpdatedPayload) {
        if payload.session_id != self.session.id {
            return;
        }
        if let Some(count) = payload.question_count {
            self.session.question_count = count;
        }
        if let Some(status) = payload.status {
            self.session.status = status;
        }
    }
}
