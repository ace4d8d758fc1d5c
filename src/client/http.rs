//! HTTP game client
//!
//! A thin connector binding the reconciliation log to the server's API: it
//! submits questions in either delivery mode, pumps streamed responses
//! through [`drive_stream`], and supersedes an in-flight streaming exchange
//! by aborting its connection before starting the next one.

use super::log::{ExchangeTicket, SessionLog};
use super::stream::drive_stream;
use super::ClientError;
use crate::api::{
    AskRequest, CreateSessionRequest, ErrorEnvelope, MessageListResponse, QuitResponse,
    SessionListResponse, SessionResponse,
};
use crate::db::{Message, PuzzleView, Session};
use crate::engine::ExchangeReply;
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

struct InFlightStream {
    ticket: ExchangeTicket,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

/// Client for one player against one game server.
pub struct GameClient {
    http: reqwest::Client,
    base_url: String,
    external_id: String,
    session_id: Option<String>,
    puzzle: Option<PuzzleView>,
    log: Option<Arc<Mutex<SessionLog>>>,
    stream: Option<InFlightStream>,
}

impl GameClient {
    /// Build a client for the given server. The external id is the opaque
    /// identity token sent with every request.
    pub fn connect(base_url: impl Into<String>, external_id: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            external_id: external_id.into(),
            session_id: None,
            puzzle: None,
            log: None,
            stream: None,
        }
    }

    // ==================== Session lifecycle ====================

    /// Open a fresh session for the given soup type and bind this client to
    /// it.
    pub async fn open_session(
        &mut self,
        soup_type: &str,
        difficulty: Option<u8>,
    ) -> Result<(), ClientError> {
        let resp = self
            .request(Method::POST, "/api/sessions")
            .json(&CreateSessionRequest {
                soup_type: soup_type.to_string(),
                difficulty,
            })
            .send()
            .await?;
        let body: SessionResponse = parse(resp).await?;
        self.install(body);
        Ok(())
    }

    /// Bind this client to an existing session, fetching its transcript.
    pub async fn attach(&mut self, session_id: &str) -> Result<(), ClientError> {
        let resp = self
            .request(Method::GET, &format!("/api/sessions/{session_id}"))
            .send()
            .await?;
        let detail: SessionResponse = parse(resp).await?;

        let resp = self
            .request(Method::GET, &format!("/api/sessions/{session_id}/messages"))
            .send()
            .await?;
        let messages: MessageListResponse = parse(resp).await?;

        let log = SessionLog::with_transcript(detail.session.summary(), &messages.items);
        self.session_id = Some(detail.session.id.clone());
        self.puzzle = Some(detail.puzzle);
        self.log = Some(Arc::new(Mutex::new(log)));
        Ok(())
    }

    /// List the player's sessions on the server.
    pub async fn list_sessions(&self) -> Result<Vec<Session>, ClientError> {
        let resp = self.request(Method::GET, "/api/sessions").send().await?;
        let body: SessionListResponse = parse(resp).await?;
        Ok(body.items)
    }

    /// Fetch the attached session's transcript from the server.
    pub async fn fetch_messages(&self) -> Result<Vec<Message>, ClientError> {
        let session_id = self.session_id.as_deref().ok_or(ClientError::NoSession)?;
        let resp = self
            .request(Method::GET, &format!("/api/sessions/{session_id}/messages"))
            .send()
            .await?;
        let body: MessageListResponse = parse(resp).await?;
        Ok(body.items)
    }

    /// Reveal the solution; returns the puzzle view including the bottom.
    pub async fn reveal(&mut self) -> Result<PuzzleView, ClientError> {
        let session_id = self.session_id.clone().ok_or(ClientError::NoSession)?;
        let resp = self
            .request(Method::POST, &format!("/api/sessions/{session_id}/reveal"))
            .send()
            .await?;
        let body: SessionResponse = parse(resp).await?;

        if let Some(log) = &self.log {
            log.lock().unwrap().set_session(body.session.summary());
        }
        self.puzzle = Some(body.puzzle.clone());
        Ok(body.puzzle)
    }

    /// Abandon the game without revealing.
    pub async fn quit(&mut self) -> Result<(), ClientError> {
        let session_id = self.session_id.clone().ok_or(ClientError::NoSession)?;
        let resp = self
            .request(Method::POST, &format!("/api/sessions/{session_id}/quit"))
            .send()
            .await?;
        let body: QuitResponse = parse(resp).await?;

        if let Some(log) = &self.log {
            log.lock().unwrap().set_session(body.session.summary());
        }
        Ok(())
    }

    // ==================== The exchange ====================

    /// Submit a question synchronously and reconcile the reply.
    pub async fn ask(&mut self, question: &str) -> Result<(), ClientError> {
        let session_id = self.session_id.clone().ok_or(ClientError::NoSession)?;
        let log = self.log()?;
        let ticket = log.lock().unwrap().begin_exchange(question)?;

        let outcome = async {
            let resp = self
                .request(Method::POST, &format!("/api/sessions/{session_id}/messages"))
                .json(&AskRequest {
                    content: Some(question.to_string()),
                    stream: false,
                })
                .send()
                .await?;
            parse::<ExchangeReply>(resp).await
        }
        .await;

        match outcome {
            Ok(reply) => {
                log.lock().unwrap().apply_reply(ticket, &reply);
                Ok(())
            }
            Err(e) => {
                log.lock().unwrap().fail(ticket, &e.to_string());
                Err(e)
            }
        }
    }

    /// Submit a question over the streaming channel. Any previous streaming
    /// exchange is superseded first: its connection is aborted and it is
    /// dropped from the log without surfacing an error. Returns once the
    /// stream is established; frames are applied in the background.
    pub async fn ask_streamed(&mut self, question: &str) -> Result<ExchangeTicket, ClientError> {
        let session_id = self.session_id.clone().ok_or(ClientError::NoSession)?;
        let log = self.log()?;

        if let Some(prev) = self.stream.take() {
            prev.cancel.cancel();
            log.lock().unwrap().cancel(prev.ticket);
        }

        let ticket = log.lock().unwrap().begin_exchange(question)?;

        let outcome = async {
            let resp = self
                .request(Method::POST, &format!("/api/sessions/{session_id}/messages"))
                .json(&AskRequest {
                    content: Some(question.to_string()),
                    stream: true,
                })
                .send()
                .await?;
            if resp.status().is_success() {
                Ok(resp)
            } else {
                Err(error_from_response(resp).await)
            }
        }
        .await;

        let resp = match outcome {
            Ok(resp) => resp,
            Err(e) => {
                log.lock().unwrap().fail(ticket, &e.to_string());
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let body = Box::pin(resp.bytes_stream());
        let task = tokio::spawn(drive_stream(body, log.clone(), ticket, cancel.clone()));
        self.stream = Some(InFlightStream {
            ticket,
            cancel,
            task,
        });
        Ok(ticket)
    }

    /// Wait for the current streaming exchange to run to completion.
    pub async fn finish_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.task.await;
        }
    }

    /// Abort the in-flight streaming exchange, silently.
    pub fn cancel_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.cancel.cancel();
            if let Some(log) = &self.log {
                log.lock().unwrap().cancel(stream.ticket);
            }
        }
    }

    // ==================== Accessors ====================

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn puzzle(&self) -> Option<&PuzzleView> {
        self.puzzle.as_ref()
    }

    /// Handle to the reconciled session log.
    pub fn log(&self) -> Result<Arc<Mutex<SessionLog>>, ClientError> {
        self.log.clone().ok_or(ClientError::NoSession)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.base_url))
            .header("x-external-id", &self.external_id)
    }

    fn install(&mut self, body: SessionResponse) {
        self.session_id = Some(body.session.id.clone());
        self.log = Some(Arc::new(Mutex::new(SessionLog::new(body.session.summary()))));
        self.puzzle = Some(body.puzzle);
    }
}

async fn parse<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
    if resp.status().is_success() {
        Ok(resp.json().await?)
    } else {
        Err(error_from_response(resp).await)
    }
}

async fn error_from_response(resp: reqwest::Response) -> ClientError {
    let status = resp.status();
    match resp.json::<ErrorEnvelope>().await {
        Ok(envelope) => ClientError::Server {
            code: envelope.error.code,
            message: envelope.error.message,
            request_id: envelope.error.request_id,
        },
        Err(_) => ClientError::UnexpectedResponse(format!("HTTP {status}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{create_router, AppState};
    use crate::db::Database;
    use crate::engine::testing::ScriptedJudge;
    use crate::judge::{AnswerCategory, Judge, JudgeError};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    async fn spawn_server(judge: Arc<dyn Judge>) -> String {
        let db = Database::open_in_memory().unwrap();
        db.seed_demo_puzzles().unwrap();
        let state = AppState::new(db, judge);
        let app = create_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    /// Judge that holds every classification until a permit is released.
    struct GatedJudge {
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl Judge for GatedJudge {
        async fn classify(
            &self,
            _question: &str,
            _surface: &str,
            _bottom: &str,
        ) -> Result<AnswerCategory, JudgeError> {
            let permit = self.gate.acquire().await.unwrap();
            permit.forget();
            Ok(AnswerCategory::Yes)
        }

        fn model_id(&self) -> &str {
            "gated"
        }
    }

    #[tokio::test]
    async fn plays_a_full_game_over_http() {
        let base = spawn_server(Arc::new(ScriptedJudge::always(AnswerCategory::Yes))).await;
        let mut client = GameClient::connect(&base, "player-1");

        client.open_session("CLEAR", None).await.unwrap();
        assert!(client.puzzle().unwrap().bottom.is_none());

        // Synchronous exchange.
        client.ask("Is he short?").await.unwrap();
        {
            let log = client.log().unwrap();
            let log = log.lock().unwrap();
            assert_eq!(log.entries().len(), 2);
            assert!(log.entries()[0].confirmed);
            assert_eq!(log.entries()[1].answer_category, Some(AnswerCategory::Yes));
            assert_eq!(log.session().question_count, 1);
        }

        // Streamed exchange.
        client.ask_streamed("Does the umbrella matter?").await.unwrap();
        client.finish_stream().await;
        {
            let log = client.log().unwrap();
            let log = log.lock().unwrap();
            assert_eq!(log.entries().len(), 4);
            assert_eq!(log.entries()[3].content, "Yes.");
            assert!(log.entries()[3].confirmed);
            assert_eq!(log.session().question_count, 2);
            assert!(log.last_error().is_none());
        }

        let revealed = client.reveal().await.unwrap();
        assert!(revealed.bottom.is_some());

        // Asking after the reveal is an illegal-state rejection.
        let err = client.ask("One more?").await.unwrap_err();
        match err {
            ClientError::Server { code, .. } => assert_eq!(code, "ILLEGAL_STATE"),
            other => panic!("expected server rejection, got {other}"),
        }

        // A second client attaching to the session sees only the four
        // persisted messages; the rejected question never hit the store.
        let session_id = client.session_id().unwrap().to_string();
        let mut second = GameClient::connect(&base, "player-1");
        second.attach(&session_id).await.unwrap();
        let log = second.log().unwrap();
        let log = log.lock().unwrap();
        assert_eq!(log.entries().len(), 4);
        assert!(log.entries().iter().all(|e| e.confirmed));

        assert_eq!(client.list_sessions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_identity_is_rejected_with_an_envelope() {
        let base = spawn_server(Arc::new(ScriptedJudge::always(AnswerCategory::Yes))).await;

        let resp = reqwest::Client::new()
            .get(format!("{base}/api/sessions"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);

        let envelope: ErrorEnvelope = resp.json().await.unwrap();
        assert_eq!(envelope.error.code, "UNAUTHORIZED");
        assert!(!envelope.error.message.is_empty());
        assert!(envelope.error.request_id.starts_with("req_"));
    }

    #[tokio::test]
    async fn judge_outage_leaves_the_question_resumable() {
        let base = spawn_server(Arc::new(ScriptedJudge::failing())).await;
        let mut client = GameClient::connect(&base, "player-2");
        client.open_session("RED", None).await.unwrap();

        let err = client.ask("Was it a dream?").await.unwrap_err();
        match err {
            ClientError::Server { code, .. } => assert_eq!(code, "JUDGE_UNAVAILABLE"),
            other => panic!("expected judge outage, got {other}"),
        }

        // The question is persisted, the answer is not.
        let messages = client.fetch_messages().await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, crate::db::MessageRole::User);

        let log = client.log().unwrap();
        let mut log = log.lock().unwrap();
        assert!(log.take_error().is_some());
        assert_eq!(log.session().question_count, 0);
    }

    #[tokio::test]
    async fn streamed_judge_outage_ends_with_the_error_frame() {
        let base = spawn_server(Arc::new(ScriptedJudge::failing())).await;
        let mut client = GameClient::connect(&base, "player-3");
        client.open_session("BLACK", None).await.unwrap();

        client.ask_streamed("Was it night?").await.unwrap();
        client.finish_stream().await;

        let log = client.log().unwrap();
        let log = log.lock().unwrap();
        assert!(log.last_error().unwrap().contains("judge"));
        // The accepted question is confirmed; the placeholder stays empty.
        assert!(log.entries()[0].confirmed);
        assert_eq!(log.entries()[1].content, "");
    }

    #[tokio::test]
    async fn a_new_streamed_question_supersedes_the_previous_one() {
        let gate = Arc::new(Semaphore::new(0));
        let base = spawn_server(Arc::new(GatedJudge { gate: gate.clone() })).await;
        let mut client = GameClient::connect(&base, "player-4");
        client.open_session("CLEAR", None).await.unwrap();

        let _first = client.ask_streamed("first question?").await.unwrap();
        // Let the first exchange reach the judge and park there.
        tokio::time::sleep(Duration::from_millis(50)).await;

        client.ask_streamed("second question?").await.unwrap();
        gate.add_permits(2);
        client.finish_stream().await;

        let log = client.log().unwrap();
        let log = log.lock().unwrap();
        assert_eq!(log.entries().len(), 4);
        // The superseded exchange's placeholder never received content, and
        // its cancellation surfaced no error.
        assert_eq!(log.entries()[1].content, "");
        assert_eq!(log.entries()[3].content, "Yes.");
        assert!(log.last_error().is_none());
    }
}
