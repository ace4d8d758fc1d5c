//! Trait abstractions for the engine's collaborators
//!
//! The engine talks to a session store, a judge and an identity directory
//! through these traits so tests can substitute scripted implementations.

use crate::db::{
    Database, DbError, Message, MessageRole, Puzzle, Session, SessionStatus, SoupType, User,
};
use crate::judge::AnswerCategory;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Errors a store implementation may surface.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("{0}")]
    Internal(String),
}

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::SessionNotFound(_) | DbError::PuzzleNotFound(_) => {
                StoreError::NotFound(e.to_string())
            }
            DbError::NoPuzzleAvailable(_) => StoreError::NotFound(e.to_string()),
            DbError::IllegalTransition { .. } => StoreError::InvalidState(e.to_string()),
            DbError::Sqlite(_) => StoreError::Internal(e.to_string()),
        }
    }
}

/// Durable storage for sessions, puzzles and transcripts.
///
/// Every method is a single atomic operation, strongly consistent for one
/// session.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(
        &self,
        user_id: &str,
        puzzle: &Puzzle,
        title: Option<&str>,
    ) -> Result<Session, StoreError>;

    async fn get_session(&self, id: &str) -> Result<Session, StoreError>;

    async fn list_sessions_for_user(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<Session>, StoreError>;

    /// Bump the question counter and refresh the updated timestamp, as one
    /// atomic operation.
    async fn increment_question_count(&self, session_id: &str) -> Result<(), StoreError>;

    /// Move a PLAYING session into a terminal status; rejected atomically
    /// when the session is already terminal.
    async fn set_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> Result<Session, StoreError>;

    async fn append_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
        answer_category: Option<AnswerCategory>,
    ) -> Result<Message, StoreError>;

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, StoreError>;

    async fn get_puzzle(&self, id: &str) -> Result<Puzzle, StoreError>;

    async fn pick_random_puzzle(
        &self,
        soup_type: SoupType,
        difficulty: Option<u8>,
    ) -> Result<Puzzle, StoreError>;
}

/// Identity resolution from the opaque, client-supplied identifier.
///
/// Injected as a capability rather than reached through global state so the
/// lazily-upserting production implementation can be swapped in tests.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn resolve(&self, external_id: &str) -> Result<User, StoreError>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    async fn create_session(
        &self,
        user_id: &str,
        puzzle: &Puzzle,
        title: Option<&str>,
    ) -> Result<Session, StoreError> {
        (**self).create_session(user_id, puzzle, title).await
    }

    async fn get_session(&self, id: &str) -> Result<Session, StoreError> {
        (**self).get_session(id).await
    }

    async fn list_sessions_for_user(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<Session>, StoreError> {
        (**self).list_sessions_for_user(user_id, limit).await
    }

    async fn increment_question_count(&self, session_id: &str) -> Result<(), StoreError> {
        (**self).increment_question_count(session_id).await
    }

    async fn set_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> Result<Session, StoreError> {
        (**self).set_session_status(session_id, status).await
    }

    async fn append_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
        answer_category: Option<AnswerCategory>,
    ) -> Result<Message, StoreError> {
        (**self)
            .append_message(session_id, role, content, answer_category)
            .await
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, StoreError> {
        (**self).list_messages(session_id).await
    }

    async fn get_puzzle(&self, id: &str) -> Result<Puzzle, StoreError> {
        (**self).get_puzzle(id).await
    }

    async fn pick_random_puzzle(
        &self,
        soup_type: SoupType,
        difficulty: Option<u8>,
    ) -> Result<Puzzle, StoreError> {
        (**self).pick_random_puzzle(soup_type, difficulty).await
    }
}

#[async_trait]
impl<T: UserDirectory + ?Sized> UserDirectory for Arc<T> {
    async fn resolve(&self, external_id: &str) -> Result<User, StoreError> {
        (**self).resolve(external_id).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter exposing [`Database`] as a [`SessionStore`].
#[derive(Clone)]
pub struct DatabaseStore {
    db: Database,
}

impl DatabaseStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn inner(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl SessionStore for DatabaseStore {
    async fn create_session(
        &self,
        user_id: &str,
        puzzle: &Puzzle,
        title: Option<&str>,
    ) -> Result<Session, StoreError> {
        self.db
            .create_session(user_id, puzzle, title)
            .map_err(StoreError::from)
    }

    async fn get_session(&self, id: &str) -> Result<Session, StoreError> {
        self.db.get_session(id).map_err(StoreError::from)
    }

    async fn list_sessions_for_user(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<Session>, StoreError> {
        self.db
            .list_sessions_for_user(user_id, limit)
            .map_err(StoreError::from)
    }

    async fn increment_question_count(&self, session_id: &str) -> Result<(), StoreError> {
        self.db
            .increment_question_count(session_id)
            .map_err(StoreError::from)
    }

    async fn set_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
    ) -> Result<Session, StoreError> {
        self.db
            .set_session_status(session_id, status)
            .map_err(StoreError::from)
    }

    async fn append_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
        answer_category: Option<AnswerCategory>,
    ) -> Result<Message, StoreError> {
        self.db
            .append_message(session_id, role, content, answer_category)
            .map_err(StoreError::from)
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, StoreError> {
        self.db.list_messages(session_id).map_err(StoreError::from)
    }

    async fn get_puzzle(&self, id: &str) -> Result<Puzzle, StoreError> {
        self.db.get_puzzle(id).map_err(StoreError::from)
    }

    async fn pick_random_puzzle(
        &self,
        soup_type: SoupType,
        difficulty: Option<u8>,
    ) -> Result<Puzzle, StoreError> {
        self.db
            .pick_random_puzzle(soup_type, difficulty)
            .map_err(StoreError::from)
    }
}

/// Adapter exposing [`Database`] user upserts as a [`UserDirectory`].
#[derive(Clone)]
pub struct DbUserDirectory {
    db: Database,
}

impl DbUserDirectory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserDirectory for DbUserDirectory {
    async fn resolve(&self, external_id: &str) -> Result<User, StoreError> {
        self.db
            .get_or_create_user(external_id)
            .map_err(StoreError::from)
    }
}
