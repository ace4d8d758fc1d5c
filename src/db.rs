//! Database module for the turtle-soup service
//!
//! Provides persistence for users, puzzles, sessions and messages. The
//! handle is an explicitly constructed resource: callers build one `Database`
//! and inject it wherever persistence is needed.

mod schema;

pub use schema::*;

use crate::judge::AnswerCategory;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("Puzzle not found: {0}")]
    PuzzleNotFound(String),
    #[error("No active puzzle for soup type {0}")]
    NoPuzzleAvailable(SoupType),
    #[error("Session {session_id} is {current}, not PLAYING")]
    IllegalTransition {
        session_id: String,
        current: SessionStatus,
    },
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Insert the built-in demo puzzles when the table is empty.
    pub fn seed_demo_puzzles(&self) -> DbResult<()> {
        let count: i64 = {
            let conn = self.conn.lock().unwrap();
            conn.query_row("SELECT COUNT(*) FROM puzzles", [], |row| row.get(0))?
        };
        if count > 0 {
            return Ok(());
        }
        for puzzle in DEMO_PUZZLES {
            self.insert_puzzle(puzzle)?;
        }
        tracing::info!(count = DEMO_PUZZLES.len(), "Seeded demo puzzles");
        Ok(())
    }

    // ==================== User Operations ====================

    /// Look up a user by external identifier, creating the record on first
    /// sight. The external identifier is opaque to the service.
    pub fn get_or_create_user(&self, external_id: &str) -> DbResult<User> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();

        conn.execute(
            "INSERT OR IGNORE INTO users (id, external_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![
                uuid::Uuid::new_v4().to_string(),
                external_id,
                now.to_rfc3339()
            ],
        )?;

        let mut stmt = conn.prepare(
            "SELECT id, external_id, created_at, updated_at FROM users WHERE external_id = ?1",
        )?;
        stmt.query_row(params![external_id], |row| {
            Ok(User {
                id: row.get(0)?,
                external_id: row.get(1)?,
                created_at: parse_datetime(&row.get::<_, String>(2)?),
                updated_at: parse_datetime(&row.get::<_, String>(3)?),
            })
        })
        .map_err(DbError::from)
    }

    // ==================== Puzzle Operations ====================

    /// Insert a puzzle as ACTIVE and return the stored record.
    pub fn insert_puzzle(&self, puzzle: &NewPuzzle) -> DbResult<Puzzle> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();
        let tags: Vec<String> = puzzle.tags.iter().map(|t| (*t).to_string()).collect();
        let hints: Vec<String> = puzzle.hint_list.iter().map(|h| (*h).to_string()).collect();

        conn.execute(
            "INSERT INTO puzzles (id, title, soup_type, difficulty, tags, surface, bottom, hint_list, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'ACTIVE', ?9, ?9)",
            params![
                id,
                puzzle.title,
                puzzle.soup_type.as_str(),
                puzzle.difficulty,
                serde_json::to_string(&tags).unwrap(),
                puzzle.surface,
                puzzle.bottom,
                serde_json::to_string(&hints).unwrap(),
                now.to_rfc3339(),
            ],
        )?;

        Ok(Puzzle {
            id,
            title: puzzle.title.to_string(),
            soup_type: puzzle.soup_type,
            difficulty: puzzle.difficulty,
            tags,
            surface: puzzle.surface.to_string(),
            bottom: puzzle.bottom.to_string(),
            hint_list: hints,
            status: PuzzleStatus::Active,
            created_at: now,
            updated_at: now,
        })
    }

    /// Get puzzle by ID
    pub fn get_puzzle(&self, id: &str) -> DbResult<Puzzle> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PUZZLE_COLUMNS} FROM puzzles WHERE id = ?1"
        ))?;
        stmt.query_row(params![id], parse_puzzle_row)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => DbError::PuzzleNotFound(id.to_string()),
                other => DbError::Sqlite(other),
            })
    }

    /// Pick a random ACTIVE puzzle of the given soup type, optionally pinned
    /// to one difficulty.
    pub fn pick_random_puzzle(
        &self,
        soup_type: SoupType,
        difficulty: Option<u8>,
    ) -> DbResult<Puzzle> {
        let conn = self.conn.lock().unwrap();
        let result = match difficulty {
            Some(level) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {PUZZLE_COLUMNS} FROM puzzles
                     WHERE status = 'ACTIVE' AND soup_type = ?1 AND difficulty = ?2
                     ORDER BY RANDOM() LIMIT 1"
                ))?;
                stmt.query_row(params![soup_type.as_str(), level], parse_puzzle_row)
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {PUZZLE_COLUMNS} FROM puzzles
                     WHERE status = 'ACTIVE' AND soup_type = ?1
                     ORDER BY RANDOM() LIMIT 1"
                ))?;
                stmt.query_row(params![soup_type.as_str()], parse_puzzle_row)
            }
        };
        result.map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::NoPuzzleAvailable(soup_type),
            other => DbError::Sqlite(other),
        })
    }

    // ==================== Session Operations ====================

    /// Open a new session against the given puzzle. The session starts in
    /// PLAYING with a zero question count; `started_at` is set now.
    pub fn create_session(
        &self,
        user_id: &str,
        puzzle: &Puzzle,
        title: Option<&str>,
    ) -> DbResult<Session> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();

        conn.execute(
            "INSERT INTO sessions (id, user_id, puzzle_id, soup_type, title, status, question_count, started_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'PLAYING', 0, ?6, ?6, ?6)",
            params![
                id,
                user_id,
                puzzle.id,
                puzzle.soup_type.as_str(),
                title,
                now.to_rfc3339(),
            ],
        )?;

        Ok(Session {
            id,
            user_id: user_id.to_string(),
            puzzle_id: puzzle.id.clone(),
            soup_type: puzzle.soup_type,
            title: title.map(String::from),
            status: SessionStatus::Playing,
            question_count: 0,
            started_at: Some(now),
            ended_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Get session by ID
    pub fn get_session(&self, id: &str) -> DbResult<Session> {
        let conn = self.conn.lock().unwrap();
        query_session(&conn, id)
    }

    /// List a user's sessions, newest first.
    pub fn list_sessions_for_user(&self, user_id: &str, limit: u32) -> DbResult<Vec<Session>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![user_id, limit], parse_session_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Atomically bump the question counter and refresh the updated
    /// timestamp. One call per completed exchange.
    pub fn increment_question_count(&self, id: &str) -> DbResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();

        let updated = conn.execute(
            "UPDATE sessions SET question_count = question_count + 1, updated_at = ?1 WHERE id = ?2",
            params![now.to_rfc3339(), id],
        )?;

        if updated == 0 {
            return Err(DbError::SessionNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Move a PLAYING session into a terminal status.
    ///
    /// The status guard lives in the UPDATE itself so two racing requests
    /// cannot both end the session; the loser reads back the current status
    /// and gets an `IllegalTransition`.
    pub fn set_session_status(&self, id: &str, status: SessionStatus) -> DbResult<Session> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();

        let updated = conn.execute(
            "UPDATE sessions SET status = ?1, ended_at = ?2, updated_at = ?2
             WHERE id = ?3 AND status = 'PLAYING'",
            params![status.as_str(), now.to_rfc3339(), id],
        )?;

        if updated == 0 {
            let current = query_session(&conn, id)?;
            return Err(DbError::IllegalTransition {
                session_id: id.to_string(),
                current: current.status,
            });
        }
        query_session(&conn, id)
    }

    // ==================== Message Operations ====================

    /// Append a message to a session's transcript. The sequence id is
    /// assigned here and the session's updated timestamp is touched.
    pub fn append_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
        answer_category: Option<AnswerCategory>,
    ) -> DbResult<Message> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();

        let sequence_id: i64 = conn.query_row(
            "SELECT COALESCE(MAX(sequence_id), 0) + 1 FROM messages WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;

        conn.execute(
            "INSERT INTO messages (id, session_id, sequence_id, role, content, answer_category, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                session_id,
                sequence_id,
                role.as_str(),
                content,
                answer_category.map(AnswerCategory::as_str),
                now.to_rfc3339(),
            ],
        )?;

        conn.execute(
            "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
            params![now.to_rfc3339(), session_id],
        )?;

        Ok(Message {
            id,
            session_id: session_id.to_string(),
            sequence_id,
            role,
            content: content.to_string(),
            answer_category,
            created_at: now,
        })
    }

    /// Get messages for a session in transcript order
    pub fn list_messages(&self, session_id: &str) -> DbResult<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, sequence_id, role, content, answer_category, created_at
             FROM messages WHERE session_id = ?1 ORDER BY sequence_id ASC",
        )?;
        let rows = stmt.query_map(params![session_id], parse_message_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }
}

const SESSION_COLUMNS: &str = "id, user_id, puzzle_id, soup_type, title, status, question_count, started_at, ended_at, created_at, updated_at";

const PUZZLE_COLUMNS: &str =
    "id, title, soup_type, difficulty, tags, surface, bottom, hint_list, status, created_at, updated_at";

fn query_session(conn: &Connection, id: &str) -> DbResult<Session> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"
    ))?;
    stmt.query_row(params![id], parse_session_row)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::SessionNotFound(id.to_string()),
            other => DbError::Sqlite(other),
        })
}

/// Parse a session row from the database
fn parse_session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        user_id: row.get(1)?,
        puzzle_id: row.get(2)?,
        soup_type: parse_soup_type(&row.get::<_, String>(3)?),
        title: row.get(4)?,
        status: parse_status(&row.get::<_, String>(5)?),
        question_count: row.get(6)?,
        started_at: row
            .get::<_, Option<String>>(7)?
            .map(|s| parse_datetime(&s)),
        ended_at: row
            .get::<_, Option<String>>(8)?
            .map(|s| parse_datetime(&s)),
        created_at: parse_datetime(&row.get::<_, String>(9)?),
        updated_at: parse_datetime(&row.get::<_, String>(10)?),
    })
}

/// Parse a puzzle row from the database
fn parse_puzzle_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Puzzle> {
    Ok(Puzzle {
        id: row.get(0)?,
        title: row.get(1)?,
        soup_type: parse_soup_type(&row.get::<_, String>(2)?),
        difficulty: row.get(3)?,
        tags: parse_string_list(row.get::<_, Option<String>>(4)?),
        surface: row.get(5)?,
        bottom: row.get(6)?,
        hint_list: parse_string_list(row.get::<_, Option<String>>(7)?),
        status: row
            .get::<_, String>(8)?
            .parse()
            .unwrap_or(PuzzleStatus::Inactive),
        created_at: parse_datetime(&row.get::<_, String>(9)?),
        updated_at: parse_datetime(&row.get::<_, String>(10)?),
    })
}

/// Parse a message row from the database
fn parse_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        session_id: row.get(1)?,
        sequence_id: row.get(2)?,
        role: parse_role(&row.get::<_, String>(3)?),
        content: row.get(4)?,
        answer_category: row
            .get::<_, Option<String>>(5)?
            .and_then(|s| AnswerCategory::parse_lenient(&s)),
        created_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

fn parse_soup_type(s: &str) -> SoupType {
    s.parse().unwrap_or(SoupType::Clear)
}

// An unknown status reads as terminal so a corrupted row cannot re-admit
// exchanges.
fn parse_status(s: &str) -> SessionStatus {
    s.parse().unwrap_or(SessionStatus::Quit)
}

fn parse_role(s: &str) -> MessageRole {
    match s {
        "USER" => MessageRole::User,
        _ => MessageRole::Judge,
    }
}

fn parse_string_list(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
