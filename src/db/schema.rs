//! Database schema and record types

use crate::judge::AnswerCategory;
pub use crate::state::SessionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// SQL schema for initialization
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    external_id TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_users_external ON users(external_id);

CREATE TABLE IF NOT EXISTS puzzles (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    soup_type TEXT NOT NULL,
    difficulty INTEGER NOT NULL DEFAULT 3,
    tags TEXT,
    surface TEXT NOT NULL,
    bottom TEXT NOT NULL,
    hint_list TEXT,
    status TEXT NOT NULL DEFAULT 'ACTIVE',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_puzzles_deal ON puzzles(status, soup_type, difficulty);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    puzzle_id TEXT NOT NULL,
    soup_type TEXT NOT NULL,
    title TEXT,
    status TEXT NOT NULL DEFAULT 'PLAYING',
    question_count INTEGER NOT NULL DEFAULT 0,
    started_at TEXT,
    ended_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (puzzle_id) REFERENCES puzzles(id)
);

CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id, created_at DESC);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    sequence_id INTEGER NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    answer_category TEXT,
    created_at TEXT NOT NULL,

    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, sequence_id);
";

/// Cosmetic puzzle category.
///
/// Names come from the genre's jargon: a clear soup is a gentle everyday
/// scenario, red involves death or injury, black leans into horror. The tag
/// never influences protocol behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SoupType {
    Clear,
    Red,
    Black,
}

impl SoupType {
    pub fn as_str(self) -> &'static str {
        match self {
            SoupType::Clear => "CLEAR",
            SoupType::Red => "RED",
            SoupType::Black => "BLACK",
        }
    }
}

impl fmt::Display for SoupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SoupType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CLEAR" => Ok(SoupType::Clear),
            "RED" => Ok(SoupType::Red),
            "BLACK" => Ok(SoupType::Black),
            other => Err(format!("unknown soup type: {other}")),
        }
    }
}

/// Author of a message within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageRole {
    User,
    Judge,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "USER",
            MessageRole::Judge => "JUDGE",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A player identity, lazily created from the opaque external identifier the
/// client supplies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub external_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A puzzle: the public surface the player sees and the private bottom the
/// judge answers from.
#[derive(Debug, Clone)]
pub struct Puzzle {
    pub id: String,
    pub title: String,
    pub soup_type: SoupType,
    pub difficulty: u8,
    pub tags: Vec<String>,
    pub surface: String,
    pub bottom: String,
    pub hint_list: Vec<String>,
    pub status: PuzzleStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Puzzle {
    /// View safe to serve while the session is still in play. The bottom is
    /// structurally absent, not merely hidden.
    pub fn public_view(&self) -> PuzzleView {
        PuzzleView {
            id: self.id.clone(),
            title: self.title.clone(),
            soup_type: self.soup_type,
            difficulty: self.difficulty,
            tags: self.tags.clone(),
            surface: self.surface.clone(),
            hint_list: self.hint_list.clone(),
            bottom: None,
        }
    }

    /// View served once the session has transitioned to `Revealed`.
    pub fn revealed_view(&self) -> PuzzleView {
        let mut view = self.public_view();
        view.bottom = Some(self.bottom.clone());
        view
    }
}

/// Publication status of a puzzle; only `Active` puzzles are dealt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PuzzleStatus {
    Active,
    Inactive,
    Draft,
}

impl PuzzleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PuzzleStatus::Active => "ACTIVE",
            PuzzleStatus::Inactive => "INACTIVE",
            PuzzleStatus::Draft => "DRAFT",
        }
    }
}

impl FromStr for PuzzleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(PuzzleStatus::Active),
            "INACTIVE" => Ok(PuzzleStatus::Inactive),
            "DRAFT" => Ok(PuzzleStatus::Draft),
            other => Err(format!("unknown puzzle status: {other}")),
        }
    }
}

/// Serializable puzzle payload. `bottom` is present only on views built after
/// a reveal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PuzzleView {
    pub id: String,
    pub title: String,
    pub soup_type: SoupType,
    pub difficulty: u8,
    pub tags: Vec<String>,
    pub surface: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hint_list: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bottom: Option<String>,
}

/// Game session record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub puzzle_id: String,
    pub soup_type: SoupType,
    pub title: Option<String>,
    pub status: SessionStatus,
    pub question_count: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// The compact snapshot carried by exchange replies and the
    /// `session.updated` frame.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            question_count: self.question_count,
            status: self.status,
            updated_at: self.updated_at,
        }
    }
}

/// Refreshed counters sent back after a completed exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub question_count: i64,
    pub status: SessionStatus,
    pub updated_at: DateTime<Utc>,
}

/// One message in a session's ordered transcript. Immutable once persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub sequence_id: i64,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_category: Option<AnswerCategory>,
    pub created_at: DateTime<Utc>,
}

/// A puzzle ready for insertion, used by seeding and tests.
pub struct NewPuzzle {
    pub title: &'static str,
    pub soup_type: SoupType,
    pub difficulty: u8,
    pub tags: &'static [&'static str],
    pub surface: &'static str,
    pub bottom: &'static str,
    pub hint_list: &'static [&'static str],
}

/// Built-in demo puzzles inserted when the puzzles table is empty, so a fresh
/// install can be played immediately.
pub const DEMO_PUZZLES: &[NewPuzzle] = &[
    NewPuzzle {
        title: "Albatross Soup",
        soup_type: SoupType::Red,
        difficulty: 3,
        tags: &["classic", "sea"],
        surface: "A man walks into a restaurant, orders albatross soup, takes one \
                  sip, walks out, and ends his life. Why?",
        bottom: "Years ago he was shipwrecked with other survivors. They told him the \
                 meat keeping them alive was albatross, but it was the flesh of the \
                 dead. Tasting real albatross soup, he realizes the lie and cannot \
                 live with what he ate.",
        hint_list: &[
            "He had tasted 'albatross' once before.",
            "The two soups did not taste the same.",
            "He was once stranded at sea.",
        ],
    },
    NewPuzzle {
        title: "The Elevator Ride",
        soup_type: SoupType::Clear,
        difficulty: 2,
        tags: &["classic", "city"],
        surface: "A man who lives on the tenth floor rides the elevator down every \
                  morning, but on the way home he rides only to the seventh floor and \
                  walks the rest, except on rainy days. Why?",
        bottom: "He is short. He can reach the lobby button, but the highest button he \
                 can reach going up is the seventh. On rainy days he carries an \
                 umbrella and uses it to press the tenth-floor button.",
        hint_list: &[
            "He would ride all the way up if he could.",
            "The umbrella matters.",
        ],
    },
    NewPuzzle {
        title: "The Dark Crossing",
        soup_type: SoupType::Black,
        difficulty: 4,
        tags: &["night", "sea"],
        surface: "A lighthouse keeper turns off the light, goes to sleep, and wakes to \
                  learn he caused many deaths. Why does no one blame him?",
        bottom: "It was his final shift before the lighthouse was decommissioned and \
                 he had been ordered to shut the lamp down. The replacement beacon \
                 ship never arrived on station, and a liner struck the rocks in the \
                 dark. The inquiry faulted the harbor authority, not him.",
        hint_list: &[
            "He followed his instructions exactly.",
            "Something that should have been at sea was not.",
        ],
    },
    NewPuzzle {
        title: "Cold Coffee",
        soup_type: SoupType::Clear,
        difficulty: 1,
        tags: &["cafe"],
        surface: "A woman sends her coffee back because there is a fly in it. The \
                  waiter brings a fresh cup, she takes one sip and is furious. Why?",
        bottom: "The waiter only fished the fly out and returned the same cup. She had \
                 already sugared her coffee, so the first sip of the 'fresh' cup was \
                 sweet and gave the trick away.",
        hint_list: &["She could taste that something was wrong."],
    },
];
