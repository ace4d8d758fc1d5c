//! Session lifecycle state machine
//!
//! A session moves through a small, monotone status graph: it is opened in
//! `Playing`, and a single explicit player action moves it into one of the
//! terminal statuses (`Revealed` or `Quit`). Nothing ever leaves a terminal
//! status. The [`transition`] function is pure; callers apply the returned
//! status through the store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Lifecycle status of a game session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// The game is in progress and exchanges are admissible.
    Playing,
    /// The solution has been exposed; the game is informationally over.
    Revealed,
    /// The player abandoned the game without revealing.
    Quit,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Playing => "PLAYING",
            SessionStatus::Revealed => "REVEALED",
            SessionStatus::Quit => "QUIT",
        }
    }

    /// Terminal statuses admit no further actions.
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::Playing)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PLAYING" => Ok(SessionStatus::Playing),
            "REVEALED" => Ok(SessionStatus::Revealed),
            "QUIT" => Ok(SessionStatus::Quit),
            other => Err(StateError::UnknownStatus(other.to_string())),
        }
    }
}

/// Player-initiated actions the state machine gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerAction {
    /// Submit a question (one exchange). Does not change the status.
    Ask,
    /// Expose the solution and end the game.
    Reveal,
    /// Abandon the game without revealing.
    Quit,
}

impl PlayerAction {
    pub fn as_str(self) -> &'static str {
        match self {
            PlayerAction::Ask => "ask",
            PlayerAction::Reveal => "reveal",
            PlayerAction::Quit => "quit",
        }
    }
}

impl fmt::Display for PlayerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the state machine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("cannot {action} a session that is {status}")]
    NotPlaying {
        action: PlayerAction,
        status: SessionStatus,
    },
    #[error("unknown session status: {0}")]
    UnknownStatus(String),
}

/// Pure transition function.
///
/// Every action requires the session to be `Playing`; an action against a
/// terminal status is rejected so the caller can refuse it before touching
/// any state.
pub fn transition(status: SessionStatus, action: PlayerAction) -> Result<SessionStatus, StateError> {
    match (status, action) {
        (SessionStatus::Playing, PlayerAction::Ask) => Ok(SessionStatus::Playing),
        (SessionStatus::Playing, PlayerAction::Reveal) => Ok(SessionStatus::Revealed),
        (SessionStatus::Playing, PlayerAction::Quit) => Ok(SessionStatus::Quit),
        (status, action) => Err(StateError::NotPlaying { action, status }),
    }
}
