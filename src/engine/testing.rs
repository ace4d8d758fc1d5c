//! Test support for exercising the engine without a live judge.

use super::{DatabaseStore, ExchangeEngine};
use crate::db::{Database, NewPuzzle, Session, SoupType, User};
use crate::judge::{AnswerCategory, Judge, JudgeError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Sentinel embedded in the test puzzle's solution so leak checks can grep
/// serialized payloads for it.
pub const SECRET_BOTTOM: &str = "the captain's sealed logbook";

const TEST_PUZZLE: NewPuzzle = NewPuzzle {
    title: "The Silent Harbor",
    soup_type: SoupType::Red,
    difficulty: 3,
    tags: &["test"],
    surface: "A ship drifts back into harbor with nobody aboard. Why?",
    bottom: "The crew abandoned ship after reading the captain's sealed logbook, \
             which revealed he had sailed them into a quarantined port.",
    hint_list: &["Something written made them leave."],
};

/// A judge that replays a script, then falls back to a fixed answer or an
/// outage.
pub struct ScriptedJudge {
    script: Mutex<VecDeque<Result<AnswerCategory, JudgeError>>>,
    fallback: Option<AnswerCategory>,
}

impl ScriptedJudge {
    /// Always answer with the same category.
    pub fn always(category: AnswerCategory) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(category),
        }
    }

    /// Fail every classification with a retryable network error.
    pub fn failing() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: None,
        }
    }

    /// Replay the given results in order, then behave like [`Self::failing`].
    pub fn sequence(results: Vec<Result<AnswerCategory, JudgeError>>) -> Self {
        Self {
            script: Mutex::new(results.into()),
            fallback: None,
        }
    }
}

#[async_trait]
impl Judge for ScriptedJudge {
    async fn classify(
        &self,
        _question: &str,
        _surface: &str,
        _bottom: &str,
    ) -> Result<AnswerCategory, JudgeError> {
        if let Some(result) = self.script.lock().unwrap().pop_front() {
            return result;
        }
        self.fallback
            .ok_or_else(|| JudgeError::network("scripted judge outage"))
    }

    fn model_id(&self) -> &str {
        "scripted"
    }
}

/// A seeded in-memory engine plus the records its tests need.
pub struct Harness {
    pub engine: ExchangeEngine<DatabaseStore, Arc<dyn Judge>>,
    pub db: Database,
    pub user: User,
    pub session: Session,
}

/// Engine over an in-memory store with a judge that always answers
/// `category`, plus one open session.
pub fn harness(category: AnswerCategory) -> Harness {
    harness_with_judge(ScriptedJudge::always(category))
}

pub fn harness_with_judge(judge: ScriptedJudge) -> Harness {
    let db = Database::open_in_memory().unwrap();
    let user = db.get_or_create_user("test-player").unwrap();
    let puzzle = db.insert_puzzle(&TEST_PUZZLE).unwrap();
    let session = db
        .create_session(&user.id, &puzzle, Some("Turtle Soup · The Silent Harbor"))
        .unwrap();

    let judge: Arc<dyn Judge> = Arc::new(judge);
    let engine = ExchangeEngine::new(DatabaseStore::new(db.clone()), judge);

    Harness {
        engine,
        db,
        user,
        session,
    }
}
