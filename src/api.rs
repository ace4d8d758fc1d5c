//! HTTP API for the turtle-soup service

mod handlers;
mod stream;
mod types;

pub use handlers::create_router;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::db::Database;
use crate::engine::{DatabaseStore, DbUserDirectory, ExchangeEngine, ProductionEngine, UserDirectory};
use crate::judge::Judge;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ProductionEngine>,
    pub users: Arc<dyn UserDirectory>,
}

impl AppState {
    pub fn new(db: Database, judge: Arc<dyn Judge>) -> Self {
        Self {
            engine: Arc::new(ExchangeEngine::new(DatabaseStore::new(db.clone()), judge)),
            users: Arc::new(DbUserDirectory::new(db)),
        }
    }
}
