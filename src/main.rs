//! Turtle-soup game server
//!
//! Serves the question/answer exchange protocol over HTTP, backed by a
//! SQLite session store and a Gemini judge.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use turtle_soup::api::{create_router, AppState};
use turtle_soup::db::Database;
use turtle_soup::judge::{GeminiJudge, Judge, JudgeConfig, LoggingJudge};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "turtle_soup=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let db_path = std::env::var("SOUP_DB_PATH").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        format!("{home}/.turtle-soup/soup.db")
    });

    let port: u16 = std::env::var("SOUP_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);

    // Ensure database directory exists
    if let Some(parent) = PathBuf::from(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Initialize database
    tracing::info!(path = %db_path, "Opening database");
    let db = Database::open(&db_path)?;
    db.seed_demo_puzzles()?;

    // Initialize the judge
    let config = JudgeConfig::from_env();
    if !config.has_judge() {
        tracing::warn!("No judge API key configured. Set GEMINI_API_KEY; questions will fail until then.");
    }
    let gemini = GeminiJudge::new(
        config.gemini_api_key.clone().unwrap_or_default(),
        config.gateway.as_deref(),
    );
    let judge: Arc<dyn Judge> = Arc::new(LoggingJudge::new(Arc::new(gemini)));

    // Create application state
    let state = AppState::new(db, judge);

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors),
    );

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Turtle-soup server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
