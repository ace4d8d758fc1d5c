//! Turtle soup - a lateral-thinking puzzle game service
//!
//! A Rust backend (plus the bundled client layer) implementing the
//! turn-based question/answer protocol for "turtle soup" puzzles: players
//! ask closed-form questions about a hidden scenario and a judge answers
//! with one of a fixed set of categories. The crate covers the exchange
//! engine, the session lifecycle state machine, the streaming wire codec,
//! and the client-side reconciliation of optimistic state.

pub mod api;
pub mod client;
pub mod db;
pub mod engine;
pub mod judge;
pub mod state;
pub mod wire;
