//! API server for Gradebatch.
//!
//! Provides the HTTP REST API and a WebSocket event stream.

pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

pub use state::AppState;
