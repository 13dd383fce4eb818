//! Health check endpoints.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Ready once at least one grader can take work.
async fn ready(State(state): State<AppState>) -> Json<Value> {
    let graders = state.orchestrator.pool().len();
    let status = if graders > 0 { "ready" } else { "no_graders" };
    Json(json!({ "status": status, "graders": graders }))
}
