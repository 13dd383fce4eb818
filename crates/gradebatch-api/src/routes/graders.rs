//! Grader registry endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get};
use axum::{Json, Router};

use crate::AppState;
use crate::error::ApiError;
use gradebatch_core::GraderId;
use gradebatch_core::grader::{GraderInfo, GraderSpec};
use gradebatch_core::item::Assignment;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_graders).post(register_grader))
        .route("/{id}", delete(deregister_grader).get(get_grader))
        .route("/{id}/assignments", get(list_assignments))
}

async fn register_grader(
    State(state): State<AppState>,
    Json(spec): Json<GraderSpec>,
) -> Result<(StatusCode, Json<GraderInfo>), ApiError> {
    let info = state.orchestrator.register_grader(spec).await?;
    Ok((StatusCode::CREATED, Json(info)))
}

async fn list_graders(State(state): State<AppState>) -> Json<Vec<GraderInfo>> {
    Json(state.orchestrator.list_graders())
}

async fn get_grader(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<GraderInfo>, ApiError> {
    Ok(Json(state.orchestrator.grader(&GraderId::new(id))?))
}

async fn deregister_grader(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.orchestrator.deregister_grader(&GraderId::new(id))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_assignments(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Assignment>>, ApiError> {
    let assignments = state
        .orchestrator
        .grader_assignments(&GraderId::new(id))
        .await?;
    Ok(Json(assignments))
}
