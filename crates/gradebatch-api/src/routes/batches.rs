//! Batch job endpoints, including the grader report callbacks.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;
use gradebatch_core::item::{ItemOutcome, NewItem};
use gradebatch_core::job::{GraderWorkload, JobAction, JobSnapshot, Strategy};
use gradebatch_core::{GraderId, ResourceId};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_batches).post(submit_batch))
        .route("/{id}", get(get_batch))
        .route("/{id}/control", post(control_batch))
        .route("/{id}/graders", get(list_workloads))
        .route("/{id}/items/{item_id}/start", post(report_started))
        .route("/{id}/items/{item_id}/result", post(report_result))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitBatchRequest {
    exam_id: String,
    items: Vec<NewItem>,
    strategy: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitBatchResponse {
    job_id: String,
}

async fn submit_batch(
    State(state): State<AppState>,
    Json(req): Json<SubmitBatchRequest>,
) -> Result<(StatusCode, Json<SubmitBatchResponse>), ApiError> {
    let strategy: Strategy = req.strategy.parse()?;
    let job_id = state
        .orchestrator
        .submit_job(req.exam_id, req.items, strategy)?;
    Ok((
        StatusCode::CREATED,
        Json(SubmitBatchResponse {
            job_id: job_id.to_string(),
        }),
    ))
}

async fn list_batches(State(state): State<AppState>) -> Json<Vec<JobSnapshot>> {
    Json(state.orchestrator.list_jobs().await)
}

async fn get_batch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobSnapshot>, ApiError> {
    let snapshot = state
        .orchestrator
        .get_snapshot(ResourceId::from_uuid(id))
        .await?;
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
struct ControlRequest {
    action: String,
}

async fn control_batch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ControlRequest>,
) -> Result<Json<JobSnapshot>, ApiError> {
    let action: JobAction = req.action.parse()?;
    let snapshot = state
        .orchestrator
        .control_job(ResourceId::from_uuid(id), action)
        .await?;
    Ok(Json(snapshot))
}

async fn list_workloads(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<GraderWorkload>>, ApiError> {
    let workloads = state
        .orchestrator
        .list_grader_workloads(ResourceId::from_uuid(id))
        .await?;
    Ok(Json(workloads))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartedRequest {
    grader_id: GraderId,
}

async fn report_started(
    State(state): State<AppState>,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<StartedRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .orchestrator
        .report_item_started(
            ResourceId::from_uuid(id),
            ResourceId::from_uuid(item_id),
            &req.grader_id,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultRequest {
    grader_id: GraderId,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

impl ResultRequest {
    fn into_outcome(self) -> Result<(GraderId, ItemOutcome), ApiError> {
        let outcome = match (self.result, self.error) {
            (Some(value), None) => ItemOutcome::Success(value),
            (None, Some(message)) => ItemOutcome::Error(message),
            _ => {
                return Err(ApiError::BadRequest(
                    "exactly one of result or error must be set".to_string(),
                ));
            }
        };
        Ok((self.grader_id, outcome))
    }
}

async fn report_result(
    State(state): State<AppState>,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<ResultRequest>,
) -> Result<Json<JobSnapshot>, ApiError> {
    let (grader_id, outcome) = req.into_outcome()?;
    let snapshot = state
        .orchestrator
        .report_item_result(
            ResourceId::from_uuid(id),
            ResourceId::from_uuid(item_id),
            &grader_id,
            outcome,
        )
        .await?;
    Ok(Json(snapshot))
}
