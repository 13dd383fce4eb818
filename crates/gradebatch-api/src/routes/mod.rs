//! API routes.

pub mod batches;
pub mod graders;
pub mod health;

use crate::AppState;
use crate::ws::ws_handler;
use axum::Router;
use axum::routing::get;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/batches", batches::router())
        .nest("/graders", graders::router())
        .route("/ws", get(ws_handler))
        .merge(health::router())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, StatusCode};
    use gradebatch_config::SchedulerConfig;
    use gradebatch_scheduler::Orchestrator;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let orchestrator = Orchestrator::new(SchedulerConfig {
            seed: Some(1),
            ..Default::default()
        });
        router(AppState::new(Arc::new(orchestrator)))
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn submit(app: &Router, items: usize, strategy: &str) -> String {
        let items: Vec<Value> = (0..items)
            .map(|i| json!({ "payloadRef": format!("sheet-{}", i) }))
            .collect();
        let (status, body) = send(
            app,
            Method::POST,
            "/batches",
            Some(json!({ "examId": "exam-1", "items": items, "strategy": strategy })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["jobId"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let app = app();
        let (status, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (_, body) = send(&app, Method::GET, "/health/ready", None).await;
        assert_eq!(body["status"], "no_graders");
    }

    #[tokio::test]
    async fn test_batch_round_trip() {
        let app = app();
        let (status, _) = send(
            &app,
            Method::POST,
            "/graders",
            Some(json!({ "graderId": "g-1", "capacity": 2 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let job_id = submit(&app, 2, "balanced").await;
        let (status, snap) = send(
            &app,
            Method::POST,
            &format!("/batches/{}/control", job_id),
            Some(json!({ "action": "start" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(snap["state"], "processing");

        let (_, held) = send(&app, Method::GET, "/graders/g-1/assignments", None).await;
        let held = held.as_array().unwrap().clone();
        assert_eq!(held.len(), 2);

        for assignment in &held {
            let item_id = assignment["itemId"].as_str().unwrap();
            let base = format!("/batches/{}/items/{}", job_id, item_id);
            let (status, _) = send(
                &app,
                Method::POST,
                &format!("{}/start", base),
                Some(json!({ "graderId": "g-1" })),
            )
            .await;
            assert_eq!(status, StatusCode::NO_CONTENT);

            let (status, _) = send(
                &app,
                Method::POST,
                &format!("{}/result", base),
                Some(json!({ "graderId": "g-1", "result": { "score": 9 } })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, snap) = send(&app, Method::GET, &format!("/batches/{}", job_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(snap["state"], "completed");
        assert_eq!(snap["doneCount"], 2);
        assert_eq!(snap["completionRate"], 1.0);

        let (_, workloads) = send(
            &app,
            Method::GET,
            &format!("/batches/{}/graders", job_id),
            None,
        )
        .await;
        assert_eq!(workloads[0]["graderId"], "g-1");
        assert_eq!(workloads[0]["completedCount"], 2);

        let (_, jobs) = send(&app, Method::GET, "/batches", None).await;
        assert_eq!(jobs.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_strategy_is_bad_request() {
        let app = app();
        let (status, body) = send(
            &app,
            Method::POST,
            "/batches",
            Some(json!({ "examId": "exam-1", "items": [{ "payloadRef": "a" }], "strategy": "fastest" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("fastest"));
    }

    #[tokio::test]
    async fn test_unknown_batch_is_not_found() {
        let app = app();
        let uri = format!("/batches/{}", uuid::Uuid::now_v7());
        let (status, _) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_start_without_graders_is_unprocessable() {
        let app = app();
        let job_id = submit(&app, 3, "random").await;
        let (status, _) = send(
            &app,
            Method::POST,
            &format!("/batches/{}/control", job_id),
            Some(json!({ "action": "start" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (_, snap) = send(&app, Method::GET, &format!("/batches/{}", job_id), None).await;
        assert_eq!(snap["state"], "failed");
        assert_eq!(snap["doneCount"], 0);
    }

    #[tokio::test]
    async fn test_illegal_action_is_conflict() {
        let app = app();
        let job_id = submit(&app, 1, "workload").await;
        let (status, _) = send(
            &app,
            Method::POST,
            &format!("/batches/{}/control", job_id),
            Some(json!({ "action": "resume" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_result_needs_exactly_one_outcome() {
        let app = app();
        send(
            &app,
            Method::POST,
            "/graders",
            Some(json!({ "graderId": "g-1", "capacity": 1 })),
        )
        .await;
        let job_id = submit(&app, 1, "balanced").await;
        send(
            &app,
            Method::POST,
            &format!("/batches/{}/control", job_id),
            Some(json!({ "action": "start" })),
        )
        .await;
        let (_, held) = send(&app, Method::GET, "/graders/g-1/assignments", None).await;
        let item_id = held[0]["itemId"].as_str().unwrap().to_string();

        let (status, _) = send(
            &app,
            Method::POST,
            &format!("/batches/{}/items/{}/result", job_id, item_id),
            Some(json!({ "graderId": "g-1", "result": 1, "error": "boom" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Busy graders cannot be removed.
        let (status, _) = send(&app, Method::DELETE, "/graders/g-1", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
