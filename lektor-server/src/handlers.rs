use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use lektor_core::{PrioritizeOutcome, Scheduler};
use lektor_model::{LectureId, QueueSnapshot};
use serde_json::{Value, json};
use tracing::info;

use crate::errors::AppError;

/// Shared state of the control plane.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/queues", get(queues))
        .route("/prioritize/{id}", post(prioritize))
        .with_state(state)
}

/// Liveness check.
async fn ping() -> &'static str {
    "pong"
}

/// Snapshot of all five queues. Each queue is copied under its own mutex;
/// the response is not one consistent instant across queues.
async fn queues(State(state): State<AppState>) -> Json<QueueSnapshot> {
    Json(state.scheduler.snapshot().await)
}

/// Ask for a specific lecture to be worked next.
async fn prioritize(
    State(state): State<AppState>,
    Path(id): Path<LectureId>,
) -> Result<Json<Value>, AppError> {
    let outcome = state.scheduler.prioritize(id).await;
    info!(%id, ?outcome, "prioritize requested");
    let message = match outcome {
        PrioritizeOutcome::Prioritized => format!("ID {id} prioritized."),
        PrioritizeOutcome::AlreadyPrioritized => {
            format!("ID {id} is already prioritized.")
        }
        PrioritizeOutcome::AlreadyInFlight => {
            return Err(AppError::conflict(format!(
                "ID {id} is already being processed."
            )));
        }
        PrioritizeOutcome::NotAvailable => {
            return Err(AppError::not_found(format!(
                "ID {id} cannot be prioritized as it is not available."
            )));
        }
    };
    Ok(Json(json!({ "message": message })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use lektor_core::testing::{MemoryStore, StaticResolver};
    use lektor_model::ProbeStatus;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    fn id(raw: u32) -> LectureId {
        LectureId::new(raw).unwrap()
    }

    async fn test_state() -> (AppState, Arc<StaticResolver>) {
        let resolver = Arc::new(StaticResolver::with_default(ProbeStatus::Available));
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&resolver) as Arc<dyn lektor_core::LectureResolver>,
            Arc::new(MemoryStore::default()),
            Duration::from_secs(1200),
            CancellationToken::new(),
        ));
        (AppState { scheduler }, resolver)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn ping_answers_pong() {
        let (state, _) = test_state().await;
        let response = router(state)
            .oneshot(Request::get("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"pong");
    }

    #[tokio::test]
    async fn queues_returns_all_five() {
        let (state, _) = test_state().await;
        state.scheduler.forward().replace([id(101), id(102)]).await;
        state.scheduler.in_flight().add(id(99)).await;

        let response = router(state)
            .oneshot(Request::get("/queues").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["forward"], json!([101, 102]));
        assert_eq!(body["in_flight"], json!([99]));
        assert_eq!(body["priority"], json!([]));
        assert_eq!(body["in_between"], json!([]));
        assert_eq!(body["backward"], json!([]));
    }

    #[tokio::test]
    async fn prioritize_reports_each_outcome() {
        let (state, resolver) = test_state().await;
        resolver.set(id(66), ProbeStatus::Forbidden).await;
        state.scheduler.in_between().replace([id(95), id(92)]).await;
        state.scheduler.in_flight().add(id(42)).await;

        let app = router(state.clone());

        let response = app
            .clone()
            .oneshot(Request::post("/prioritize/95").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["message"], "ID 95 prioritized.");
        assert_eq!(state.scheduler.priority().snapshot().await, vec![id(95)]);
        assert_eq!(state.scheduler.in_between().snapshot().await, vec![id(92)]);

        let response = app
            .clone()
            .oneshot(Request::post("/prioritize/95").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["message"], "ID 95 is already prioritized.");

        let response = app
            .clone()
            .oneshot(Request::post("/prioritize/42").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["error"]["message"], "ID 42 is already being processed.");

        let response = app
            .clone()
            .oneshot(Request::post("/prioritize/66").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(
            body["error"]["message"],
            "ID 66 cannot be prioritized as it is not available."
        );
    }

    #[tokio::test]
    async fn prioritize_rejects_a_malformed_id() {
        let (state, _) = test_state().await;
        let response = router(state)
            .oneshot(Request::post("/prioritize/0").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }
}
