//! Inbound HTTP endpoints.
//!
//! `POST /webhook` hands the event to the orchestrator and answers `202` as
//! soon as it is queued; the reply is delivered later by the queue worker.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::error::ChannelError;
use crate::pipeline::{InboundEvent, Orchestrator};
use crate::store::traits::JobStore;

/// Shared state for the webhook routes.
#[derive(Clone)]
pub struct WebhookState {
    pub orchestrator: Arc<Orchestrator>,
    pub jobs: Arc<dyn JobStore>,
}

/// POST /webhook
///
/// Returns `202 {accepted, queued}`. Rejected senders get `202` too, so the
/// provider does not redeliver. Storage failures return `500` so it does.
async fn receive(
    State(state): State<WebhookState>,
    Json(event): Json<InboundEvent>,
) -> impl IntoResponse {
    if let Err(e) = validate(&event) {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": e.to_string()})),
        )
            .into_response();
    }

    match state.orchestrator.process_message(event).await {
        Ok(outcome) => (StatusCode::ACCEPTED, Json(outcome)).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to process inbound message");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "temporarily unavailable"})),
            )
                .into_response()
        }
    }
}

fn validate(event: &InboundEvent) -> Result<(), ChannelError> {
    if event.channel_address.trim().is_empty() {
        return Err(ChannelError::InvalidMessage("channel_address is empty".into()));
    }
    if event.external_message_id.trim().is_empty() {
        return Err(ChannelError::InvalidMessage(
            "external_message_id is empty".into(),
        ));
    }
    Ok(())
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// GET /api/queue/stats
///
/// Job counts per status.
async fn queue_stats(State(state): State<WebhookState>) -> impl IntoResponse {
    match state.jobs.job_counts().await {
        Ok(counts) => Json(counts).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to read queue stats");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "queue stats unavailable"})),
            )
                .into_response()
        }
    }
}

/// Build the inbound routes.
pub fn webhook_routes(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook", post(receive))
        .route("/health", get(health))
        .route("/api/queue/stats", get(queue_stats))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::config::{AdmissionConfig, DEFAULT_MEDIA_FALLBACK};
    use crate::media::NoopEnricher;
    use crate::pipeline::AdmissionClassifier;
    use crate::store::LibSqlBackend;

    async fn app() -> Router {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let orchestrator = Orchestrator::new(
            AdmissionClassifier::new(db.clone(), &AdmissionConfig::default()),
            db.clone(),
            db.clone(),
            db.clone(),
            Arc::new(NoopEnricher),
            DEFAULT_MEDIA_FALLBACK.to_string(),
            3,
        );
        webhook_routes(WebhookState {
            orchestrator: Arc::new(orchestrator),
            jobs: db,
        })
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_ok() {
        let resp = app()
            .await
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn rejected_sender_still_gets_202() {
        let resp = app()
            .await
            .oneshot(post_json(
                "/webhook",
                serde_json::json!({
                    "external_message_id": "wamid.1",
                    "channel_address": "5511999990000",
                    "text": "oi"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let body = body_json(resp).await;
        assert_eq!(body["accepted"], false);
        assert_eq!(body["queued"], false);
    }

    #[tokio::test]
    async fn empty_address_is_bad_request() {
        let resp = app()
            .await
            .oneshot(post_json(
                "/webhook",
                serde_json::json!({
                    "external_message_id": "wamid.1",
                    "channel_address": " ",
                    "text": "Sou corretor"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stats_start_empty() {
        let resp = app()
            .await
            .oneshot(Request::get("/api/queue/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["pending"], 0);
        assert_eq!(body["failed"], 0);
    }
}
