// Provider webhook ingestion

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use outreach_engine::{ActivityOutcome, OutreachEngine, WebhookPayload};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::common::{ApiResult, ErrorResponse};

/// Acknowledgement returned to the webhook sender
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookAccepted {
    /// Always "accepted"; pause outcomes are not reported to the sender.
    #[schema(example = "accepted")]
    pub status: String,
}

/// App state for webhook routes
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<OutreachEngine>,
}

impl AppState {
    pub fn new(engine: Arc<OutreachEngine>) -> Self {
        Self { engine }
    }
}

/// Create webhook routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/email", post(receive_email_event))
        .with_state(state)
}

/// POST /webhooks/email - Record an inbound email event
#[utoipa::path(
    post,
    path = "/webhooks/email",
    request_body = WebhookPayload,
    responses(
        (status = 202, description = "Event recorded (or already recorded)", body = WebhookAccepted),
        (status = 400, description = "Malformed payload", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "webhooks"
)]
pub async fn receive_email_event(
    State(state): State<AppState>,
    payload: Result<Json<WebhookPayload>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<WebhookAccepted>)> {
    let Json(payload) = payload?;
    let lead_id = payload.lead_id;
    let outcome = state.engine.ingest_webhook(payload).await?;

    match outcome {
        ActivityOutcome::Duplicate => {
            tracing::debug!(lead_id = %lead_id, "Duplicate webhook delivery ignored")
        }
        ActivityOutcome::Paused(reason) => {
            tracing::info!(lead_id = %lead_id, reason = %reason, "Webhook paused lead workflow")
        }
        _ => {}
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(WebhookAccepted {
            status: "accepted".to_string(),
        }),
    ))
}
