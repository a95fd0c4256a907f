// Lead run HTTP routes

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use outreach_engine::{ActivityEvent, LeadWorkflowState, OutreachEngine};
use uuid::Uuid;

use super::common::{ApiResult, ErrorResponse, ListResponse};

/// App state for lead routes
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<OutreachEngine>,
}

impl AppState {
    pub fn new(engine: Arc<OutreachEngine>) -> Self {
        Self { engine }
    }
}

/// Create lead routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/leads/{lead_id}/workflow-state", get(get_workflow_state))
        .route("/v1/leads/{lead_id}/activity", get(list_activity))
        .route("/v1/leads/{lead_id}/resume", post(resume_lead))
        .route("/v1/leads/{lead_id}/pause", post(pause_lead))
        .with_state(state)
}

/// GET /v1/leads/{lead_id}/workflow-state - Current lead-run
#[utoipa::path(
    get,
    path = "/v1/leads/{lead_id}/workflow-state",
    params(("lead_id" = Uuid, Path, description = "Lead ID")),
    responses(
        (status = 200, description = "Lead-run found", body = LeadWorkflowState),
        (status = 404, description = "Lead has never been bound to a workflow", body = ErrorResponse)
    ),
    tag = "leads"
)]
pub async fn get_workflow_state(
    State(state): State<AppState>,
    Path(lead_id): Path<Uuid>,
) -> ApiResult<Json<LeadWorkflowState>> {
    Ok(Json(state.engine.get_lead_state(lead_id).await?))
}

/// GET /v1/leads/{lead_id}/activity - Activity events, newest first
#[utoipa::path(
    get,
    path = "/v1/leads/{lead_id}/activity",
    params(("lead_id" = Uuid, Path, description = "Lead ID")),
    responses(
        (status = 200, description = "Activity events", body = ListResponse<ActivityEvent>)
    ),
    tag = "leads"
)]
pub async fn list_activity(
    State(state): State<AppState>,
    Path(lead_id): Path<Uuid>,
) -> ApiResult<Json<ListResponse<ActivityEvent>>> {
    let events = state.engine.list_activity(lead_id).await?;
    Ok(Json(ListResponse::new(events)))
}

/// POST /v1/leads/{lead_id}/resume - Resume a paused lead-run
#[utoipa::path(
    post,
    path = "/v1/leads/{lead_id}/resume",
    params(("lead_id" = Uuid, Path, description = "Lead ID")),
    responses(
        (status = 200, description = "Lead-run active again", body = LeadWorkflowState),
        (status = 404, description = "No lead-run", body = ErrorResponse),
        (status = 409, description = "Lead-run is not paused or its workflow is not active", body = ErrorResponse)
    ),
    tag = "leads"
)]
pub async fn resume_lead(
    State(state): State<AppState>,
    Path(lead_id): Path<Uuid>,
) -> ApiResult<Json<LeadWorkflowState>> {
    Ok(Json(state.engine.resume_lead(lead_id).await?))
}

/// POST /v1/leads/{lead_id}/pause - Pause a lead-run by hand
#[utoipa::path(
    post,
    path = "/v1/leads/{lead_id}/pause",
    params(("lead_id" = Uuid, Path, description = "Lead ID")),
    responses(
        (status = 200, description = "Lead-run paused", body = LeadWorkflowState),
        (status = 400, description = "Workflow does not allow manual pause", body = ErrorResponse),
        (status = 404, description = "No lead-run", body = ErrorResponse),
        (status = 409, description = "Lead-run is not active", body = ErrorResponse)
    ),
    tag = "leads"
)]
pub async fn pause_lead(
    State(state): State<AppState>,
    Path(lead_id): Path<Uuid>,
) -> ApiResult<Json<LeadWorkflowState>> {
    Ok(Json(state.engine.pause_lead(lead_id).await?))
}
