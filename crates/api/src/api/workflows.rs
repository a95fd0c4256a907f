// Workflow and step management HTTP routes

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;
use outreach_engine::{
    CreateWorkflow, OutreachEngine, SequenceStep, StepAction, StepKind, Workflow, WorkflowPatch,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::common::{ApiResult, ErrorResponse, ListResponse};

/// Query parameters for listing workflows
#[derive(Debug, Clone, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct ListWorkflowsQuery {
    /// Only workflows owned by this user.
    pub owner_id: Option<Uuid>,
}

/// Request to pause a workflow
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct PauseWorkflowRequest {
    /// Free-text reason recorded on the pause.
    #[serde(default)]
    #[schema(example = "Quarterly copy review")]
    pub reason: Option<String>,
    /// Also pause every active lead-run bound to the workflow.
    #[serde(default)]
    pub cascade: bool,
}

/// Result of pausing a workflow
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PauseWorkflowResponse {
    pub workflow: Workflow,
    /// Leads paused by the cascade.
    pub paused_leads: Vec<Uuid>,
}

/// Request to add a step: either a bare kind (default configuration) or a
/// full step definition.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum AddStepRequest {
    Action(StepAction),
    Kind {
        #[schema(example = "email")]
        kind: StepKind,
    },
}

/// Request to reorder a workflow's steps
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ReorderStepsRequest {
    /// Every step id of the workflow, in the new order.
    pub step_ids: Vec<Uuid>,
}

/// App state for workflow routes
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<OutreachEngine>,
}

impl AppState {
    pub fn new(engine: Arc<OutreachEngine>) -> Self {
        Self { engine }
    }
}

/// Create workflow routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/workflows", post(create_workflow).get(list_workflows))
        .route(
            "/v1/workflows/{workflow_id}",
            get(get_workflow)
                .patch(update_workflow)
                .delete(delete_workflow),
        )
        .route("/v1/workflows/{workflow_id}/activate", post(activate_workflow))
        .route("/v1/workflows/{workflow_id}/pause", post(pause_workflow))
        .route("/v1/workflows/{workflow_id}/archive", post(archive_workflow))
        .route("/v1/workflows/{workflow_id}/steps", post(add_step))
        .route("/v1/workflows/{workflow_id}/steps/order", post(reorder_steps))
        .route(
            "/v1/workflows/{workflow_id}/steps/{step_id}",
            patch(update_step).delete(delete_step),
        )
        .with_state(state)
}

/// POST /v1/workflows - Create a draft workflow
#[utoipa::path(
    post,
    path = "/v1/workflows",
    request_body = CreateWorkflow,
    responses(
        (status = 201, description = "Workflow created", body = Workflow),
        (status = 400, description = "Invalid workflow", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn create_workflow(
    State(state): State<AppState>,
    req: Result<Json<CreateWorkflow>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Workflow>)> {
    let Json(req) = req?;
    let workflow = state.engine.workflows().create(req, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

/// GET /v1/workflows - List workflows
#[utoipa::path(
    get,
    path = "/v1/workflows",
    params(ListWorkflowsQuery),
    responses(
        (status = 200, description = "List of workflows", body = ListResponse<Workflow>),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<ListWorkflowsQuery>,
) -> ApiResult<Json<ListResponse<Workflow>>> {
    let workflows = state.engine.workflows().list(query.owner_id).await?;
    Ok(Json(ListResponse::new(workflows)))
}

/// GET /v1/workflows/{workflow_id} - Get workflow by ID
#[utoipa::path(
    get,
    path = "/v1/workflows/{workflow_id}",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "Workflow found", body = Workflow),
        (status = 404, description = "Workflow not found", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<Json<Workflow>> {
    Ok(Json(state.engine.workflows().get(workflow_id).await?))
}

/// PATCH /v1/workflows/{workflow_id} - Update workflow settings
#[utoipa::path(
    patch,
    path = "/v1/workflows/{workflow_id}",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    request_body = WorkflowPatch,
    responses(
        (status = 200, description = "Workflow updated", body = Workflow),
        (status = 400, description = "Invalid update", body = ErrorResponse),
        (status = 404, description = "Workflow not found", body = ErrorResponse),
        (status = 409, description = "Stale expected_version", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn update_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    req: Result<Json<WorkflowPatch>, JsonRejection>,
) -> ApiResult<Json<Workflow>> {
    let Json(req) = req?;
    let workflow = state
        .engine
        .workflows()
        .update(workflow_id, req, Utc::now())
        .await?;
    Ok(Json(workflow))
}

/// DELETE /v1/workflows/{workflow_id} - Delete a workflow with no bound leads
#[utoipa::path(
    delete,
    path = "/v1/workflows/{workflow_id}",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 204, description = "Workflow deleted"),
        (status = 404, description = "Workflow not found", body = ErrorResponse),
        (status = 409, description = "Leads are still bound to the workflow", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn delete_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.engine.workflows().delete(workflow_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/workflows/{workflow_id}/activate - Activate a draft or paused workflow
#[utoipa::path(
    post,
    path = "/v1/workflows/{workflow_id}/activate",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "Workflow active", body = Workflow),
        (status = 400, description = "Workflow is not runnable", body = ErrorResponse),
        (status = 404, description = "Workflow not found", body = ErrorResponse),
        (status = 409, description = "Workflow is archived", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn activate_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<Json<Workflow>> {
    let workflow = state
        .engine
        .state_machine()
        .activate(workflow_id, Utc::now())
        .await?;
    Ok(Json(workflow))
}

/// POST /v1/workflows/{workflow_id}/pause - Pause a workflow
#[utoipa::path(
    post,
    path = "/v1/workflows/{workflow_id}/pause",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    request_body = PauseWorkflowRequest,
    responses(
        (status = 200, description = "Workflow paused", body = PauseWorkflowResponse),
        (status = 404, description = "Workflow not found", body = ErrorResponse),
        (status = 409, description = "Workflow is not active", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn pause_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    req: Option<Json<PauseWorkflowRequest>>,
) -> ApiResult<Json<PauseWorkflowResponse>> {
    let req = req.map(|Json(r)| r).unwrap_or_default();
    let report = state
        .engine
        .state_machine()
        .pause_workflow(workflow_id, req.reason.as_deref(), req.cascade, Utc::now())
        .await?;
    Ok(Json(PauseWorkflowResponse {
        workflow: report.workflow,
        paused_leads: report.paused_leads,
    }))
}

/// POST /v1/workflows/{workflow_id}/archive - Archive a workflow (terminal)
#[utoipa::path(
    post,
    path = "/v1/workflows/{workflow_id}/archive",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    responses(
        (status = 200, description = "Workflow archived", body = Workflow),
        (status = 404, description = "Workflow not found", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn archive_workflow(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
) -> ApiResult<Json<Workflow>> {
    let workflow = state
        .engine
        .state_machine()
        .archive(workflow_id, Utc::now())
        .await?;
    Ok(Json(workflow))
}

/// POST /v1/workflows/{workflow_id}/steps - Append a step
#[utoipa::path(
    post,
    path = "/v1/workflows/{workflow_id}/steps",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    request_body = AddStepRequest,
    responses(
        (status = 201, description = "Step added", body = SequenceStep),
        (status = 400, description = "Invalid step", body = ErrorResponse),
        (status = 404, description = "Workflow not found", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn add_step(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    req: Result<Json<AddStepRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SequenceStep>)> {
    let Json(req) = req?;
    let now = Utc::now();
    let workflows = state.engine.workflows();
    let step = match req {
        AddStepRequest::Kind { kind } => workflows.add_step(workflow_id, kind, now).await?,
        AddStepRequest::Action(action) => {
            workflows.add_step_action(workflow_id, action, now).await?
        }
    };
    Ok((StatusCode::CREATED, Json(step)))
}

/// POST /v1/workflows/{workflow_id}/steps/order - Reorder steps
#[utoipa::path(
    post,
    path = "/v1/workflows/{workflow_id}/steps/order",
    params(("workflow_id" = Uuid, Path, description = "Workflow ID")),
    request_body = ReorderStepsRequest,
    responses(
        (status = 200, description = "Steps renumbered", body = Workflow),
        (status = 400, description = "Ids are not a permutation of the steps", body = ErrorResponse),
        (status = 404, description = "Workflow not found", body = ErrorResponse),
        (status = 409, description = "Leads are still running in the workflow", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn reorder_steps(
    State(state): State<AppState>,
    Path(workflow_id): Path<Uuid>,
    req: Result<Json<ReorderStepsRequest>, JsonRejection>,
) -> ApiResult<Json<Workflow>> {
    let Json(req) = req?;
    let workflow = state
        .engine
        .workflows()
        .reorder_steps(workflow_id, &req.step_ids, Utc::now())
        .await?;
    Ok(Json(workflow))
}

/// PATCH /v1/workflows/{workflow_id}/steps/{step_id} - Replace a step's configuration
#[utoipa::path(
    patch,
    path = "/v1/workflows/{workflow_id}/steps/{step_id}",
    params(
        ("workflow_id" = Uuid, Path, description = "Workflow ID"),
        ("step_id" = Uuid, Path, description = "Step ID")
    ),
    request_body = StepAction,
    responses(
        (status = 200, description = "Step updated", body = SequenceStep),
        (status = 400, description = "Invalid step", body = ErrorResponse),
        (status = 404, description = "Workflow or step not found", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn update_step(
    State(state): State<AppState>,
    Path((workflow_id, step_id)): Path<(Uuid, Uuid)>,
    req: Result<Json<StepAction>, JsonRejection>,
) -> ApiResult<Json<SequenceStep>> {
    let Json(action) = req?;
    let step = state
        .engine
        .workflows()
        .update_step(workflow_id, step_id, action, Utc::now())
        .await?;
    Ok(Json(step))
}

/// DELETE /v1/workflows/{workflow_id}/steps/{step_id} - Remove a step
#[utoipa::path(
    delete,
    path = "/v1/workflows/{workflow_id}/steps/{step_id}",
    params(
        ("workflow_id" = Uuid, Path, description = "Workflow ID"),
        ("step_id" = Uuid, Path, description = "Step ID")
    ),
    responses(
        (status = 204, description = "Step removed and remaining steps renumbered"),
        (status = 400, description = "Step is a branch target", body = ErrorResponse),
        (status = 404, description = "Workflow or step not found", body = ErrorResponse),
        (status = 409, description = "Leads are still running in the workflow", body = ErrorResponse)
    ),
    tag = "workflows"
)]
pub async fn delete_step(
    State(state): State<AppState>,
    Path((workflow_id, step_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    state
        .engine
        .workflows()
        .delete_step(workflow_id, step_id, Utc::now())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
