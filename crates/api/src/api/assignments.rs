// Assignment and entity HTTP routes

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use outreach_engine::{
    AssignmentHistoryEntry, AssignmentOutcome, BulkAssignResult, EntityRecord, EntityType,
    OutreachEngine,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::actor::RequestActor;
use super::common::{ApiError, ApiResult, ErrorResponse, ListResponse};

/// Request to assign an owner (a user or a workflow id)
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AssignRequest {
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub owner_id: Uuid,
    /// Entity version the caller last read; stale values are rejected with 409.
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Request to move an owned entity to another owner
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ReassignRequest {
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    /// Required; reassigning to nobody is an unassign.
    pub new_owner_id: Option<Uuid>,
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Request to clear an entity's owner
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct UnassignRequest {
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Request to assign many entities to one owner
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct BulkAssignRequest {
    pub entity_type: EntityType,
    pub entity_ids: Vec<Uuid>,
    pub owner_id: Uuid,
}

/// Per-entity results plus the human-readable summary
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BulkAssignResponse {
    #[serde(flatten)]
    pub result: BulkAssignResult,
    /// "Successfully assigned S of N leads"
    #[schema(example = "Successfully assigned 2 of 3 leads")]
    pub summary: String,
    /// "F leads could not be assigned", present only on partial failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Request to register a lead or company, or refresh its contact fields
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RegisterEntityRequest {
    pub entity_type: EntityType,
    /// Generated when absent.
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
}

/// App state for assignment routes
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<OutreachEngine>,
}

impl AppState {
    pub fn new(engine: Arc<OutreachEngine>) -> Self {
        Self { engine }
    }
}

/// Create assignment routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/assignments/assign", post(assign))
        .route("/v1/assignments/reassign", post(reassign))
        .route("/v1/assignments/unassign", post(unassign))
        .route("/v1/assignments/bulk", post(bulk_assign))
        .route("/v1/leads/{lead_id}/assignments", get(lead_history))
        .route("/v1/companies/{company_id}/assignments", get(company_history))
        .route("/v1/entities", post(register_entity))
        .route("/v1/entities/{entity_type}/{entity_id}", get(get_entity))
        .with_state(state)
}

/// POST /v1/assignments/assign - Assign an owner
#[utoipa::path(
    post,
    path = "/v1/assignments/assign",
    request_body = AssignRequest,
    params(
        ("x-actor-id" = Uuid, Header, description = "Calling user"),
        ("x-actor-admin" = Option<bool>, Header, description = "Caller holds the admin role")
    ),
    responses(
        (status = 200, description = "Assignment applied (sync failures reported inline)", body = AssignmentOutcome),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 403, description = "Company assignment requires admin", body = ErrorResponse),
        (status = 404, description = "Entity not found", body = ErrorResponse),
        (status = 409, description = "Concurrent modification", body = ErrorResponse)
    ),
    tag = "assignments"
)]
pub async fn assign(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    req: Result<Json<AssignRequest>, JsonRejection>,
) -> ApiResult<Json<AssignmentOutcome>> {
    let Json(req) = req?;
    let outcome = state
        .engine
        .coordinator()
        .assign(
            req.entity_type,
            req.entity_id,
            req.owner_id,
            actor,
            req.expected_version,
        )
        .await?;
    Ok(Json(outcome))
}

/// POST /v1/assignments/reassign - Move an entity to a new owner
#[utoipa::path(
    post,
    path = "/v1/assignments/reassign",
    request_body = ReassignRequest,
    params(
        ("x-actor-id" = Uuid, Header, description = "Calling user"),
        ("x-actor-admin" = Option<bool>, Header, description = "Caller holds the admin role")
    ),
    responses(
        (status = 200, description = "Reassignment applied", body = AssignmentOutcome),
        (status = 400, description = "Missing new owner or invalid request", body = ErrorResponse),
        (status = 403, description = "Company assignment requires admin", body = ErrorResponse),
        (status = 404, description = "Entity not found", body = ErrorResponse),
        (status = 409, description = "Concurrent modification", body = ErrorResponse)
    ),
    tag = "assignments"
)]
pub async fn reassign(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    req: Result<Json<ReassignRequest>, JsonRejection>,
) -> ApiResult<Json<AssignmentOutcome>> {
    let Json(req) = req?;
    let new_owner_id = req
        .new_owner_id
        .ok_or_else(|| ApiError::bad_request("new_owner_id is required for reassignment"))?;
    let outcome = state
        .engine
        .coordinator()
        .reassign(
            req.entity_type,
            req.entity_id,
            new_owner_id,
            actor,
            req.expected_version,
        )
        .await?;
    Ok(Json(outcome))
}

/// POST /v1/assignments/unassign - Clear an entity's owner
#[utoipa::path(
    post,
    path = "/v1/assignments/unassign",
    request_body = UnassignRequest,
    params(
        ("x-actor-id" = Uuid, Header, description = "Calling user"),
        ("x-actor-admin" = Option<bool>, Header, description = "Caller holds the admin role")
    ),
    responses(
        (status = 200, description = "Owner cleared", body = AssignmentOutcome),
        (status = 403, description = "Company assignment requires admin", body = ErrorResponse),
        (status = 404, description = "Entity not found", body = ErrorResponse),
        (status = 409, description = "Concurrent modification", body = ErrorResponse)
    ),
    tag = "assignments"
)]
pub async fn unassign(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    req: Result<Json<UnassignRequest>, JsonRejection>,
) -> ApiResult<Json<AssignmentOutcome>> {
    let Json(req) = req?;
    let outcome = state
        .engine
        .coordinator()
        .unassign(req.entity_type, req.entity_id, actor, req.expected_version)
        .await?;
    Ok(Json(outcome))
}

/// POST /v1/assignments/bulk - Assign many entities; failures are per entity
#[utoipa::path(
    post,
    path = "/v1/assignments/bulk",
    request_body = BulkAssignRequest,
    params(
        ("x-actor-id" = Uuid, Header, description = "Calling user"),
        ("x-actor-admin" = Option<bool>, Header, description = "Caller holds the admin role")
    ),
    responses(
        (status = 200, description = "Per-entity outcome", body = BulkAssignResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse)
    ),
    tag = "assignments"
)]
pub async fn bulk_assign(
    State(state): State<AppState>,
    RequestActor(actor): RequestActor,
    req: Result<Json<BulkAssignRequest>, JsonRejection>,
) -> ApiResult<Json<BulkAssignResponse>> {
    let Json(req) = req?;
    if req.entity_ids.is_empty() {
        return Err(ApiError::bad_request("entity_ids must not be empty"));
    }
    let result = state
        .engine
        .coordinator()
        .bulk_assign(req.entity_type, &req.entity_ids, req.owner_id, actor)
        .await;
    Ok(Json(BulkAssignResponse {
        summary: result.summary(),
        warning: result.failure_warning(),
        result,
    }))
}

/// GET /v1/leads/{lead_id}/assignments - Lead assignment history, newest first
#[utoipa::path(
    get,
    path = "/v1/leads/{lead_id}/assignments",
    params(("lead_id" = Uuid, Path, description = "Lead ID")),
    responses(
        (status = 200, description = "Assignment history", body = ListResponse<AssignmentHistoryEntry>)
    ),
    tag = "assignments"
)]
pub async fn lead_history(
    State(state): State<AppState>,
    Path(entity_id): Path<Uuid>,
) -> ApiResult<Json<ListResponse<AssignmentHistoryEntry>>> {
    history(&state, EntityType::Lead, entity_id).await
}

/// GET /v1/companies/{company_id}/assignments - Company assignment history, newest first
#[utoipa::path(
    get,
    path = "/v1/companies/{company_id}/assignments",
    params(("company_id" = Uuid, Path, description = "Company ID")),
    responses(
        (status = 200, description = "Assignment history", body = ListResponse<AssignmentHistoryEntry>)
    ),
    tag = "assignments"
)]
pub async fn company_history(
    State(state): State<AppState>,
    Path(entity_id): Path<Uuid>,
) -> ApiResult<Json<ListResponse<AssignmentHistoryEntry>>> {
    history(&state, EntityType::Company, entity_id).await
}

async fn history(
    state: &AppState,
    entity_type: EntityType,
    entity_id: Uuid,
) -> ApiResult<Json<ListResponse<AssignmentHistoryEntry>>> {
    let entries = state
        .engine
        .coordinator()
        .history(entity_type, entity_id)
        .await?;
    Ok(Json(ListResponse::new(entries)))
}

/// POST /v1/entities - Register a lead or company
#[utoipa::path(
    post,
    path = "/v1/entities",
    request_body = RegisterEntityRequest,
    responses(
        (status = 201, description = "Entity stored", body = EntityRecord),
        (status = 400, description = "Invalid entity", body = ErrorResponse)
    ),
    tag = "entities"
)]
pub async fn register_entity(
    State(state): State<AppState>,
    req: Result<Json<RegisterEntityRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<EntityRecord>)> {
    let Json(req) = req?;
    let missing_email = req.email.as_deref().map_or(true, |e| e.trim().is_empty());
    if req.entity_type == EntityType::Lead && missing_email {
        return Err(ApiError::bad_request("leads need an email address"));
    }
    let record = EntityRecord {
        entity_type: req.entity_type,
        id: req.id.unwrap_or_else(Uuid::now_v7),
        owner_id: None,
        email: req.email,
        first_name: req.first_name,
        last_name: req.last_name,
        company: req.company,
        version: 0,
        updated_at: Utc::now(),
    };
    let stored = state.engine.coordinator().put_entity(record).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

/// GET /v1/entities/{entity_type}/{entity_id} - Get a lead or company
#[utoipa::path(
    get,
    path = "/v1/entities/{entity_type}/{entity_id}",
    params(
        ("entity_type" = String, Path, description = "lead or company"),
        ("entity_id" = Uuid, Path, description = "Entity ID")
    ),
    responses(
        (status = 200, description = "Entity found", body = EntityRecord),
        (status = 400, description = "Unknown entity type", body = ErrorResponse),
        (status = 404, description = "Entity not found", body = ErrorResponse)
    ),
    tag = "entities"
)]
pub async fn get_entity(
    State(state): State<AppState>,
    Path((entity_type, entity_id)): Path<(String, Uuid)>,
) -> ApiResult<Json<EntityRecord>> {
    let entity_type: EntityType = entity_type.parse()?;
    let record = state
        .engine
        .coordinator()
        .get_entity(entity_type, entity_id)
        .await?;
    Ok(Json(record))
}
