// OpenAPI specification
//
// Shared by the server (Swagger UI) and tests.

use crate::api;
use crate::api::{ErrorResponse, ListResponse};
use outreach_engine::{
    ActivityEvent, ActivityType, AssignmentHistoryEntry, AssignmentOutcome, BulkAssignResult,
    BulkFailure, ConditionStep, ConditionType, CreateWorkflow, EmailStep, EntityRecord,
    EntityType, ExternalSyncFailure, LeadWorkflowState, PauseCause, PauseRules,
    ProviderBinding, ProviderContactId, RunStatus, SendTiming, SequenceStep, StepAction, StepKind,
    SyncReport, WaitStep, WaitUnit, WebhookPayload, Workflow, WorkflowPatch, WorkflowStatus,
};
use utoipa::OpenApi;

/// OpenAPI documentation for the Outreach API
#[derive(OpenApi)]
#[openapi(
    paths(
        api::webhooks::receive_email_event,
        api::workflows::create_workflow,
        api::workflows::list_workflows,
        api::workflows::get_workflow,
        api::workflows::update_workflow,
        api::workflows::delete_workflow,
        api::workflows::activate_workflow,
        api::workflows::pause_workflow,
        api::workflows::archive_workflow,
        api::workflows::add_step,
        api::workflows::reorder_steps,
        api::workflows::update_step,
        api::workflows::delete_step,
        api::assignments::assign,
        api::assignments::reassign,
        api::assignments::unassign,
        api::assignments::bulk_assign,
        api::assignments::lead_history,
        api::assignments::company_history,
        api::assignments::register_entity,
        api::assignments::get_entity,
        api::leads::get_workflow_state,
        api::leads::list_activity,
        api::leads::resume_lead,
        api::leads::pause_lead,
    ),
    components(
        schemas(
            ErrorResponse,
            // Workflows and steps
            Workflow, WorkflowStatus, CreateWorkflow, WorkflowPatch, ProviderBinding, PauseRules,
            SequenceStep, StepAction, StepKind, EmailStep, SendTiming, WaitStep, WaitUnit,
            ConditionStep, ConditionType,
            api::workflows::ListWorkflowsQuery,
            api::workflows::PauseWorkflowRequest, api::workflows::PauseWorkflowResponse,
            api::workflows::AddStepRequest, api::workflows::ReorderStepsRequest,
            ListResponse<Workflow>,
            // Lead runs and activity
            LeadWorkflowState, RunStatus, PauseCause, ActivityEvent, ActivityType,
            WebhookPayload, api::webhooks::WebhookAccepted,
            ListResponse<ActivityEvent>,
            // Assignments
            EntityType, EntityRecord, AssignmentHistoryEntry, AssignmentOutcome,
            BulkAssignResult, BulkFailure, SyncReport, ExternalSyncFailure, ProviderContactId,
            api::assignments::AssignRequest, api::assignments::ReassignRequest,
            api::assignments::UnassignRequest, api::assignments::BulkAssignRequest,
            api::assignments::BulkAssignResponse, api::assignments::RegisterEntityRequest,
            ListResponse<AssignmentHistoryEntry>,
        )
    ),
    tags(
        (name = "webhooks", description = "Inbound email provider events"),
        (name = "workflows", description = "Workflow and step management"),
        (name = "assignments", description = "Lead and company ownership"),
        (name = "entities", description = "Lead and company records"),
        (name = "leads", description = "Per-lead workflow runs")
    ),
    info(
        title = "Outreach API",
        version = "0.1.0",
        description = "API for outreach workflows, lead runs and assignments",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
pub struct ApiDoc;
