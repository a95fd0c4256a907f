//! Store trait definitions
//!
//! Each engine component receives only the stores it needs. Every store is
//! thread-safe; versioned writes are compare-and-swap on the row's version.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{
    ActivityEvent, AssignmentHistoryEntry, EntityRecord, EntityType, LeadWorkflowState, Workflow,
};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Row not found
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Uuid },

    /// Optimistic concurrency check failed
    #[error("concurrency conflict on {kind} {id}: expected version {expected}, got {actual}")]
    ConcurrencyConflict {
        kind: &'static str,
        id: Uuid,
        expected: i64,
        actual: i64,
    },

    /// Insert of a row that already exists
    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: Uuid },

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result of appending an activity event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Event was new and is now stored
    Appended,
    /// An event with the same fingerprint was already stored
    Duplicate,
}

impl AppendOutcome {
    pub fn is_new(self) -> bool {
        self == AppendOutcome::Appended
    }
}

/// Append-only per-lead activity log
#[async_trait]
pub trait ActivityStore: Send + Sync + 'static {
    /// Append an event unless one with the same fingerprint exists
    async fn append_activity(&self, event: ActivityEvent) -> Result<AppendOutcome, StoreError>;

    /// All events for a lead, in insertion order
    async fn list_activity(&self, lead_id: Uuid) -> Result<Vec<ActivityEvent>, StoreError>;
}

/// Workflow definitions
#[async_trait]
pub trait WorkflowStore: Send + Sync + 'static {
    async fn insert_workflow(&self, workflow: Workflow) -> Result<Workflow, StoreError>;

    async fn get_workflow(&self, id: Uuid) -> Result<Option<Workflow>, StoreError>;

    /// Workflows owned by `owner_id`, or all workflows; oldest first
    async fn list_workflows(&self, owner_id: Option<Uuid>) -> Result<Vec<Workflow>, StoreError>;

    /// Replace a workflow if its stored version equals `expected_version`.
    ///
    /// Returns the stored row with its version bumped.
    async fn update_workflow(
        &self,
        workflow: Workflow,
        expected_version: i64,
    ) -> Result<Workflow, StoreError>;

    async fn delete_workflow(&self, id: Uuid) -> Result<(), StoreError>;
}

/// Per-lead run rows; exactly one row per lead once created
#[async_trait]
pub trait RunStore: Send + Sync + 'static {
    async fn get_run(&self, lead_id: Uuid) -> Result<Option<LeadWorkflowState>, StoreError>;

    /// Write a run row.
    ///
    /// `expected_version = None` inserts a new row and fails with
    /// `AlreadyExists` if the lead already has one; `Some(v)` replaces the row
    /// only if its stored version is `v`. Returns the stored row with its
    /// version bumped.
    async fn save_run(
        &self,
        run: LeadWorkflowState,
        expected_version: Option<i64>,
    ) -> Result<LeadWorkflowState, StoreError>;

    /// Active, bound runs with `next_due_at <= now`, earliest first.
    ///
    /// Runs of draft or paused workflows are left out so they cannot crowd a
    /// batch; runs whose workflow is archived or gone are included so the
    /// scheduler can settle them.
    async fn list_due_runs(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LeadWorkflowState>, StoreError>;

    /// Runs currently bound to a workflow, in any status
    async fn list_runs_for_workflow(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<LeadWorkflowState>, StoreError>;
}

/// Entity ownership and its audit trail
#[async_trait]
pub trait AssignmentStore: Send + Sync + 'static {
    /// Register an entity or refresh its contact fields.
    ///
    /// Ownership is only changed through [`AssignmentStore::commit_assignment`];
    /// refreshing an existing entity keeps its owner and bumps its version.
    async fn put_entity(&self, entity: EntityRecord) -> Result<EntityRecord, StoreError>;

    async fn get_entity(
        &self,
        entity_type: EntityType,
        id: Uuid,
    ) -> Result<Option<EntityRecord>, StoreError>;

    /// Set the owner and append the history entry in one atomic write,
    /// conditional on the entity's version being `expected_version`.
    async fn commit_assignment(
        &self,
        entry: AssignmentHistoryEntry,
        expected_version: i64,
    ) -> Result<EntityRecord, StoreError>;

    /// History for an entity, newest first
    async fn list_history(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
    ) -> Result<Vec<AssignmentHistoryEntry>, StoreError>;
}

/// Convenience bound for backends implementing every store
pub trait OutreachStore: ActivityStore + WorkflowStore + RunStore + AssignmentStore {}

impl<T> OutreachStore for T where T: ActivityStore + WorkflowStore + RunStore + AssignmentStore {}
