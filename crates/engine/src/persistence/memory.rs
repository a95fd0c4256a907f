//! In-memory implementation of the store traits for tests and local development

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::*;
use crate::model::{
    ActivityEvent, AssignmentHistoryEntry, EntityRecord, EntityType, LeadWorkflowState, Workflow,
    WorkflowStatus,
};

#[derive(Default)]
struct ActivityState {
    by_lead: HashMap<Uuid, Vec<ActivityEvent>>,
    fingerprints: HashSet<String>,
}

#[derive(Default)]
struct AssignmentState {
    entities: HashMap<(EntityType, Uuid), EntityRecord>,
    history: HashMap<(EntityType, Uuid), Vec<AssignmentHistoryEntry>>,
}

/// In-memory implementation of every store trait
///
/// Provides the same semantics as the PostgreSQL implementation, including
/// version checks, so concurrency tests exercise the real conflict paths.
///
/// # Example
///
/// ```
/// use outreach_engine::InMemoryStore;
///
/// let store = InMemoryStore::new();
/// assert_eq!(store.workflow_count(), 0);
/// ```
pub struct InMemoryStore {
    activity: RwLock<ActivityState>,
    workflows: RwLock<HashMap<Uuid, Workflow>>,
    runs: RwLock<HashMap<Uuid, LeadWorkflowState>>,
    assignments: RwLock<AssignmentState>,
}

impl InMemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            activity: RwLock::new(ActivityState::default()),
            workflows: RwLock::new(HashMap::new()),
            runs: RwLock::new(HashMap::new()),
            assignments: RwLock::new(AssignmentState::default()),
        }
    }

    /// Get the number of workflows
    pub fn workflow_count(&self) -> usize {
        self.workflows.read().len()
    }

    /// Get the number of stored activity events across all leads
    pub fn activity_count(&self) -> usize {
        self.activity.read().fingerprints.len()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        *self.activity.write() = ActivityState::default();
        self.workflows.write().clear();
        self.runs.write().clear();
        *self.assignments.write() = AssignmentState::default();
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActivityStore for InMemoryStore {
    async fn append_activity(&self, event: ActivityEvent) -> Result<AppendOutcome, StoreError> {
        let mut state = self.activity.write();
        if !state.fingerprints.insert(event.fingerprint.clone()) {
            return Ok(AppendOutcome::Duplicate);
        }
        state.by_lead.entry(event.lead_id).or_default().push(event);
        Ok(AppendOutcome::Appended)
    }

    async fn list_activity(&self, lead_id: Uuid) -> Result<Vec<ActivityEvent>, StoreError> {
        Ok(self
            .activity
            .read()
            .by_lead
            .get(&lead_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn insert_workflow(&self, mut workflow: Workflow) -> Result<Workflow, StoreError> {
        let mut workflows = self.workflows.write();
        if workflows.contains_key(&workflow.id) {
            return Err(StoreError::AlreadyExists {
                kind: "workflow",
                id: workflow.id,
            });
        }
        workflow.version = 1;
        workflows.insert(workflow.id, workflow.clone());
        Ok(workflow)
    }

    async fn get_workflow(&self, id: Uuid) -> Result<Option<Workflow>, StoreError> {
        Ok(self.workflows.read().get(&id).cloned())
    }

    async fn list_workflows(&self, owner_id: Option<Uuid>) -> Result<Vec<Workflow>, StoreError> {
        let mut list: Vec<Workflow> = self
            .workflows
            .read()
            .values()
            .filter(|w| owner_id.map_or(true, |owner| w.owner_id == owner))
            .cloned()
            .collect();
        list.sort_by_key(|w| (w.created_at, w.id));
        Ok(list)
    }

    async fn update_workflow(
        &self,
        mut workflow: Workflow,
        expected_version: i64,
    ) -> Result<Workflow, StoreError> {
        let mut workflows = self.workflows.write();
        let current = workflows.get(&workflow.id).ok_or(StoreError::NotFound {
            kind: "workflow",
            id: workflow.id,
        })?;
        if current.version != expected_version {
            return Err(StoreError::ConcurrencyConflict {
                kind: "workflow",
                id: workflow.id,
                expected: expected_version,
                actual: current.version,
            });
        }
        workflow.version = expected_version + 1;
        workflows.insert(workflow.id, workflow.clone());
        Ok(workflow)
    }

    async fn delete_workflow(&self, id: Uuid) -> Result<(), StoreError> {
        self.workflows
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound {
                kind: "workflow",
                id,
            })
    }
}

#[async_trait]
impl RunStore for InMemoryStore {
    async fn get_run(&self, lead_id: Uuid) -> Result<Option<LeadWorkflowState>, StoreError> {
        Ok(self.runs.read().get(&lead_id).cloned())
    }

    async fn save_run(
        &self,
        mut run: LeadWorkflowState,
        expected_version: Option<i64>,
    ) -> Result<LeadWorkflowState, StoreError> {
        let mut runs = self.runs.write();
        let current = runs.get(&run.lead_id).map(|r| r.version);
        match (expected_version, current) {
            (None, None) => run.version = 1,
            (None, Some(_)) => {
                return Err(StoreError::AlreadyExists {
                    kind: "lead run",
                    id: run.lead_id,
                })
            }
            (Some(expected), Some(actual)) if expected == actual => run.version = expected + 1,
            (Some(expected), actual) => {
                return Err(StoreError::ConcurrencyConflict {
                    kind: "lead run",
                    id: run.lead_id,
                    expected,
                    actual: actual.unwrap_or(0),
                })
            }
        }
        runs.insert(run.lead_id, run.clone());
        Ok(run)
    }

    async fn list_due_runs(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LeadWorkflowState>, StoreError> {
        let workflows = self.workflows.read();
        let schedulable = |id: Option<Uuid>| {
            id.and_then(|id| workflows.get(&id)).map_or(true, |w| {
                !matches!(w.status, WorkflowStatus::Draft | WorkflowStatus::Paused)
            })
        };
        let mut due: Vec<LeadWorkflowState> = self
            .runs
            .read()
            .values()
            .filter(|r| r.is_live() && r.next_due_at.is_some_and(|at| at <= now))
            .filter(|r| schedulable(r.workflow_id))
            .cloned()
            .collect();
        due.sort_by_key(|r| (r.next_due_at, r.lead_id));
        due.truncate(limit);
        Ok(due)
    }

    async fn list_runs_for_workflow(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<LeadWorkflowState>, StoreError> {
        Ok(self
            .runs
            .read()
            .values()
            .filter(|r| r.workflow_id == Some(workflow_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AssignmentStore for InMemoryStore {
    async fn put_entity(&self, mut entity: EntityRecord) -> Result<EntityRecord, StoreError> {
        let mut state = self.assignments.write();
        let key = (entity.entity_type, entity.id);
        match state.entities.get(&key) {
            Some(existing) => {
                entity.owner_id = existing.owner_id;
                entity.version = existing.version + 1;
            }
            None => entity.version = 1,
        }
        state.entities.insert(key, entity.clone());
        Ok(entity)
    }

    async fn get_entity(
        &self,
        entity_type: EntityType,
        id: Uuid,
    ) -> Result<Option<EntityRecord>, StoreError> {
        Ok(self.assignments.read().entities.get(&(entity_type, id)).cloned())
    }

    async fn commit_assignment(
        &self,
        entry: AssignmentHistoryEntry,
        expected_version: i64,
    ) -> Result<EntityRecord, StoreError> {
        let mut state = self.assignments.write();
        let key = (entry.entity_type, entry.entity_id);
        let entity = state.entities.get_mut(&key).ok_or(StoreError::NotFound {
            kind: entry.entity_type.as_str(),
            id: entry.entity_id,
        })?;
        if entity.version != expected_version {
            return Err(StoreError::ConcurrencyConflict {
                kind: entry.entity_type.as_str(),
                id: entry.entity_id,
                expected: expected_version,
                actual: entity.version,
            });
        }
        entity.owner_id = entry.new_owner_id;
        entity.version += 1;
        entity.updated_at = entry.created_at;
        let updated = entity.clone();
        state.history.entry(key).or_default().push(entry);
        Ok(updated)
    }

    async fn list_history(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
    ) -> Result<Vec<AssignmentHistoryEntry>, StoreError> {
        let mut entries = self
            .assignments
            .read()
            .history
            .get(&(entity_type, entity_id))
            .cloned()
            .unwrap_or_default();
        // Insertion order breaks timestamp ties
        entries.reverse();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }
}
