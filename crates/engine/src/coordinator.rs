//! Assignment coordinator
//!
//! Entry point for ownership changes on leads and companies. An owner id is
//! either a human user or a workflow; assigning a lead to a workflow binds a
//! lead-run and pushes the lead to the workflow's provider campaign.
//!
//! Each operation runs in two phases: the local commit (owner + history, one
//! versioned write), then the follow-up of binding the lead-run and syncing
//! the provider. Follow-up outcomes are reported in the result and never undo
//! the commit.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::adapter::{
    CampaignAdapters, CampaignContact, CampaignError, ExternalSyncFailure, SyncReport,
};
use crate::error::{EngineError, Result};
use crate::model::{
    Actor, AssignmentHistoryEntry, EntityRecord, EntityType, LeadWorkflowState, Workflow,
};
use crate::persistence::{AssignmentStore, WorkflowStore};
use crate::reliability::RetryPolicy;
use crate::state_machine::WorkflowStateMachine;

/// Result of a single assignment operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AssignmentOutcome {
    pub entity: EntityRecord,
    /// The history entry written, or `None` when nothing changed
    pub history: Option<AssignmentHistoryEntry>,
    /// Lead-run after the change, for leads
    pub run: Option<LeadWorkflowState>,
    /// Set when the owner was committed but the lead-run could not be brought
    /// in line with it; assigning the same owner again retries the binding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding_error: Option<String>,
    pub sync: SyncReport,
}

/// One entity that could not be assigned in a bulk operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct BulkFailure {
    pub id: Uuid,
    pub reason: String,
}

/// Per-entity results of a bulk assignment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct BulkAssignResult {
    pub entity_type: EntityType,
    pub succeeded: Vec<Uuid>,
    pub failed: Vec<BulkFailure>,
    /// Assigned entities whose lead-run binding failed afterwards
    #[serde(default)]
    pub binding_failures: Vec<BulkFailure>,
    /// Provider syncs that failed for otherwise successful assignments
    pub sync_failures: Vec<ExternalSyncFailure>,
}

impl BulkAssignResult {
    fn noun(&self) -> &'static str {
        match self.entity_type {
            EntityType::Lead => "leads",
            EntityType::Company => "companies",
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// "Successfully assigned S of N leads"
    pub fn summary(&self) -> String {
        format!(
            "Successfully assigned {} of {} {}",
            self.succeeded.len(),
            self.total(),
            self.noun()
        )
    }

    /// "F leads could not be assigned", only when something failed
    pub fn failure_warning(&self) -> Option<String> {
        (!self.failed.is_empty())
            .then(|| format!("{} {} could not be assigned", self.failed.len(), self.noun()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Assign(Uuid),
    Reassign(Uuid),
    Unassign,
}

impl Change {
    fn new_owner(self) -> Option<Uuid> {
        match self {
            Change::Assign(owner) | Change::Reassign(owner) => Some(owner),
            Change::Unassign => None,
        }
    }
}

/// Coordinates ownership changes, lead-run binding and provider sync
pub struct AssignmentCoordinator {
    entities: Arc<dyn AssignmentStore>,
    workflows: Arc<dyn WorkflowStore>,
    machine: Arc<WorkflowStateMachine>,
    adapters: CampaignAdapters,
    sync_timeout: Duration,
    retry: RetryPolicy,
    concurrency: usize,
}

impl AssignmentCoordinator {
    pub fn new(
        entities: Arc<dyn AssignmentStore>,
        workflows: Arc<dyn WorkflowStore>,
        machine: Arc<WorkflowStateMachine>,
        adapters: CampaignAdapters,
        sync_timeout: Duration,
        retry: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            entities,
            workflows,
            machine,
            adapters,
            sync_timeout,
            retry,
            concurrency: concurrency.max(1),
        }
    }

    /// Register an entity or refresh its contact details
    pub async fn put_entity(&self, entity: EntityRecord) -> Result<EntityRecord> {
        Ok(self.entities.put_entity(entity).await?)
    }

    pub async fn get_entity(&self, entity_type: EntityType, id: Uuid) -> Result<EntityRecord> {
        self.entities
            .get_entity(entity_type, id)
            .await?
            .ok_or(EngineError::not_found(entity_type.as_str(), id))
    }

    /// Assignment history, newest first
    pub async fn history(
        &self,
        entity_type: EntityType,
        id: Uuid,
    ) -> Result<Vec<AssignmentHistoryEntry>> {
        Ok(self.entities.list_history(entity_type, id).await?)
    }

    /// Set the owner of an entity.
    ///
    /// `expected_version` is the caller's last-known entity version; a stale
    /// value fails with `ConcurrentModification`. Without it, conflicts are
    /// retried against the latest version.
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn assign(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        owner_id: Uuid,
        actor: Actor,
        expected_version: Option<i64>,
    ) -> Result<AssignmentOutcome> {
        self.apply(
            entity_type,
            entity_id,
            Change::Assign(owner_id),
            actor,
            expected_version,
        )
        .await
    }

    /// Like `assign`, but the entity must already have an owner
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn reassign(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        new_owner_id: Uuid,
        actor: Actor,
        expected_version: Option<i64>,
    ) -> Result<AssignmentOutcome> {
        self.apply(
            entity_type,
            entity_id,
            Change::Reassign(new_owner_id),
            actor,
            expected_version,
        )
        .await
    }

    /// Clear the owner; a lead bound to a workflow is detached from it
    #[instrument(skip(self, actor), fields(actor_id = %actor.id))]
    pub async fn unassign(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        actor: Actor,
        expected_version: Option<i64>,
    ) -> Result<AssignmentOutcome> {
        self.apply(
            entity_type,
            entity_id,
            Change::Unassign,
            actor,
            expected_version,
        )
        .await
    }

    /// Assign every entity independently; one failure never aborts the batch.
    ///
    /// At most `concurrency` assignments are in flight; results keep input order.
    #[instrument(skip(self, entity_ids, actor), fields(count = entity_ids.len()))]
    pub async fn bulk_assign(
        &self,
        entity_type: EntityType,
        entity_ids: &[Uuid],
        owner_id: Uuid,
        actor: Actor,
    ) -> BulkAssignResult {
        let results: Vec<Result<AssignmentOutcome>> = stream::iter(entity_ids.iter().copied())
            .map(|id| self.assign(entity_type, id, owner_id, actor, None))
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut report = BulkAssignResult {
            entity_type,
            succeeded: Vec::new(),
            failed: Vec::new(),
            binding_failures: Vec::new(),
            sync_failures: Vec::new(),
        };
        for (&id, result) in entity_ids.iter().zip(results) {
            match result {
                Ok(outcome) => {
                    report.succeeded.push(id);
                    if let Some(reason) = outcome.binding_error {
                        report.binding_failures.push(BulkFailure { id, reason });
                    }
                    if let Some(failure) = outcome.sync.failure() {
                        report.sync_failures.push(failure.clone());
                    }
                }
                Err(err) => report.failed.push(BulkFailure {
                    id,
                    reason: err.to_string(),
                }),
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "{}",
            report.summary()
        );
        if let Some(warning) = report.failure_warning() {
            warn!("{warning}");
        }
        report
    }

    async fn apply(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        change: Change,
        actor: Actor,
        expected_version: Option<i64>,
    ) -> Result<AssignmentOutcome> {
        if entity_type == EntityType::Company && !actor.is_admin {
            return Err(EngineError::forbidden(
                "company ownership changes require an admin actor",
            ));
        }

        let target = match change.new_owner() {
            Some(owner) => self.workflow_owner(owner).await?,
            None => None,
        };
        if let Some(workflow) = &target {
            if entity_type == EntityType::Company {
                return Err(EngineError::validation(
                    "companies cannot be assigned to a workflow",
                ));
            }
            if workflow.is_archived() {
                return Err(EngineError::validation(format!(
                    "workflow {} is archived",
                    workflow.id
                )));
            }
        }

        let now = Utc::now();
        let (entity, history) = match expected_version {
            Some(expected) => {
                self.try_commit(entity_type, entity_id, change, actor, Some(expected), now)
                    .await?
            }
            None => {
                self.retry
                    .retry_conflicts(move |_| {
                        self.try_commit(entity_type, entity_id, change, actor, None, now)
                    })
                    .await?
            }
        };

        if let Some(entry) = &history {
            info!(
                entity_type = %entity_type,
                entity_id = %entity_id,
                previous_owner = ?entry.previous_owner_id,
                new_owner = ?entry.new_owner_id,
                "ownership changed"
            );
        }

        let (run, binding_error) = match entity_type {
            EntityType::Lead => match self.reconcile_run(entity_id, now).await {
                Ok(run) => (run, None),
                Err(err) => {
                    warn!(
                        lead_id = %entity_id,
                        error = %err,
                        "owner committed but lead-run binding failed"
                    );
                    (None, Some(err.to_string()))
                }
            },
            EntityType::Company => (None, None),
        };

        let sync = match &target {
            Some(workflow) => self.sync_contact(&entity, workflow).await,
            None => SyncReport::NotRequired,
        };

        Ok(AssignmentOutcome {
            entity,
            history,
            run,
            binding_error,
            sync,
        })
    }

    async fn try_commit(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        change: Change,
        actor: Actor,
        expected_version: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<(EntityRecord, Option<AssignmentHistoryEntry>)> {
        let entity = self.get_entity(entity_type, entity_id).await?;
        if let Some(expected) = expected_version {
            if entity.version != expected {
                return Err(EngineError::ConcurrentModification {
                    kind: entity_type.as_str(),
                    id: entity_id,
                });
            }
        }
        if matches!(change, Change::Reassign(_)) && entity.owner_id.is_none() {
            return Err(EngineError::validation(format!(
                "{entity_type} {entity_id} has no owner to reassign from"
            )));
        }

        let new_owner = change.new_owner();
        if entity.owner_id == new_owner {
            debug!(entity_id = %entity_id, "owner unchanged");
            return Ok((entity, None));
        }

        let entry = AssignmentHistoryEntry::new(
            entity_type,
            entity_id,
            entity.owner_id,
            new_owner,
            actor.id,
            now,
        );
        let updated = self
            .entities
            .commit_assignment(entry.clone(), entity.version)
            .await?;
        Ok((updated, Some(entry)))
    }

    /// The workflow an owner id refers to, if it is one
    async fn workflow_owner(&self, owner_id: Uuid) -> Result<Option<Workflow>> {
        Ok(self.workflows.get_workflow(owner_id).await?)
    }

    /// Bring the lead-run in line with the lead's committed owner.
    ///
    /// The owner is re-read after the run is written; if another assignment
    /// committed in between, the run is reconciled again so the last commit
    /// decides the final binding.
    async fn reconcile_run(
        &self,
        lead_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<LeadWorkflowState>> {
        let mut attempt = 1;
        loop {
            let lead = self.get_entity(EntityType::Lead, lead_id).await?;
            let workflow = match lead.owner_id {
                Some(owner) => self
                    .workflow_owner(owner)
                    .await?
                    .filter(|w| !w.is_archived()),
                None => None,
            };
            let run = match &workflow {
                Some(workflow) => Some(self.machine.bind_lead(lead_id, workflow, now).await?),
                None => self.machine.unbind_lead(lead_id, now).await?,
            };

            let current = self.get_entity(EntityType::Lead, lead_id).await?;
            if current.version == lead.version || !self.retry.has_attempts_remaining(attempt) {
                return Ok(run);
            }
            attempt += 1;
        }
    }

    /// Push the lead to the workflow's provider campaign, bounded by the sync timeout
    async fn sync_contact(&self, entity: &EntityRecord, workflow: &Workflow) -> SyncReport {
        let Some(binding) = &workflow.provider else {
            return SyncReport::NotRequired;
        };
        let failure = |reason: String| {
            warn!(
                entity_id = %entity.id,
                provider = %binding.provider,
                reason = %reason,
                "external campaign sync failed"
            );
            SyncReport::Failed(ExternalSyncFailure {
                entity_id: entity.id,
                provider: binding.provider.clone(),
                reason,
            })
        };

        let Some(adapter) = self.adapters.get(&binding.provider) else {
            return failure(format!("no adapter registered for {}", binding.provider));
        };
        let Some(email) = entity.email.clone().filter(|e| !e.trim().is_empty()) else {
            return failure("lead has no email address".to_string());
        };
        let contact = CampaignContact {
            email,
            first_name: entity.first_name.clone(),
            last_name: entity.last_name.clone(),
            company: entity.company.clone(),
        };

        let call = adapter.add_contact(&binding.campaign_id, &contact);
        match tokio::time::timeout(self.sync_timeout, call).await {
            Ok(Ok(contact_id)) => {
                debug!(entity_id = %entity.id, contact_id = %contact_id, "contact synced");
                SyncReport::Synced {
                    provider: binding.provider.clone(),
                    contact_id: Some(contact_id),
                }
            }
            Ok(Err(CampaignError::AlreadyExists)) => SyncReport::Synced {
                provider: binding.provider.clone(),
                contact_id: None,
            },
            Ok(Err(err)) => failure(err.to_string()),
            Err(_) => failure(CampaignError::Timeout(self.sync_timeout).to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(succeeded: usize, failed: usize) -> BulkAssignResult {
        BulkAssignResult {
            entity_type: EntityType::Lead,
            succeeded: (0..succeeded).map(|_| Uuid::now_v7()).collect(),
            failed: (0..failed)
                .map(|_| BulkFailure {
                    id: Uuid::now_v7(),
                    reason: "lead not found".to_string(),
                })
                .collect(),
            binding_failures: Vec::new(),
            sync_failures: Vec::new(),
        }
    }

    #[test]
    fn test_bulk_summary_and_warning_are_separate() {
        let report = result(2, 1);
        assert_eq!(report.summary(), "Successfully assigned 2 of 3 leads");
        assert_eq!(
            report.failure_warning().as_deref(),
            Some("1 leads could not be assigned")
        );
    }

    #[test]
    fn test_full_success_has_no_warning() {
        let report = result(3, 0);
        assert_eq!(report.summary(), "Successfully assigned 3 of 3 leads");
        assert!(report.failure_warning().is_none());
    }

    #[test]
    fn test_company_noun() {
        let mut report = result(1, 0);
        report.entity_type = EntityType::Company;
        assert_eq!(report.summary(), "Successfully assigned 1 of 1 companies");
    }
}
