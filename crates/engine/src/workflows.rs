//! Workflow definitions and their step sequences
//!
//! Every edit is a read-modify-write against the workflow's version. Callers
//! that pass an `expected_version` get a conflict back when they are stale;
//! internal edits retry the read-modify-write under the conflict policy.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::model::{
    CreateWorkflow, ProviderBinding, RunStatus, SequenceStep, StepAction, StepKind, Workflow,
    WorkflowPatch, WorkflowStatus,
};
use crate::pause::{PauseConfig, PauseRules};
use crate::persistence::{RunStore, WorkflowStore};
use crate::reliability::RetryPolicy;
use crate::sequence;

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(EngineError::validation("workflow name must not be empty"));
    }
    Ok(())
}

fn validate_provider(binding: &ProviderBinding) -> Result<()> {
    if binding.provider.trim().is_empty() || binding.campaign_id.trim().is_empty() {
        return Err(EngineError::validation(
            "provider binding needs a provider name and a campaign id",
        ));
    }
    Ok(())
}

fn pause_config(rules: Option<PauseRules>) -> Result<PauseConfig> {
    match rules {
        Some(rules) => {
            rules.validate()?;
            Ok(PauseConfig::Rules(rules))
        }
        None => Ok(PauseConfig::NotConfigured),
    }
}

/// Create, edit and delete workflows and their steps
pub struct WorkflowService {
    workflows: Arc<dyn WorkflowStore>,
    runs: Arc<dyn RunStore>,
    retry: RetryPolicy,
}

impl WorkflowService {
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        runs: Arc<dyn RunStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            workflows,
            runs,
            retry,
        }
    }

    /// Create a draft workflow
    #[instrument(skip(self, input), fields(owner_id = %input.owner_id))]
    pub async fn create(&self, input: CreateWorkflow, now: DateTime<Utc>) -> Result<Workflow> {
        validate_name(&input.name)?;
        if let Some(binding) = &input.provider {
            validate_provider(binding)?;
        }
        let workflow = Workflow {
            id: Uuid::now_v7(),
            owner_id: input.owner_id,
            name: input.name.trim().to_string(),
            description: input.description,
            status: WorkflowStatus::Draft,
            steps: sequence::build(input.steps)?,
            pause_rules: pause_config(input.pause_rules)?,
            provider: input.provider,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        let workflow = self.workflows.insert_workflow(workflow).await?;
        info!(workflow_id = %workflow.id, steps = workflow.steps.len(), "workflow created");
        Ok(workflow)
    }

    pub async fn get(&self, workflow_id: Uuid) -> Result<Workflow> {
        self.workflows
            .get_workflow(workflow_id)
            .await?
            .ok_or(EngineError::not_found("workflow", workflow_id))
    }

    pub async fn list(&self, owner_id: Option<Uuid>) -> Result<Vec<Workflow>> {
        Ok(self.workflows.list_workflows(owner_id).await?)
    }

    /// Apply a settings patch
    #[instrument(skip(self, patch))]
    pub async fn update(
        &self,
        workflow_id: Uuid,
        patch: WorkflowPatch,
        now: DateTime<Utc>,
    ) -> Result<Workflow> {
        if let Some(name) = &patch.name {
            validate_name(name)?;
        }
        if let Some(binding) = &patch.provider {
            validate_provider(binding)?;
        }
        if let Some(rules) = &patch.pause_rules {
            rules.validate()?;
        }
        let expected = patch.expected_version;

        let (workflow, ()) = self
            .edit(workflow_id, expected, now, |workflow| {
                if let Some(name) = &patch.name {
                    workflow.name = name.trim().to_string();
                }
                if patch.description.is_some() {
                    workflow.description = patch.description.clone();
                }
                if patch.clear_pause_rules {
                    workflow.pause_rules = PauseConfig::NotConfigured;
                } else if let Some(rules) = &patch.pause_rules {
                    workflow.pause_rules = PauseConfig::Rules(rules.clone());
                }
                if patch.clear_provider {
                    workflow.provider = None;
                } else if let Some(binding) = &patch.provider {
                    workflow.provider = Some(binding.clone());
                }
                Ok(())
            })
            .await?;
        Ok(workflow)
    }

    /// Delete a workflow that no lead is actively running.
    ///
    /// Completed runs may still reference it; the scheduler never picks those up.
    #[instrument(skip(self))]
    pub async fn delete(&self, workflow_id: Uuid) -> Result<()> {
        self.get(workflow_id).await?;
        self.ensure_not_running(workflow_id).await?;
        self.workflows.delete_workflow(workflow_id).await?;
        info!(workflow_id = %workflow_id, "workflow deleted");
        Ok(())
    }

    /// Runs hold their position as a step number, so nothing that moves step
    /// numbers may happen while a lead is active or paused in the workflow
    async fn ensure_not_running(&self, workflow_id: Uuid) -> Result<()> {
        let bound_leads = self
            .runs
            .list_runs_for_workflow(workflow_id)
            .await?
            .iter()
            .filter(|r| matches!(r.status, RunStatus::Active | RunStatus::Paused))
            .count();
        if bound_leads > 0 {
            return Err(EngineError::WorkflowInUse {
                workflow_id,
                bound_leads,
            });
        }
        Ok(())
    }

    // =========================================================================
    // Steps
    // =========================================================================

    /// Append a step of `kind` with default configuration
    pub async fn add_step(
        &self,
        workflow_id: Uuid,
        kind: StepKind,
        now: DateTime<Utc>,
    ) -> Result<SequenceStep> {
        self.add_step_action(workflow_id, StepAction::default_for(kind), now)
            .await
    }

    /// Append a fully configured step
    #[instrument(skip(self, action), fields(kind = %action.kind()))]
    pub async fn add_step_action(
        &self,
        workflow_id: Uuid,
        action: StepAction,
        now: DateTime<Utc>,
    ) -> Result<SequenceStep> {
        action.validate()?;
        let (_, step) = self
            .edit(workflow_id, None, now, |workflow| {
                sequence::append(&mut workflow.steps, action.clone())
            })
            .await?;
        Ok(step)
    }

    #[instrument(skip(self, action))]
    pub async fn update_step(
        &self,
        workflow_id: Uuid,
        step_id: Uuid,
        action: StepAction,
        now: DateTime<Utc>,
    ) -> Result<SequenceStep> {
        action.validate()?;
        let (_, step) = self
            .edit(workflow_id, None, now, |workflow| {
                sequence::replace(&mut workflow.steps, step_id, action.clone())
            })
            .await?;
        Ok(step)
    }

    /// Reorder steps to `ordered_ids` and renumber them.
    ///
    /// Refused with `WorkflowInUse` while leads are active or paused in it.
    #[instrument(skip(self, ordered_ids))]
    pub async fn reorder_steps(
        &self,
        workflow_id: Uuid,
        ordered_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> Result<Workflow> {
        self.ensure_not_running(workflow_id).await?;
        let (workflow, ()) = self
            .edit(workflow_id, None, now, |workflow| {
                sequence::reorder(&mut workflow.steps, ordered_ids)
            })
            .await?;
        Ok(workflow)
    }

    /// Remove a step and renumber the rest; refused while leads are running
    #[instrument(skip(self))]
    pub async fn delete_step(
        &self,
        workflow_id: Uuid,
        step_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Workflow> {
        self.ensure_not_running(workflow_id).await?;
        let (workflow, _) = self
            .edit(workflow_id, None, now, |workflow| {
                sequence::remove(&mut workflow.steps, step_id)
            })
            .await?;
        Ok(workflow)
    }

    /// Read-modify-write a workflow.
    ///
    /// With `expected_version` the write is attempted once against that
    /// version; without it a conflict re-reads and re-applies `change`.
    async fn edit<T, F>(
        &self,
        workflow_id: Uuid,
        expected_version: Option<i64>,
        now: DateTime<Utc>,
        change: F,
    ) -> Result<(Workflow, T)>
    where
        F: Fn(&mut Workflow) -> Result<T> + Send + Sync,
        T: Send,
    {
        let change = &change;
        match expected_version {
            Some(expected) => {
                self.try_edit(workflow_id, Some(expected), now, change)
                    .await
            }
            None => {
                self.retry
                    .retry_conflicts(move |_| self.try_edit(workflow_id, None, now, change))
                    .await
            }
        }
    }

    async fn try_edit<T, F>(
        &self,
        workflow_id: Uuid,
        expected_version: Option<i64>,
        now: DateTime<Utc>,
        change: &F,
    ) -> Result<(Workflow, T)>
    where
        F: Fn(&mut Workflow) -> Result<T> + Send + Sync,
        T: Send,
    {
        let mut workflow = self.get(workflow_id).await?;
        if let Some(expected) = expected_version {
            if workflow.version != expected {
                return Err(EngineError::ConcurrentModification {
                    kind: "workflow",
                    id: workflow_id,
                });
            }
        }
        workflow.ensure_mutable()?;

        let version = workflow.version;
        let value = change(&mut workflow)?;
        workflow.updated_at = now;
        let saved = self.workflows.update_workflow(workflow, version).await?;
        Ok((saved, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConditionStep, ConditionType, WaitStep, WaitUnit};
    use crate::persistence::InMemoryStore;

    fn service() -> (WorkflowService, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let service = WorkflowService::new(store.clone(), store.clone(), RetryPolicy::conflict());
        (service, store)
    }

    fn input(steps: Vec<StepAction>) -> CreateWorkflow {
        CreateWorkflow {
            owner_id: Uuid::now_v7(),
            name: "Onboarding".to_string(),
            description: None,
            steps,
            pause_rules: None,
            provider: None,
        }
    }

    #[tokio::test]
    async fn test_create_numbers_steps_and_starts_as_draft() {
        let (service, _) = service();
        let workflow = service
            .create(
                input(vec![
                    StepAction::default_for(StepKind::Email),
                    StepAction::default_for(StepKind::Wait),
                ]),
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(workflow.status, WorkflowStatus::Draft);
        assert_eq!(workflow.version, 1);
        let numbers: Vec<u32> = workflow.steps.iter().map(|s| s.step_number).collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_create_rejects_zero_wait() {
        let (service, _) = service();
        let err = service
            .create(
                input(vec![StepAction::Wait(WaitStep {
                    duration: 0,
                    unit: WaitUnit::Hours,
                    business_hours_only: false,
                })]),
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_reorder_renumbers() {
        let (service, _) = service();
        let now = Utc::now();
        let workflow = service.create(input(vec![]), now).await.unwrap();
        let email = service.add_step(workflow.id, StepKind::Email, now).await.unwrap();
        let wait = service.add_step(workflow.id, StepKind::Wait, now).await.unwrap();

        let reordered = service
            .reorder_steps(workflow.id, &[wait.id, email.id], now)
            .await
            .unwrap();
        assert_eq!(reordered.step_by_id(wait.id).unwrap().step_number, 1);
        assert_eq!(reordered.step_by_id(email.id).unwrap().step_number, 2);
    }

    #[tokio::test]
    async fn test_delete_step_refuses_branch_target() {
        let (service, _) = service();
        let now = Utc::now();
        let workflow = service.create(input(vec![]), now).await.unwrap();
        let email = service.add_step(workflow.id, StepKind::Email, now).await.unwrap();
        service
            .add_step_action(
                workflow.id,
                StepAction::Condition(ConditionStep {
                    condition: ConditionType::Replied,
                    wait_hours: 24,
                    on_satisfied: None,
                    on_not_satisfied: Some(email.id),
                }),
                now,
            )
            .await
            .unwrap();

        let err = service.delete_step(workflow.id, email.id, now).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_stale_expected_version_is_a_conflict() {
        let (service, _) = service();
        let now = Utc::now();
        let workflow = service.create(input(vec![]), now).await.unwrap();
        service
            .update(
                workflow.id,
                WorkflowPatch {
                    name: Some("Renamed".to_string()),
                    ..Default::default()
                },
                now,
            )
            .await
            .unwrap();

        let err = service
            .update(
                workflow.id,
                WorkflowPatch {
                    name: Some("Again".to_string()),
                    expected_version: Some(workflow.version),
                    ..Default::default()
                },
                now,
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_archived_workflow_is_immutable() {
        let (service, store) = service();
        let now = Utc::now();
        let mut workflow = service.create(input(vec![]), now).await.unwrap();
        let version = workflow.version;
        workflow.status = WorkflowStatus::Archived;
        store.update_workflow(workflow.clone(), version).await.unwrap();

        let err = service
            .add_step(workflow.id, StepKind::Email, now)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_delete_refuses_bound_workflow() {
        let (service, store) = service();
        let now = Utc::now();
        let workflow = service.create(input(vec![]), now).await.unwrap();
        let run = crate::model::LeadWorkflowState::bound(Uuid::now_v7(), workflow.id, now);
        store.save_run(run, None).await.unwrap();

        let err = service.delete(workflow.id).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::WorkflowInUse { bound_leads: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_oversized_delays() {
        let (service, _) = service();
        let err = service
            .create(
                input(vec![StepAction::Wait(WaitStep {
                    duration: u32::MAX,
                    unit: WaitUnit::Hours,
                    business_hours_only: false,
                })]),
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let workflow = service.create(input(vec![]), Utc::now()).await.unwrap();
        let err = service
            .add_step_action(
                workflow.id,
                StepAction::Condition(ConditionStep {
                    condition: ConditionType::Opened,
                    wait_hours: u32::MAX,
                    on_satisfied: None,
                    on_not_satisfied: None,
                }),
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_structural_step_edits_wait_for_running_leads() {
        let (service, store) = service();
        let now = Utc::now();
        let workflow = service.create(input(vec![]), now).await.unwrap();
        let email = service.add_step(workflow.id, StepKind::Email, now).await.unwrap();
        let wait = service.add_step(workflow.id, StepKind::Wait, now).await.unwrap();
        let lead = Uuid::now_v7();
        let run = crate::model::LeadWorkflowState::bound(lead, workflow.id, now);
        let run = store.save_run(run, None).await.unwrap();

        let err = service
            .reorder_steps(workflow.id, &[wait.id, email.id], now)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::WorkflowInUse { bound_leads: 1, .. }));
        let err = service.delete_step(workflow.id, email.id, now).await.unwrap_err();
        assert!(matches!(err, EngineError::WorkflowInUse { .. }));

        // Steps keep their numbers; appending and editing in place stay allowed
        let unchanged = service.get(workflow.id).await.unwrap();
        assert_eq!(unchanged.step_by_id(email.id).unwrap().step_number, 1);
        let follow_up = service.add_step(workflow.id, StepKind::Email, now).await.unwrap();

        // Once the lead has finished, the sequence can be restructured
        let mut finished = run.clone();
        finished.complete(now);
        store.save_run(finished, Some(run.version)).await.unwrap();
        let reordered = service
            .reorder_steps(workflow.id, &[wait.id, email.id, follow_up.id], now)
            .await
            .unwrap();
        assert_eq!(reordered.step_by_id(wait.id).unwrap().step_number, 1);
    }
}
