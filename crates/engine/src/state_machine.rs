//! Workflow lifecycle and per-lead run state
//!
//! Workflow: `draft -> active <-> paused -> archived` (archived is terminal,
//! reachable from any other state).
//! Lead-run: `active <-> paused -> completed` (completed is terminal).
//!
//! Every write is a compare-and-swap on the row's version, retried under the
//! configured [`RetryPolicy`]. Events that record a transition
//! (`workflow_paused`, `workflow_resumed`) are stamped after the write commits.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::activity::{evaluation_start, ActivityLog};
use crate::error::{EngineError, Result};
use crate::model::{
    ActivityEvent, ActivityType, LeadWorkflowState, PauseCause, RunStatus, StepAction, Workflow,
    WorkflowStatus,
};
use crate::notify::{PauseNotice, PauseNotifier};
use crate::pause::{self, PauseDecision, PauseReason};
use crate::persistence::{RunStore, StoreError, WorkflowStore};
use crate::reliability::RetryPolicy;
use crate::scheduler::StepTimer;

/// What an inbound activity event did to the lead's run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityOutcome {
    /// The same event was already recorded
    Duplicate,
    /// Recorded; the lead has no active run to evaluate
    Recorded,
    /// Recorded; pause rules did not fire
    Continued,
    /// Recorded; the run was paused
    Paused(PauseReason),
    /// Recorded; the run was already paused
    AlreadyPaused,
}

/// Result of pausing a workflow
#[derive(Debug, Clone)]
pub struct WorkflowPauseReport {
    pub workflow: Workflow,
    /// Leads paused by the cascade
    pub paused_leads: Vec<Uuid>,
}

enum Evaluation {
    NoRun,
    AlreadyPaused,
    Continue,
    Paused {
        run: LeadWorkflowState,
        reason: PauseReason,
        workflow: Workflow,
    },
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ResumeScope {
    /// Explicit resume of one lead
    Lead,
    /// Resume only runs paused by a workflow-level cascade
    Cascade,
}

fn metadata<const N: usize>(pairs: [(&str, Value); N]) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// Email steps need content before a workflow may run
fn ensure_runnable(workflow: &Workflow) -> Result<()> {
    if workflow.steps.is_empty() {
        return Err(EngineError::validation(format!(
            "workflow {} has no steps",
            workflow.id
        )));
    }
    for step in &workflow.steps {
        if let StepAction::Email(email) = &step.action {
            if email.subject.trim().is_empty() || email.body.trim().is_empty() {
                return Err(EngineError::validation(format!(
                    "email step {} needs a subject and a body",
                    step.step_number
                )));
            }
        }
    }
    Ok(())
}

/// Owns workflow lifecycle transitions and lead-run transitions
pub struct WorkflowStateMachine {
    workflows: Arc<dyn WorkflowStore>,
    runs: Arc<dyn RunStore>,
    activity: ActivityLog,
    notifier: Arc<dyn PauseNotifier>,
    timer: StepTimer,
    retry: RetryPolicy,
}

impl WorkflowStateMachine {
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        runs: Arc<dyn RunStore>,
        activity: ActivityLog,
        notifier: Arc<dyn PauseNotifier>,
        timer: StepTimer,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            workflows,
            runs,
            activity,
            notifier,
            timer,
            retry,
        }
    }

    async fn load_workflow(&self, id: Uuid) -> Result<Workflow> {
        self.workflows
            .get_workflow(id)
            .await?
            .ok_or(EngineError::not_found("workflow", id))
    }

    async fn load_run(&self, lead_id: Uuid) -> Result<LeadWorkflowState> {
        self.runs
            .get_run(lead_id)
            .await?
            .ok_or(EngineError::not_found("lead run", lead_id))
    }

    async fn save_run(&self, run: LeadWorkflowState, expected: i64) -> Result<LeadWorkflowState> {
        Ok(self.runs.save_run(run, Some(expected)).await?)
    }

    async fn stamp(
        &self,
        lead_id: Uuid,
        event_type: ActivityType,
        at: DateTime<Utc>,
        meta: Map<String, Value>,
    ) -> Result<()> {
        self.activity
            .append(ActivityEvent::new(lead_id, event_type, at, meta))
            .await?;
        Ok(())
    }

    // =========================================================================
    // Workflow lifecycle
    // =========================================================================

    /// `draft | paused -> active`. Activating a paused workflow also resumes
    /// the lead-runs its cascade paused.
    #[instrument(skip(self))]
    pub async fn activate(&self, workflow_id: Uuid, now: DateTime<Utc>) -> Result<Workflow> {
        let (workflow, previous) = self
            .retry
            .retry_conflicts(move |_| self.try_activate(workflow_id, now))
            .await?;

        if previous == WorkflowStatus::Paused {
            let resumed = self.resume_cascaded(&workflow, now).await?;
            info!(workflow_id = %workflow_id, resumed, "workflow resumed");
        } else if previous != WorkflowStatus::Active {
            info!(workflow_id = %workflow_id, "workflow activated");
        }
        Ok(workflow)
    }

    async fn try_activate(
        &self,
        workflow_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(Workflow, WorkflowStatus)> {
        let mut workflow = self.load_workflow(workflow_id).await?;
        let previous = workflow.status;
        match previous {
            WorkflowStatus::Active => return Ok((workflow, previous)),
            WorkflowStatus::Archived => {
                return Err(EngineError::transition(previous, WorkflowStatus::Active))
            }
            WorkflowStatus::Draft | WorkflowStatus::Paused => {}
        }
        ensure_runnable(&workflow)?;

        let expected = workflow.version;
        workflow.status = WorkflowStatus::Active;
        workflow.updated_at = now;
        let saved = self.workflows.update_workflow(workflow, expected).await?;
        Ok((saved, previous))
    }

    /// `active -> paused`. With `cascade`, every active lead-run bound to the
    /// workflow is paused too; otherwise runs keep their position and the
    /// scheduler skips them until the workflow is active again.
    ///
    /// `reason` is free text from the caller, carried on each cascade stamp.
    #[instrument(skip(self))]
    pub async fn pause_workflow(
        &self,
        workflow_id: Uuid,
        reason: Option<&str>,
        cascade: bool,
        now: DateTime<Utc>,
    ) -> Result<WorkflowPauseReport> {
        let workflow = self
            .retry
            .retry_conflicts(move |_| self.try_pause_workflow(workflow_id, now))
            .await?;

        let mut paused_leads = Vec::new();
        if cascade {
            for run in self.runs.list_runs_for_workflow(workflow_id).await? {
                if run.status != RunStatus::Active {
                    continue;
                }
                let lead_id = run.lead_id;
                let paused = self
                    .retry
                    .retry_conflicts(move |_| self.try_cascade_pause(lead_id, workflow_id, now))
                    .await?;
                if let Some(run) = paused {
                    let mut stamp = metadata([
                        ("reason", Value::from(PauseCause::WorkflowPaused.as_str())),
                        ("workflow_id", Value::from(workflow_id.to_string())),
                        ("version", Value::from(run.version)),
                    ]);
                    if let Some(note) = reason {
                        stamp.insert("note".to_string(), Value::from(note));
                    }
                    self.stamp(lead_id, ActivityType::WorkflowPaused, now, stamp)
                        .await?;
                    paused_leads.push(lead_id);
                }
            }
        }

        info!(
            workflow_id = %workflow_id,
            reason = reason.unwrap_or(""),
            cascade,
            paused = paused_leads.len(),
            "workflow paused"
        );
        Ok(WorkflowPauseReport {
            workflow,
            paused_leads,
        })
    }

    async fn try_pause_workflow(&self, workflow_id: Uuid, now: DateTime<Utc>) -> Result<Workflow> {
        let mut workflow = self.load_workflow(workflow_id).await?;
        match workflow.status {
            WorkflowStatus::Paused => Ok(workflow),
            WorkflowStatus::Active => {
                let expected = workflow.version;
                workflow.status = WorkflowStatus::Paused;
                workflow.updated_at = now;
                Ok(self.workflows.update_workflow(workflow, expected).await?)
            }
            other => Err(EngineError::transition(other, WorkflowStatus::Paused)),
        }
    }

    async fn try_cascade_pause(
        &self,
        lead_id: Uuid,
        workflow_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<LeadWorkflowState>> {
        let mut run = self.load_run(lead_id).await?;
        if run.workflow_id != Some(workflow_id) || run.status != RunStatus::Active {
            return Ok(None);
        }
        let expected = run.version;
        run.pause(PauseCause::WorkflowPaused, now);
        Ok(Some(self.save_run(run, expected).await?))
    }

    async fn resume_cascaded(&self, workflow: &Workflow, now: DateTime<Utc>) -> Result<usize> {
        let mut resumed = 0;
        for run in self.runs.list_runs_for_workflow(workflow.id).await? {
            if run.status == RunStatus::Paused && run.paused_by == Some(PauseCause::WorkflowPaused)
            {
                if self
                    .resume_with_scope(run.lead_id, now, ResumeScope::Cascade)
                    .await?
                    .is_some()
                {
                    resumed += 1;
                }
            }
        }
        Ok(resumed)
    }

    /// Any non-archived status `-> archived`. Bound runs that are not yet
    /// completed are completed so nothing of this workflow is scheduled again.
    #[instrument(skip(self))]
    pub async fn archive(&self, workflow_id: Uuid, now: DateTime<Utc>) -> Result<Workflow> {
        let workflow = self
            .retry
            .retry_conflicts(move |_| self.try_archive(workflow_id, now))
            .await?;

        let mut completed = 0;
        for run in self.runs.list_runs_for_workflow(workflow_id).await? {
            if run.status == RunStatus::Completed {
                continue;
            }
            let lead_id = run.lead_id;
            let done = self
                .retry
                .retry_conflicts(move |_| self.try_complete_bound(lead_id, workflow_id, now))
                .await?;
            if done {
                completed += 1;
            }
        }

        info!(workflow_id = %workflow_id, completed, "workflow archived");
        Ok(workflow)
    }

    async fn try_archive(&self, workflow_id: Uuid, now: DateTime<Utc>) -> Result<Workflow> {
        let mut workflow = self.load_workflow(workflow_id).await?;
        if workflow.is_archived() {
            return Err(EngineError::transition(
                WorkflowStatus::Archived,
                WorkflowStatus::Archived,
            ));
        }
        let expected = workflow.version;
        workflow.status = WorkflowStatus::Archived;
        workflow.updated_at = now;
        Ok(self.workflows.update_workflow(workflow, expected).await?)
    }

    async fn try_complete_bound(
        &self,
        lead_id: Uuid,
        workflow_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut run = self.load_run(lead_id).await?;
        if run.workflow_id != Some(workflow_id) || run.status == RunStatus::Completed {
            return Ok(false);
        }
        let expected = run.version;
        run.complete(now);
        self.save_run(run, expected).await?;
        Ok(true)
    }

    // =========================================================================
    // Lead-run transitions
    // =========================================================================

    /// Record an inbound event and apply the bound workflow's pause rules
    #[instrument(skip(self, event), fields(lead_id = %event.lead_id, event_type = %event.event_type))]
    pub async fn on_activity(
        &self,
        event: ActivityEvent,
        now: DateTime<Utc>,
    ) -> Result<ActivityOutcome> {
        let lead_id = event.lead_id;
        if !self.activity.append(event).await?.is_new() {
            return Ok(ActivityOutcome::Duplicate);
        }

        let evaluation = self
            .retry
            .retry_conflicts(move |_| self.try_evaluate(lead_id, now))
            .await?;

        match evaluation {
            Evaluation::NoRun => Ok(ActivityOutcome::Recorded),
            Evaluation::AlreadyPaused => Ok(ActivityOutcome::AlreadyPaused),
            Evaluation::Continue => Ok(ActivityOutcome::Continued),
            Evaluation::Paused {
                run,
                reason,
                workflow,
            } => {
                self.stamp(
                    lead_id,
                    ActivityType::WorkflowPaused,
                    now,
                    metadata([
                        ("reason", Value::from(reason.to_string())),
                        ("workflow_id", Value::from(workflow.id.to_string())),
                        ("step", Value::from(run.current_step)),
                        ("version", Value::from(run.version)),
                    ]),
                )
                .await?;
                info!(workflow_id = %workflow.id, reason = %reason, "lead paused by rule");

                if workflow.pause_rules.notify_on_pause() {
                    let notifier = Arc::clone(&self.notifier);
                    let notice = PauseNotice {
                        lead_id,
                        workflow_id: workflow.id,
                        owner_id: workflow.owner_id,
                        cause: reason.into(),
                        paused_at: now,
                    };
                    tokio::spawn(async move {
                        if let Err(err) = notifier.notify(notice).await {
                            warn!(lead_id = %lead_id, error = %err, "pause notification failed");
                        }
                    });
                }
                Ok(ActivityOutcome::Paused(reason))
            }
        }
    }

    async fn try_evaluate(&self, lead_id: Uuid, now: DateTime<Utc>) -> Result<Evaluation> {
        let Some(mut run) = self.runs.get_run(lead_id).await? else {
            return Ok(Evaluation::NoRun);
        };
        let Some(workflow_id) = run.workflow_id else {
            return Ok(Evaluation::NoRun);
        };
        match run.status {
            RunStatus::Paused => return Ok(Evaluation::AlreadyPaused),
            RunStatus::Completed => return Ok(Evaluation::NoRun),
            RunStatus::Active => {}
        }
        let workflow = match self.workflows.get_workflow(workflow_id).await? {
            Some(workflow) if !workflow.is_archived() => workflow,
            _ => return Ok(Evaluation::NoRun),
        };

        let mut history = self.activity.history(lead_id).await?;
        let since = evaluation_start(&history, run.started_at);
        history.retain(|e| e.occurred_at >= since);

        match pause::evaluate(&workflow.pause_rules, &history) {
            PauseDecision::Continue => Ok(Evaluation::Continue),
            PauseDecision::Pause(reason) => {
                let expected = run.version;
                run.pause(reason.into(), now);
                let run = self.save_run(run, expected).await?;
                Ok(Evaluation::Paused {
                    run,
                    reason,
                    workflow,
                })
            }
        }
    }

    /// Resume a paused lead-run.
    ///
    /// The current step's due time is recomputed from `now`; time spent
    /// paused is not credited. A run whose workflow is gone or archived is
    /// completed instead.
    #[instrument(skip(self))]
    pub async fn resume(&self, lead_id: Uuid, now: DateTime<Utc>) -> Result<LeadWorkflowState> {
        match self.resume_with_scope(lead_id, now, ResumeScope::Lead).await? {
            Some(run) => Ok(run),
            None => Err(EngineError::transition(RunStatus::Paused, RunStatus::Active)),
        }
    }

    async fn resume_with_scope(
        &self,
        lead_id: Uuid,
        now: DateTime<Utc>,
        scope: ResumeScope,
    ) -> Result<Option<LeadWorkflowState>> {
        let resumed = self
            .retry
            .retry_conflicts(move |_| self.try_resume(lead_id, now, scope))
            .await?;

        if let Some(run) = &resumed {
            if run.status == RunStatus::Active {
                self.stamp(
                    lead_id,
                    ActivityType::WorkflowResumed,
                    now,
                    metadata([
                        (
                            "workflow_id",
                            run.workflow_id
                                .map(|id| Value::from(id.to_string()))
                                .unwrap_or(Value::Null),
                        ),
                        ("step", Value::from(run.current_step)),
                        ("version", Value::from(run.version)),
                    ]),
                )
                .await?;
                debug!(lead_id = %lead_id, next_due_at = ?run.next_due_at, "lead resumed");
            }
        }
        Ok(resumed)
    }

    async fn try_resume(
        &self,
        lead_id: Uuid,
        now: DateTime<Utc>,
        scope: ResumeScope,
    ) -> Result<Option<LeadWorkflowState>> {
        let mut run = self.load_run(lead_id).await?;
        let Some(workflow_id) = run.workflow_id else {
            return match scope {
                ResumeScope::Lead => Err(EngineError::validation(format!(
                    "lead {lead_id} is not assigned to a workflow"
                ))),
                ResumeScope::Cascade => Ok(None),
            };
        };
        if run.status != RunStatus::Paused {
            return match scope {
                ResumeScope::Lead => Err(EngineError::transition(run.status, RunStatus::Active)),
                ResumeScope::Cascade => Ok(None),
            };
        }
        if scope == ResumeScope::Cascade && run.paused_by != Some(PauseCause::WorkflowPaused) {
            return Ok(None);
        }

        let expected = run.version;
        let workflow = self
            .workflows
            .get_workflow(workflow_id)
            .await?
            .filter(|w| !w.is_archived());
        match workflow.as_ref().and_then(|w| w.step(run.current_step)) {
            Some(step) => {
                run.status = RunStatus::Active;
                run.paused_by = None;
                run.next_due_at = Some(self.timer.due_at(step, now));
                run.updated_at = now;
            }
            None => run.complete(now),
        }
        Ok(Some(self.save_run(run, expected).await?))
    }

    /// Manually pause one lead; the bound workflow must allow manual pauses
    #[instrument(skip(self))]
    pub async fn pause_lead(&self, lead_id: Uuid, now: DateTime<Utc>) -> Result<LeadWorkflowState> {
        let run = self
            .retry
            .retry_conflicts(move |_| self.try_pause_lead(lead_id, now))
            .await?;
        self.stamp(
            lead_id,
            ActivityType::WorkflowPaused,
            now,
            metadata([
                ("reason", Value::from(PauseCause::Manual.as_str())),
                (
                    "workflow_id",
                    run.workflow_id
                        .map(|id| Value::from(id.to_string()))
                        .unwrap_or(Value::Null),
                ),
                ("version", Value::from(run.version)),
            ]),
        )
        .await?;
        info!(lead_id = %lead_id, "lead paused manually");
        Ok(run)
    }

    async fn try_pause_lead(&self, lead_id: Uuid, now: DateTime<Utc>) -> Result<LeadWorkflowState> {
        let mut run = self.load_run(lead_id).await?;
        let Some(workflow_id) = run.workflow_id else {
            return Err(EngineError::validation(format!(
                "lead {lead_id} is not assigned to a workflow"
            )));
        };
        if run.status != RunStatus::Active {
            return Err(EngineError::transition(run.status, RunStatus::Paused));
        }
        let workflow = self.load_workflow(workflow_id).await?;
        if !workflow.pause_rules.allows_manual_pause() {
            return Err(EngineError::validation(format!(
                "manual pause is not enabled for workflow {workflow_id}"
            )));
        }
        let expected = run.version;
        run.pause(PauseCause::Manual, now);
        self.save_run(run, expected).await
    }

    // =========================================================================
    // Binding (driven by the assignment coordinator)
    // =========================================================================

    /// Bind a lead to `workflow`, replacing any previous run.
    ///
    /// Binding to the workflow the lead is already bound to keeps the run.
    #[instrument(skip(self, workflow), fields(workflow_id = %workflow.id))]
    pub async fn bind_lead(
        &self,
        lead_id: Uuid,
        workflow: &Workflow,
        now: DateTime<Utc>,
    ) -> Result<LeadWorkflowState> {
        let run = self
            .retry
            .retry_conflicts(move |_| self.try_bind(lead_id, workflow, now))
            .await?;
        debug!(lead_id = %lead_id, next_due_at = ?run.next_due_at, "lead bound");
        Ok(run)
    }

    async fn try_bind(
        &self,
        lead_id: Uuid,
        workflow: &Workflow,
        now: DateTime<Utc>,
    ) -> Result<LeadWorkflowState> {
        let existing = self.runs.get_run(lead_id).await?;
        if let Some(run) = &existing {
            if run.workflow_id == Some(workflow.id) {
                return Ok(run.clone());
            }
        }

        let mut run = LeadWorkflowState::bound(lead_id, workflow.id, now);
        match workflow.step(1) {
            Some(first) => run.next_due_at = Some(self.timer.due_at(first, now)),
            None => run.complete(now),
        }

        match self.runs.save_run(run, existing.map(|r| r.version)).await {
            Ok(saved) => Ok(saved),
            // Lost an insert race; retry as an update
            Err(StoreError::AlreadyExists { kind, id }) => {
                Err(EngineError::ConcurrentModification { kind, id })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Detach a lead from its workflow, cancelling any pending step
    #[instrument(skip(self))]
    pub async fn unbind_lead(
        &self,
        lead_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<LeadWorkflowState>> {
        self.retry
            .retry_conflicts(move |_| self.try_unbind(lead_id, now))
            .await
    }

    async fn try_unbind(
        &self,
        lead_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<LeadWorkflowState>> {
        let Some(mut run) = self.runs.get_run(lead_id).await? else {
            return Ok(None);
        };
        if !run.is_bound() {
            return Ok(Some(run));
        }
        let expected = run.version;
        run.unbind(now);
        Ok(Some(self.save_run(run, expected).await?))
    }

    pub async fn get_run(&self, lead_id: Uuid) -> Result<Option<LeadWorkflowState>> {
        Ok(self.runs.get_run(lead_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EmailStep, SendTiming, WaitStep, WaitUnit};
    use crate::notify::LoggingNotifier;
    use crate::pause::{PauseConfig, PauseRules};
    use crate::persistence::{ActivityStore, InMemoryStore};
    use crate::sequence;
    use chrono::{Duration, TimeZone};

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, h, 0, 0).single().unwrap()
    }

    fn machine() -> (WorkflowStateMachine, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let machine = WorkflowStateMachine::new(
            store.clone(),
            store.clone(),
            ActivityLog::new(store.clone()),
            Arc::new(LoggingNotifier),
            StepTimer::default(),
            RetryPolicy::conflict(),
        );
        (machine, store)
    }

    async fn active_workflow(store: &InMemoryStore, rules: Option<PauseRules>) -> Workflow {
        let steps = sequence::build(vec![
            StepAction::Email(EmailStep {
                subject: "Hi".to_string(),
                body: "Hello".to_string(),
                send_timing: SendTiming::Immediate,
                tokens: vec![],
            }),
            StepAction::Wait(WaitStep {
                duration: 2,
                unit: WaitUnit::Days,
                business_hours_only: false,
            }),
        ])
        .unwrap();
        let workflow = Workflow {
            id: Uuid::now_v7(),
            owner_id: Uuid::now_v7(),
            name: "test".to_string(),
            description: None,
            status: WorkflowStatus::Active,
            steps,
            pause_rules: PauseConfig::from(rules),
            provider: None,
            version: 1,
            created_at: at(1, 0),
            updated_at: at(1, 0),
        };
        store.insert_workflow(workflow).await.unwrap()
    }

    fn event(lead_id: Uuid, event_type: ActivityType, occurred_at: DateTime<Utc>) -> ActivityEvent {
        ActivityEvent::new(lead_id, event_type, occurred_at, Map::new())
    }

    fn reply_rules() -> Option<PauseRules> {
        Some(PauseRules {
            on_reply: true,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_reply_pauses_once_and_duplicates_are_ignored() {
        let (machine, store) = machine();
        let workflow = active_workflow(&store, reply_rules()).await;
        let lead = Uuid::now_v7();
        let t0 = at(4, 10);
        machine.bind_lead(lead, &workflow, t0).await.unwrap();

        let reply = event(lead, ActivityType::EmailReplied, t0 + Duration::hours(1));
        let outcome = machine.on_activity(reply.clone(), t0 + Duration::hours(1)).await.unwrap();
        assert_eq!(outcome, ActivityOutcome::Paused(PauseReason::Replied));

        let outcome = machine.on_activity(reply, t0 + Duration::hours(2)).await.unwrap();
        assert_eq!(outcome, ActivityOutcome::Duplicate);

        let second = event(lead, ActivityType::EmailReplied, t0 + Duration::hours(3));
        let outcome = machine.on_activity(second, t0 + Duration::hours(3)).await.unwrap();
        assert_eq!(outcome, ActivityOutcome::AlreadyPaused);

        let stamps = store
            .list_activity(lead)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.event_type == ActivityType::WorkflowPaused)
            .count();
        assert_eq!(stamps, 1);
    }

    #[tokio::test]
    async fn test_resume_resets_due_time_and_evaluation_window() {
        let (machine, store) = machine();
        let workflow = active_workflow(&store, reply_rules()).await;
        let lead = Uuid::now_v7();
        let t0 = at(4, 10);
        machine.bind_lead(lead, &workflow, t0).await.unwrap();
        machine
            .on_activity(event(lead, ActivityType::EmailReplied, t0), t0)
            .await
            .unwrap();

        let later = t0 + Duration::days(3);
        let run = machine.resume(lead, later).await.unwrap();
        assert_eq!(run.status, RunStatus::Active);
        assert_eq!(run.paused_by, None);
        assert_eq!(run.next_due_at, Some(later));

        // The reply that paused the run is outside the new window
        let open = event(lead, ActivityType::EmailOpened, later + Duration::minutes(5));
        let outcome = machine
            .on_activity(open, later + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(outcome, ActivityOutcome::Continued);
    }

    #[tokio::test]
    async fn test_workflow_pause_without_cascade_leaves_runs_active() {
        let (machine, store) = machine();
        let workflow = active_workflow(&store, None).await;
        let lead = Uuid::now_v7();
        let t0 = at(4, 10);
        machine.bind_lead(lead, &workflow, t0).await.unwrap();

        let report = machine
            .pause_workflow(workflow.id, None, false, t0)
            .await
            .unwrap();
        assert_eq!(report.workflow.status, WorkflowStatus::Paused);
        assert!(report.paused_leads.is_empty());
        let run = machine.get_run(lead).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Active);

        // Pausing again is a no-op
        let report = machine
            .pause_workflow(workflow.id, None, false, t0)
            .await
            .unwrap();
        assert_eq!(report.workflow.version, 2);
    }

    #[tokio::test]
    async fn test_activate_resumes_only_cascade_paused_runs() {
        let (machine, store) = machine();
        let rules = Some(PauseRules {
            on_reply: true,
            manual_pause: true,
            ..Default::default()
        });
        let workflow = active_workflow(&store, rules).await;
        let t0 = at(4, 10);
        let cascaded = Uuid::now_v7();
        let manual = Uuid::now_v7();
        machine.bind_lead(cascaded, &workflow, t0).await.unwrap();
        machine.bind_lead(manual, &workflow, t0).await.unwrap();
        machine.pause_lead(manual, t0).await.unwrap();

        let report = machine
            .pause_workflow(workflow.id, Some("holiday"), true, t0)
            .await
            .unwrap();
        assert_eq!(report.paused_leads, vec![cascaded]);

        machine
            .activate(workflow.id, t0 + Duration::hours(1))
            .await
            .unwrap();
        let run = machine.get_run(cascaded).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Active);
        let run = machine.get_run(manual).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Paused);
        assert_eq!(run.paused_by, Some(PauseCause::Manual));
    }

    #[tokio::test]
    async fn test_manual_pause_requires_rule() {
        let (machine, store) = machine();
        let workflow = active_workflow(&store, reply_rules()).await;
        let lead = Uuid::now_v7();
        machine.bind_lead(lead, &workflow, at(4, 10)).await.unwrap();

        let err = machine.pause_lead(lead, at(4, 11)).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_archive_completes_runs_and_is_terminal() {
        let (machine, store) = machine();
        let workflow = active_workflow(&store, None).await;
        let lead = Uuid::now_v7();
        let t0 = at(4, 10);
        machine.bind_lead(lead, &workflow, t0).await.unwrap();

        let archived = machine.archive(workflow.id, t0).await.unwrap();
        assert_eq!(archived.status, WorkflowStatus::Archived);
        let run = machine.get_run(lead).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.next_due_at, None);

        let err = machine.activate(workflow.id, t0).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }
}
