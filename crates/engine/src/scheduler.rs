//! StepScheduler: fires due steps and moves lead-runs through their sequence
//!
//! A run waiting on a step is plain durable state (`next_due_at`), so a
//! restart loses nothing. Each advance is computed from a snapshot of the run,
//! committed with a version check, and only then are emails handed to the
//! mailer, so an email goes out at most once per committed step.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::activity::ActivityLog;
use crate::business_hours::{saturating_add, BusinessHours};
use crate::error::Result;
use crate::mailer::{OutboundEmail, OutboundMailer};
use crate::model::{
    ActivityEvent, EmailStep, EntityType, LeadWorkflowState, RunStatus, SendTiming, SequenceStep,
    StepAction, Workflow, WorkflowStatus,
};
use crate::persistence::{AssignmentStore, RunStore, WorkflowStore};
use crate::reliability::RetryPolicy;
use crate::sequence;

/// Computes when a step becomes due
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepTimer {
    hours: BusinessHours,
}

impl StepTimer {
    pub fn new(hours: BusinessHours) -> Self {
        Self { hours }
    }

    pub fn business_hours(&self) -> &BusinessHours {
        &self.hours
    }

    /// Due time of `step` for a run that entered it at `entered_at`
    pub fn due_at(&self, step: &SequenceStep, entered_at: DateTime<Utc>) -> DateTime<Utc> {
        match &step.action {
            StepAction::Email(email) => match email.send_timing {
                SendTiming::Immediate => entered_at,
                SendTiming::BusinessHoursOnly => self.hours.next_open(entered_at),
            },
            StepAction::Wait(wait) => self.hours.wait_due(entered_at, wait),
            StepAction::Condition(condition) => {
                saturating_add(entered_at, Duration::hours(i64::from(condition.wait_hours)))
            }
        }
    }
}

/// Why a run was left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoRun,
    /// Paused, completed, or unbound
    NotActive,
    /// The workflow is a draft or paused
    WorkflowNotActive,
}

/// Result of advancing one run
#[derive(Debug, Clone, PartialEq)]
pub enum AdvanceOutcome {
    /// The current step is not due yet
    NotDue,
    Skipped(SkipReason),
    /// The run moved; `run.status` tells whether it completed
    Advanced {
        from_step: u32,
        run: LeadWorkflowState,
        emails_sent: usize,
    },
}

/// Counters for one scheduler tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub due: usize,
    pub advanced: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub emails_sent: usize,
}

struct PendingEmail {
    step_number: u32,
    email: EmailStep,
}

struct Plan {
    run: LeadWorkflowState,
    emails: Vec<PendingEmail>,
}

enum Attempt {
    Committed {
        from_step: u32,
        run: LeadWorkflowState,
        emails: Vec<PendingEmail>,
    },
    Idle(AdvanceOutcome),
}

/// Pure step transition: walk the run forward while its current step is due.
///
/// Each step is timed from the due time of the step before it, and the walk
/// is bounded by the sequence length so branch cycles cannot spin.
fn plan_advance(
    timer: &StepTimer,
    workflow: &Workflow,
    run: &LeadWorkflowState,
    history: &[ActivityEvent],
    now: DateTime<Utc>,
) -> Plan {
    let mut next = run.clone();
    let mut emails = Vec::new();

    for _ in 0..=workflow.steps.len() {
        let Some(due) = next.next_due_at else { break };
        if due > now || next.status != RunStatus::Active {
            break;
        }
        let Some(step) = workflow.step(next.current_step) else {
            next.complete(now);
            break;
        };

        let target = match &step.action {
            StepAction::Email(email) => {
                emails.push(PendingEmail {
                    step_number: step.step_number,
                    email: email.clone(),
                });
                next.last_fired_step = Some(step.step_number);
                next.last_fired_at = Some(due);
                sequence::next_step_number(&workflow.steps, step.step_number)
            }
            StepAction::Wait(_) => sequence::next_step_number(&workflow.steps, step.step_number),
            StepAction::Condition(condition) => {
                let wanted = condition.condition.activity_type();
                let satisfied = history
                    .iter()
                    .any(|e| e.event_type == wanted && e.occurred_at >= next.step_entered_at);
                if satisfied {
                    match condition.on_satisfied {
                        Some(id) => sequence::step_number_of(&workflow.steps, id),
                        None => sequence::next_step_number(&workflow.steps, step.step_number),
                    }
                } else {
                    condition
                        .on_not_satisfied
                        .and_then(|id| sequence::step_number_of(&workflow.steps, id))
                }
            }
        };

        match target.and_then(|n| workflow.step(n)) {
            Some(target_step) => {
                next.current_step = target_step.step_number;
                next.step_entered_at = due;
                next.next_due_at = Some(timer.due_at(target_step, due));
                next.updated_at = now;
            }
            None => next.complete(now),
        }
    }

    Plan { run: next, emails }
}

/// Fires due steps for active lead-runs
pub struct StepScheduler {
    workflows: Arc<dyn WorkflowStore>,
    runs: Arc<dyn RunStore>,
    entities: Arc<dyn AssignmentStore>,
    activity: ActivityLog,
    mailer: Arc<dyn OutboundMailer>,
    timer: StepTimer,
    retry: RetryPolicy,
    batch_size: usize,
    concurrency: usize,
}

impl StepScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        workflows: Arc<dyn WorkflowStore>,
        runs: Arc<dyn RunStore>,
        entities: Arc<dyn AssignmentStore>,
        activity: ActivityLog,
        mailer: Arc<dyn OutboundMailer>,
        timer: StepTimer,
        retry: RetryPolicy,
        batch_size: usize,
        concurrency: usize,
    ) -> Self {
        Self {
            workflows,
            runs,
            entities,
            activity,
            mailer,
            timer,
            retry,
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
        }
    }

    pub fn timer(&self) -> &StepTimer {
        &self.timer
    }

    /// Advance every run due at `now`, up to the batch size
    #[instrument(skip(self))]
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let due = self.runs.list_due_runs(now, self.batch_size).await?;
        let mut report = TickReport {
            due: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            return Ok(report);
        }

        let outcomes: Vec<(Uuid, Result<AdvanceOutcome>)> = stream::iter(due)
            .map(|run| async move { (run.lead_id, self.advance(run.lead_id, now).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (lead_id, outcome) in outcomes {
            match outcome {
                Ok(AdvanceOutcome::Advanced {
                    run, emails_sent, ..
                }) => {
                    report.advanced += 1;
                    report.emails_sent += emails_sent;
                    if run.status == RunStatus::Completed {
                        report.completed += 1;
                    }
                }
                Ok(AdvanceOutcome::NotDue) | Ok(AdvanceOutcome::Skipped(_)) => report.skipped += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(lead_id = %lead_id, error = %err, "failed to advance lead");
                }
            }
        }

        info!(
            due = report.due,
            advanced = report.advanced,
            completed = report.completed,
            failed = report.failed,
            "scheduler tick"
        );
        Ok(report)
    }

    /// Advance one lead's run if its current step is due at `now`
    #[instrument(skip(self))]
    pub async fn advance(&self, lead_id: Uuid, now: DateTime<Utc>) -> Result<AdvanceOutcome> {
        let committed = self
            .retry
            .retry_conflicts(move |_| self.try_advance(lead_id, now))
            .await?;

        let (from_step, run, emails) = match committed {
            Attempt::Committed {
                from_step,
                run,
                emails,
            } => (from_step, run, emails),
            Attempt::Idle(outcome) => return Ok(outcome),
        };

        let emails_sent = match (run.workflow_id, emails.is_empty()) {
            (Some(workflow_id), false) => self.dispatch(lead_id, workflow_id, emails).await,
            _ => 0,
        };

        debug!(
            lead_id = %lead_id,
            from_step,
            to_step = run.current_step,
            status = %run.status,
            emails_sent,
            "lead advanced"
        );
        Ok(AdvanceOutcome::Advanced {
            from_step,
            run,
            emails_sent,
        })
    }

    async fn try_advance(&self, lead_id: Uuid, now: DateTime<Utc>) -> Result<Attempt> {
        let Some(run) = self.runs.get_run(lead_id).await? else {
            return Ok(Attempt::Idle(AdvanceOutcome::Skipped(SkipReason::NoRun)));
        };
        let Some(workflow_id) = run.workflow_id.filter(|_| run.is_live()) else {
            return Ok(Attempt::Idle(AdvanceOutcome::Skipped(SkipReason::NotActive)));
        };
        if run.next_due_at.map_or(true, |due| due > now) {
            return Ok(Attempt::Idle(AdvanceOutcome::NotDue));
        }

        let from_step = run.current_step;
        let expected = run.version;

        let workflow = match self.workflows.get_workflow(workflow_id).await? {
            Some(workflow) if !workflow.is_archived() => workflow,
            // Deleted or archived workflows never schedule; settle the run
            _ => {
                let mut done = run;
                done.complete(now);
                let saved = self.runs.save_run(done, Some(expected)).await?;
                return Ok(Attempt::Committed {
                    from_step,
                    run: saved,
                    emails: Vec::new(),
                });
            }
        };
        if workflow.status != WorkflowStatus::Active {
            return Ok(Attempt::Idle(AdvanceOutcome::Skipped(
                SkipReason::WorkflowNotActive,
            )));
        }

        let history = self.activity.entries(lead_id).await?;
        let plan = plan_advance(&self.timer, &workflow, &run, &history, now);
        if plan.run == run {
            return Ok(Attempt::Idle(AdvanceOutcome::NotDue));
        }

        let saved = self.runs.save_run(plan.run, Some(expected)).await?;
        Ok(Attempt::Committed {
            from_step,
            run: saved,
            emails: plan.emails,
        })
    }

    async fn dispatch(&self, lead_id: Uuid, workflow_id: Uuid, emails: Vec<PendingEmail>) -> usize {
        let (to, vars) = match self.entities.get_entity(EntityType::Lead, lead_id).await {
            Ok(Some(lead)) => (lead.email.clone(), lead.template_vars()),
            Ok(None) => (None, Default::default()),
            Err(err) => {
                warn!(lead_id = %lead_id, error = %err, "could not load lead for email rendering");
                (None, Default::default())
            }
        };

        let mut sent = 0;
        for pending in emails {
            let rendered = pending.email.render(&vars);
            let email = OutboundEmail {
                lead_id,
                workflow_id,
                step_number: pending.step_number,
                to: to.clone(),
                subject: rendered.subject,
                body: rendered.body,
            };
            match self.mailer.send(email).await {
                Ok(()) => sent += 1,
                Err(err) => warn!(
                    lead_id = %lead_id,
                    step = pending.step_number,
                    error = %err,
                    "email step delivery failed"
                ),
            }
        }
        sent
    }

    /// Due time a run would get for `step` entered at `entered_at`
    pub fn due_at(&self, step: &SequenceStep, entered_at: DateTime<Utc>) -> DateTime<Utc> {
        self.timer.due_at(step, entered_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ActivityType, ConditionStep, ConditionType, StepKind, WaitStep, WaitUnit,
    };
    use crate::pause::PauseConfig;
    use chrono::TimeZone;
    use serde_json::Map;

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, h, 0, 0).single().unwrap()
    }

    fn email() -> StepAction {
        StepAction::Email(EmailStep {
            subject: "Hi".to_string(),
            body: "Hello".to_string(),
            send_timing: SendTiming::Immediate,
            tokens: vec![],
        })
    }

    fn workflow(actions: Vec<StepAction>) -> Workflow {
        Workflow {
            id: Uuid::now_v7(),
            owner_id: Uuid::now_v7(),
            name: "test".to_string(),
            description: None,
            status: WorkflowStatus::Active,
            steps: sequence::build(actions).unwrap(),
            pause_rules: PauseConfig::NotConfigured,
            provider: None,
            version: 1,
            created_at: at(1, 0),
            updated_at: at(1, 0),
        }
    }

    fn bound(workflow: &Workflow, now: DateTime<Utc>) -> LeadWorkflowState {
        let timer = StepTimer::default();
        let mut run = LeadWorkflowState::bound(Uuid::now_v7(), workflow.id, now);
        run.next_due_at = workflow.step(1).map(|s| timer.due_at(s, now));
        run
    }

    #[test]
    fn test_immediate_email_then_wait_settles_in_one_pass() {
        let wf = workflow(vec![
            email(),
            StepAction::Wait(WaitStep {
                duration: 2,
                unit: WaitUnit::Days,
                business_hours_only: false,
            }),
            StepAction::default_for(StepKind::Condition),
        ]);
        let t0 = at(4, 10);
        let run = bound(&wf, t0);

        let plan = plan_advance(&StepTimer::default(), &wf, &run, &[], t0);
        assert_eq!(plan.emails.len(), 1);
        assert_eq!(plan.run.current_step, 2);
        assert_eq!(plan.run.step_entered_at, t0);
        assert_eq!(plan.run.next_due_at, Some(t0 + Duration::hours(48)));
        assert_eq!(plan.run.last_fired_step, Some(1));
    }

    #[test]
    fn test_late_tick_does_not_drift_schedule() {
        let wf = workflow(vec![
            StepAction::Wait(WaitStep {
                duration: 1,
                unit: WaitUnit::Hours,
                business_hours_only: false,
            }),
            StepAction::Wait(WaitStep {
                duration: 1,
                unit: WaitUnit::Days,
                business_hours_only: false,
            }),
        ]);
        let t0 = at(4, 10);
        let run = bound(&wf, t0);
        // Tick three hours late
        let plan = plan_advance(&StepTimer::default(), &wf, &run, &[], t0 + Duration::hours(4));
        assert_eq!(plan.run.current_step, 2);
        assert_eq!(plan.run.step_entered_at, t0 + Duration::hours(1));
        assert_eq!(plan.run.next_due_at, Some(t0 + Duration::hours(25)));
    }

    #[test]
    fn test_condition_without_else_branch_completes() {
        let wf = workflow(vec![StepAction::Condition(ConditionStep {
            condition: ConditionType::Replied,
            wait_hours: 24,
            on_satisfied: None,
            on_not_satisfied: None,
        })]);
        let t0 = at(4, 10);
        let run = bound(&wf, t0);

        let plan = plan_advance(&StepTimer::default(), &wf, &run, &[], t0 + Duration::hours(24));
        assert_eq!(plan.run.status, RunStatus::Completed);
        assert_eq!(plan.run.next_due_at, None);
    }

    #[test]
    fn test_condition_branches_on_activity_since_entry() {
        let mut wf = workflow(vec![
            StepAction::default_for(StepKind::Condition),
            email(),
            email(),
        ]);
        let third = wf.steps[2].id;
        wf.steps[0].action = StepAction::Condition(ConditionStep {
            condition: ConditionType::Opened,
            wait_hours: 24,
            on_satisfied: Some(third),
            on_not_satisfied: None,
        });
        let t0 = at(4, 10);
        let run = bound(&wf, t0);
        let before = ActivityEvent::new(
            run.lead_id,
            ActivityType::EmailOpened,
            t0 - Duration::hours(1),
            Map::new(),
        );
        let after = ActivityEvent::new(
            run.lead_id,
            ActivityType::EmailOpened,
            t0 + Duration::hours(1),
            Map::new(),
        );
        let check_at = t0 + Duration::hours(24);

        let unsatisfied = plan_advance(&StepTimer::default(), &wf, &run, &[before.clone()], check_at);
        assert_eq!(unsatisfied.run.status, RunStatus::Completed);

        let satisfied = plan_advance(&StepTimer::default(), &wf, &run, &[before, after], check_at);
        // Jumped to step 3, which fires immediately and ends the sequence
        assert_eq!(satisfied.emails.len(), 1);
        assert_eq!(satisfied.emails[0].step_number, 3);
        assert_eq!(satisfied.run.status, RunStatus::Completed);
    }

    #[test]
    fn test_not_due_plan_is_unchanged() {
        let wf = workflow(vec![StepAction::Wait(WaitStep {
            duration: 1,
            unit: WaitUnit::Days,
            business_hours_only: false,
        })]);
        let t0 = at(4, 10);
        let run = bound(&wf, t0);
        let plan = plan_advance(&StepTimer::default(), &wf, &run, &[], t0 + Duration::hours(23));
        assert_eq!(plan.run, run);
    }

    #[test]
    fn test_business_hours_email_waits_for_opening() {
        let timer = StepTimer::default();
        let step = SequenceStep::new(
            1,
            StepAction::Email(EmailStep {
                subject: "s".to_string(),
                body: "b".to_string(),
                send_timing: SendTiming::BusinessHoursOnly,
                tokens: vec![],
            }),
        );
        // Saturday noon -> Monday 09:00
        assert_eq!(timer.due_at(&step, at(2, 12)), at(4, 9));
    }
}
