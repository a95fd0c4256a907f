//! Engine assembly
//!
//! [`OutreachEngine`] wires every component to one storage backend and
//! exposes them to the HTTP layer and the scheduler loop.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::activity::ActivityLog;
use crate::adapter::{CampaignAdapters, ExternalCampaignAdapter};
use crate::config::EngineConfig;
use crate::coordinator::AssignmentCoordinator;
use crate::error::{EngineError, Result};
use crate::mailer::{LoggingMailer, OutboundMailer};
use crate::model::{ActivityEvent, LeadWorkflowState};
use crate::notify::{LoggingNotifier, PauseNotifier};
use crate::persistence::{ActivityStore, AssignmentStore, OutreachStore, RunStore, WorkflowStore};
use crate::scheduler::{StepScheduler, StepTimer};
use crate::state_machine::{ActivityOutcome, WorkflowStateMachine};
use crate::webhook::WebhookPayload;
use crate::worker::SchedulerLoop;
use crate::workflows::WorkflowService;

/// Builder for [`OutreachEngine`]
pub struct EngineBuilder {
    activity: Arc<dyn ActivityStore>,
    workflows: Arc<dyn WorkflowStore>,
    runs: Arc<dyn RunStore>,
    entities: Arc<dyn AssignmentStore>,
    config: EngineConfig,
    mailer: Arc<dyn OutboundMailer>,
    notifier: Arc<dyn PauseNotifier>,
    adapters: CampaignAdapters,
}

impl EngineBuilder {
    fn new<S: OutreachStore>(store: Arc<S>) -> Self {
        Self {
            activity: store.clone(),
            workflows: store.clone(),
            runs: store.clone(),
            entities: store,
            config: EngineConfig::default(),
            mailer: Arc::new(LoggingMailer),
            notifier: Arc::new(LoggingNotifier),
            adapters: CampaignAdapters::new(),
        }
    }

    /// Keep lead-runs in a separate store from the rest
    pub fn runs(mut self, runs: Arc<dyn RunStore>) -> Self {
        self.runs = runs;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn mailer(mut self, mailer: Arc<dyn OutboundMailer>) -> Self {
        self.mailer = mailer;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn PauseNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Register one campaign adapter
    pub fn adapter(mut self, adapter: Arc<dyn ExternalCampaignAdapter>) -> Self {
        self.adapters.register(adapter);
        self
    }

    pub fn adapters(mut self, adapters: CampaignAdapters) -> Self {
        self.adapters = adapters;
        self
    }

    pub fn build(self) -> OutreachEngine {
        let config = self.config;
        let retry = config.conflict_retry.clone();
        let timer = StepTimer::new(config.business_hours.clone());
        let activity = ActivityLog::new(self.activity);

        let machine = Arc::new(WorkflowStateMachine::new(
            self.workflows.clone(),
            self.runs.clone(),
            activity.clone(),
            self.notifier,
            timer.clone(),
            retry.clone(),
        ));
        let scheduler = Arc::new(StepScheduler::new(
            self.workflows.clone(),
            self.runs.clone(),
            self.entities.clone(),
            activity.clone(),
            self.mailer,
            timer,
            retry.clone(),
            config.batch_size,
            config.concurrency,
        ));
        let workflows = WorkflowService::new(self.workflows.clone(), self.runs, retry.clone());
        let coordinator = AssignmentCoordinator::new(
            self.entities,
            self.workflows,
            machine.clone(),
            self.adapters,
            config.campaign_sync_timeout,
            retry,
            config.concurrency,
        );

        OutreachEngine {
            config,
            activity,
            workflows,
            machine,
            scheduler,
            coordinator,
        }
    }
}

/// The assembled outreach engine
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use outreach_engine::{InMemoryStore, OutreachEngine};
///
/// let engine = OutreachEngine::builder(Arc::new(InMemoryStore::new())).build();
/// assert_eq!(engine.config().batch_size, 100);
/// ```
pub struct OutreachEngine {
    config: EngineConfig,
    activity: ActivityLog,
    workflows: WorkflowService,
    machine: Arc<WorkflowStateMachine>,
    scheduler: Arc<StepScheduler>,
    coordinator: AssignmentCoordinator,
}

impl OutreachEngine {
    pub fn builder<S: OutreachStore>(store: Arc<S>) -> EngineBuilder {
        EngineBuilder::new(store)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn workflows(&self) -> &WorkflowService {
        &self.workflows
    }

    pub fn state_machine(&self) -> &WorkflowStateMachine {
        &self.machine
    }

    pub fn scheduler(&self) -> &StepScheduler {
        &self.scheduler
    }

    pub fn coordinator(&self) -> &AssignmentCoordinator {
        &self.coordinator
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    /// Accept a provider webhook; the pause outcome is not part of the reply
    pub async fn ingest_webhook(&self, payload: WebhookPayload) -> Result<ActivityOutcome> {
        let now = Utc::now();
        let event = payload.into_event(now)?;
        self.machine.on_activity(event, now).await
    }

    pub async fn record_activity(&self, event: ActivityEvent) -> Result<ActivityOutcome> {
        self.machine.on_activity(event, Utc::now()).await
    }

    /// Activity for a lead, newest first
    pub async fn list_activity(&self, lead_id: Uuid) -> Result<Vec<ActivityEvent>> {
        self.activity.history(lead_id).await
    }

    pub async fn get_lead_state(&self, lead_id: Uuid) -> Result<LeadWorkflowState> {
        self.machine
            .get_run(lead_id)
            .await?
            .ok_or(EngineError::not_found("lead run", lead_id))
    }

    pub async fn resume_lead(&self, lead_id: Uuid) -> Result<LeadWorkflowState> {
        self.machine.resume(lead_id, Utc::now()).await
    }

    pub async fn pause_lead(&self, lead_id: Uuid) -> Result<LeadWorkflowState> {
        self.machine.pause_lead(lead_id, Utc::now()).await
    }

    /// Background loop ticking this engine's scheduler until `shutdown_rx` flips
    pub fn scheduler_loop(&self, shutdown_rx: watch::Receiver<bool>) -> SchedulerLoop {
        SchedulerLoop::new(
            self.scheduler.clone(),
            self.config.tick_interval,
            self.config.batch_size,
            shutdown_rx,
        )
    }
}
