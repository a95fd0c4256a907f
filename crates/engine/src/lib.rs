//! # Outreach Workflow Engine
//!
//! Drives leads through multi-step outreach sequences and keeps ownership of
//! leads and companies auditable.
//!
//! ## Features
//!
//! - **Sequences**: ordered email / wait / condition steps with stable ids and atomic reordering
//! - **Pause rules**: reply, click and open-count rules evaluated over each lead's activity
//! - **Idempotent activity log**: redelivered webhook events are recognised by fingerprint
//! - **Versioned lead-runs**: every run transition is a compare-and-swap with bounded retry
//! - **Business-hours scheduling**: waits and sends that only count Monday to Friday working hours
//! - **Assignments**: append-only ownership history, bulk reporting and best-effort campaign sync
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐     ┌──────────────────────────┐
//! │  webhook / API caller    │     │      SchedulerLoop       │
//! └────────────┬─────────────┘     └────────────┬─────────────┘
//!              │                                │ tick(now)
//!              ▼                                ▼
//! ┌──────────────────────────┐     ┌──────────────────────────┐
//! │  AssignmentCoordinator   │     │      StepScheduler       │
//! │  (owner, history, sync)  │     │  (due steps, emails)     │
//! └────────────┬─────────────┘     └────────────┬─────────────┘
//!              │ bind / unbind                  │
//!              ▼                                ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   WorkflowStateMachine                       │
//! │  (workflow lifecycle, lead-run transitions, pause rules)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │   ActivityStore · WorkflowStore · RunStore · AssignmentStore │
//! │            (InMemoryStore or PostgresStore)                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use chrono::Utc;
//! use outreach_engine::{CreateWorkflow, InMemoryStore, OutreachEngine, StepAction, StepKind};
//! use uuid::Uuid;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let engine = OutreachEngine::builder(Arc::new(InMemoryStore::new())).build();
//! let workflow = engine
//!     .workflows()
//!     .create(
//!         CreateWorkflow {
//!             owner_id: Uuid::now_v7(),
//!             name: "Welcome".into(),
//!             description: None,
//!             steps: vec![StepAction::default_for(StepKind::Wait)],
//!             pause_rules: None,
//!             provider: None,
//!         },
//!         Utc::now(),
//!     )
//!     .await
//!     .unwrap();
//! assert_eq!(workflow.steps.len(), 1);
//! # }
//! ```

pub mod activity;
pub mod adapter;
pub mod business_hours;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod mailer;
pub mod model;
pub mod notify;
pub mod pause;
pub mod persistence;
pub mod reliability;
pub mod scheduler;
pub mod sequence;
pub mod state_machine;
pub mod webhook;
pub mod worker;
pub mod workflows;

pub use activity::ActivityLog;
pub use adapter::{
    CampaignAdapters, CampaignContact, CampaignError, ExternalCampaignAdapter, ExternalSyncFailure,
    InMemoryCampaignAdapter, ProviderContactId, SyncReport,
};
pub use business_hours::BusinessHours;
pub use config::EngineConfig;
pub use coordinator::{AssignmentCoordinator, AssignmentOutcome, BulkAssignResult, BulkFailure};
pub use engine::{EngineBuilder, OutreachEngine};
pub use error::{EngineError, Result};
pub use mailer::{LoggingMailer, MailError, OutboundEmail, OutboundMailer};
pub use model::*;
pub use notify::{LoggingNotifier, NotifyError, PauseNotice, PauseNotifier};
pub use pause::{PauseConfig, PauseDecision, PauseReason, PauseRules};
pub use persistence::{
    ActivityStore, AppendOutcome, AssignmentStore, InMemoryStore, OutreachStore, PostgresStore,
    RunStore, StoreError, WorkflowStore,
};
pub use reliability::RetryPolicy;
pub use scheduler::{AdvanceOutcome, SkipReason, StepScheduler, StepTimer, TickReport};
pub use state_machine::{ActivityOutcome, WorkflowPauseReport, WorkflowStateMachine};
pub use webhook::WebhookPayload;
pub use worker::SchedulerLoop;
pub use workflows::WorkflowService;
