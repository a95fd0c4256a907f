//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use outreach_engine::{
    CreateWorkflow, EmailStep, EngineBuilder, EntityRecord, InMemoryStore, MailError,
    OutboundEmail, OutboundMailer, OutreachEngine, PauseRules, ProviderBinding, SendTiming,
    StepAction, WaitStep, WaitUnit, Workflow,
};

/// Mailer that keeps every email it is asked to send
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutboundEmail>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl OutboundMailer for RecordingMailer {
    async fn send(&self, email: OutboundEmail) -> Result<(), MailError> {
        self.sent.lock().push(email);
        Ok(())
    }
}

pub struct Harness {
    pub engine: OutreachEngine,
    pub store: Arc<InMemoryStore>,
    pub mailer: Arc<RecordingMailer>,
}

pub fn builder() -> (EngineBuilder, Arc<InMemoryStore>, Arc<RecordingMailer>) {
    let store = Arc::new(InMemoryStore::new());
    let mailer = Arc::new(RecordingMailer::default());
    let builder = OutreachEngine::builder(store.clone()).mailer(mailer.clone());
    (builder, store, mailer)
}

pub fn harness() -> Harness {
    let (builder, store, mailer) = builder();
    Harness {
        engine: builder.build(),
        store,
        mailer,
    }
}

pub fn email(subject: &str, body: &str) -> StepAction {
    StepAction::Email(EmailStep {
        subject: subject.to_string(),
        body: body.to_string(),
        send_timing: SendTiming::Immediate,
        tokens: vec!["first_name".to_string(), "company".to_string()],
    })
}

pub fn wait(duration: u32, unit: WaitUnit) -> StepAction {
    StepAction::Wait(WaitStep {
        duration,
        unit,
        business_hours_only: false,
    })
}

pub fn reply_rules() -> PauseRules {
    PauseRules {
        on_reply: true,
        manual_pause: true,
        ..Default::default()
    }
}

/// Create and activate a workflow
pub async fn active_workflow(
    engine: &OutreachEngine,
    steps: Vec<StepAction>,
    pause_rules: Option<PauseRules>,
    provider: Option<ProviderBinding>,
) -> Workflow {
    let now = Utc::now();
    let workflow = engine
        .workflows()
        .create(
            CreateWorkflow {
                owner_id: Uuid::now_v7(),
                name: "Outbound".to_string(),
                description: None,
                steps,
                pause_rules,
                provider,
            },
            now,
        )
        .await
        .unwrap();
    engine.state_machine().activate(workflow.id, now).await.unwrap()
}

/// Register a lead with contact details
pub async fn lead(engine: &OutreachEngine, email: &str) -> EntityRecord {
    let mut record = EntityRecord::lead(Uuid::now_v7(), email);
    record.first_name = Some("Ada".to_string());
    record.company = Some("Analytical".to_string());
    engine.coordinator().put_entity(record).await.unwrap()
}
