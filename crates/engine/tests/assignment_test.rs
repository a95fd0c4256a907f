//! Assignment coordinator behaviour: history, bulk reporting, conflicts and provider sync

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use common::{active_workflow, builder, email, harness, lead, wait};
use outreach_engine::{
    Actor, CampaignError, EngineConfig, EngineError, EntityRecord, EntityType,
    InMemoryCampaignAdapter, InMemoryStore, LeadWorkflowState, ProviderBinding, RunStatus,
    RunStore, StoreError, SyncReport, WaitUnit,
};

/// Run store whose writes can be switched to fail
struct FlakyRunStore {
    inner: Arc<InMemoryStore>,
    failing: AtomicBool,
}

#[async_trait]
impl RunStore for FlakyRunStore {
    async fn get_run(&self, lead_id: Uuid) -> Result<Option<LeadWorkflowState>, StoreError> {
        self.inner.get_run(lead_id).await
    }

    async fn save_run(
        &self,
        run: LeadWorkflowState,
        expected_version: Option<i64>,
    ) -> Result<LeadWorkflowState, StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Database("connection reset".to_string()));
        }
        self.inner.save_run(run, expected_version).await
    }

    async fn list_due_runs(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<LeadWorkflowState>, StoreError> {
        self.inner.list_due_runs(now, limit).await
    }

    async fn list_runs_for_workflow(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<LeadWorkflowState>, StoreError> {
        self.inner.list_runs_for_workflow(workflow_id).await
    }
}

fn binding() -> Option<ProviderBinding> {
    Some(ProviderBinding {
        provider: "campaigns".to_string(),
        campaign_id: "spring-launch".to_string(),
    })
}

#[test_log::test(tokio::test)]
async fn test_bulk_assign_reports_partial_failure() {
    let h = harness();
    let owner = Uuid::now_v7();
    let actor = Actor::new(Uuid::now_v7());
    let a = lead(&h.engine, "a@example.com").await;
    let b = lead(&h.engine, "b@example.com").await;
    let missing = Uuid::now_v7();

    let result = h
        .engine
        .coordinator()
        .bulk_assign(EntityType::Lead, &[a.id, missing, b.id], owner, actor)
        .await;

    assert_eq!(result.succeeded, vec![a.id, b.id]);
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].id, missing);
    assert!(result.failed[0].reason.contains("not found"));
    assert_eq!(result.summary(), "Successfully assigned 2 of 3 leads");
    assert_eq!(
        result.failure_warning().as_deref(),
        Some("1 leads could not be assigned")
    );

    let a = h
        .engine
        .coordinator()
        .get_entity(EntityType::Lead, a.id)
        .await
        .unwrap();
    assert_eq!(a.owner_id, Some(owner));
}

#[test_log::test(tokio::test)]
async fn test_history_is_newest_first_and_immutable() {
    let h = harness();
    let actor = Actor::new(Uuid::now_v7());
    let first_owner = Uuid::now_v7();
    let second_owner = Uuid::now_v7();
    let lead = lead(&h.engine, "h@example.com").await;
    let coordinator = h.engine.coordinator();

    coordinator
        .assign(EntityType::Lead, lead.id, first_owner, actor, None)
        .await
        .unwrap();
    coordinator
        .reassign(EntityType::Lead, lead.id, second_owner, actor, None)
        .await
        .unwrap();
    let before = coordinator.history(EntityType::Lead, lead.id).await.unwrap();

    coordinator
        .unassign(EntityType::Lead, lead.id, actor, None)
        .await
        .unwrap();
    let after = coordinator.history(EntityType::Lead, lead.id).await.unwrap();

    assert_eq!(after.len(), 3);
    assert_eq!(after[0].new_owner_id, None);
    assert_eq!(after[0].previous_owner_id, Some(second_owner));
    assert_eq!(after[1].new_owner_id, Some(second_owner));
    assert_eq!(after[1].previous_owner_id, Some(first_owner));
    assert_eq!(after[2].previous_owner_id, None);
    assert_eq!(&after[1..], &before[..]);
}

#[test_log::test(tokio::test)]
async fn test_reassign_requires_owner_and_unassign_of_unowned_is_noop() {
    let h = harness();
    let actor = Actor::new(Uuid::now_v7());
    let lead = lead(&h.engine, "n@example.com").await;
    let coordinator = h.engine.coordinator();

    let err = coordinator
        .reassign(EntityType::Lead, lead.id, Uuid::now_v7(), actor, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    let outcome = coordinator
        .unassign(EntityType::Lead, lead.id, actor, None)
        .await
        .unwrap();
    assert!(outcome.history.is_none());
    assert!(coordinator
        .history(EntityType::Lead, lead.id)
        .await
        .unwrap()
        .is_empty());
}

#[test_log::test(tokio::test)]
async fn test_company_assignment_needs_admin() {
    let h = harness();
    let company = h
        .engine
        .coordinator()
        .put_entity(EntityRecord::company(Uuid::now_v7(), "Analytical Engines"))
        .await
        .unwrap();
    let owner = Uuid::now_v7();

    let err = h
        .engine
        .coordinator()
        .assign(
            EntityType::Company,
            company.id,
            owner,
            Actor::new(Uuid::now_v7()),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));

    let outcome = h
        .engine
        .coordinator()
        .assign(
            EntityType::Company,
            company.id,
            owner,
            Actor::admin(Uuid::now_v7()),
            None,
        )
        .await
        .unwrap();
    assert_eq!(outcome.entity.owner_id, Some(owner));
    assert!(outcome.run.is_none());
}

#[test_log::test(tokio::test)]
async fn test_stale_version_is_reported() {
    let h = harness();
    let actor = Actor::new(Uuid::now_v7());
    let lead = lead(&h.engine, "v@example.com").await;
    let coordinator = h.engine.coordinator();

    coordinator
        .assign(
            EntityType::Lead,
            lead.id,
            Uuid::now_v7(),
            actor,
            Some(lead.version),
        )
        .await
        .unwrap();
    let err = coordinator
        .assign(
            EntityType::Lead,
            lead.id,
            Uuid::now_v7(),
            actor,
            Some(lead.version),
        )
        .await
        .unwrap_err();
    assert!(err.is_conflict());
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_concurrent_assigns_never_disagree() {
    let h = Arc::new(harness());
    let actor = Actor::new(Uuid::now_v7());
    let lead = lead(&h.engine, "race@example.com").await;
    let owners = [Uuid::now_v7(), Uuid::now_v7()];
    let (lead_id, version) = (lead.id, lead.version);

    let tasks: Vec<_> = owners
        .iter()
        .map(|&owner| {
            let h = h.clone();
            tokio::spawn(async move {
                h.engine
                    .coordinator()
                    .assign(EntityType::Lead, lead_id, owner, actor, Some(version))
                    .await
                    .map(|outcome| (owner, outcome))
            })
        })
        .collect();

    let mut winners = Vec::new();
    for task in tasks {
        match task.await.unwrap() {
            Ok((owner, outcome)) => winners.push((owner, outcome.entity.version)),
            Err(err) => assert!(err.is_conflict(), "unexpected error: {err}"),
        }
    }
    assert!(!winners.is_empty());

    let entity = h
        .engine
        .coordinator()
        .get_entity(EntityType::Lead, lead.id)
        .await
        .unwrap();
    let history = h
        .engine
        .coordinator()
        .history(EntityType::Lead, lead.id)
        .await
        .unwrap();
    assert_eq!(history.len(), winners.len());
    assert_eq!(entity.owner_id, history[0].new_owner_id);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_concurrent_workflow_assigns_leave_one_binding() {
    let h = Arc::new(harness());
    let actor = Actor::new(Uuid::now_v7());
    let first = active_workflow(&h.engine, vec![wait(1, WaitUnit::Days)], None, None).await;
    let second = active_workflow(&h.engine, vec![wait(2, WaitUnit::Days)], None, None).await;
    let lead = lead(&h.engine, "bind@example.com").await;
    let lead_id = lead.id;

    let tasks: Vec<_> = [first.id, second.id]
        .into_iter()
        .map(|workflow_id| {
            let h = h.clone();
            tokio::spawn(async move {
                h.engine
                    .coordinator()
                    .assign(EntityType::Lead, lead_id, workflow_id, actor, None)
                    .await
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let entity = h
        .engine
        .coordinator()
        .get_entity(EntityType::Lead, lead.id)
        .await
        .unwrap();
    let run = h.engine.get_lead_state(lead.id).await.unwrap();
    assert_eq!(run.workflow_id, entity.owner_id);
    assert_eq!(run.status, RunStatus::Active);
}

#[test_log::test(tokio::test)]
async fn test_campaign_sync_success_and_already_exists() {
    let (builder, _store, _mailer) = builder();
    let adapter = Arc::new(InMemoryCampaignAdapter::new("campaigns"));
    let engine = builder.adapter(adapter.clone()).build();
    let workflow = active_workflow(&engine, vec![email("Hi", "Body")], None, binding()).await;
    let actor = Actor::new(Uuid::now_v7());

    let first = lead(&engine, "same@example.com").await;
    let outcome = engine
        .coordinator()
        .assign(EntityType::Lead, first.id, workflow.id, actor, None)
        .await
        .unwrap();
    assert!(matches!(
        outcome.sync,
        SyncReport::Synced {
            contact_id: Some(_),
            ..
        }
    ));

    // Same address again: the provider already has it, which counts as synced
    let second = lead(&engine, "same@example.com").await;
    let outcome = engine
        .coordinator()
        .assign(EntityType::Lead, second.id, workflow.id, actor, None)
        .await
        .unwrap();
    assert!(matches!(
        outcome.sync,
        SyncReport::Synced {
            contact_id: None,
            ..
        }
    ));
    assert_eq!(adapter.contact_count("spring-launch"), 1);
}

#[test_log::test(tokio::test)]
async fn test_campaign_sync_failure_keeps_assignment() {
    let (builder, _store, _mailer) = builder();
    let adapter = Arc::new(InMemoryCampaignAdapter::new("campaigns"));
    adapter.fail_with(Some(CampaignError::Transport("connection refused".into())));
    let engine = builder.adapter(adapter.clone()).build();
    let workflow = active_workflow(&engine, vec![email("Hi", "Body")], None, binding()).await;
    let lead = lead(&engine, "fail@example.com").await;

    let outcome = engine
        .coordinator()
        .assign(
            EntityType::Lead,
            lead.id,
            workflow.id,
            Actor::new(Uuid::now_v7()),
            None,
        )
        .await
        .unwrap();

    let failure = outcome.sync.failure().expect("sync should have failed");
    assert_eq!(failure.entity_id, lead.id);
    assert!(failure.reason.contains("connection refused"));
    assert_eq!(outcome.entity.owner_id, Some(workflow.id));
    assert_eq!(outcome.run.map(|r| r.status), Some(RunStatus::Active));
}

#[test_log::test(tokio::test)]
async fn test_campaign_sync_is_time_bounded() {
    let (builder, _store, _mailer) = builder();
    let adapter = Arc::new(InMemoryCampaignAdapter::new("campaigns"));
    adapter.set_delay(Duration::from_millis(500));
    let engine = builder
        .config(EngineConfig::default().with_campaign_sync_timeout(Duration::from_millis(20)))
        .adapter(adapter.clone())
        .build();
    let workflow = active_workflow(&engine, vec![email("Hi", "Body")], None, binding()).await;
    let lead = lead(&engine, "slow@example.com").await;

    let outcome = engine
        .coordinator()
        .assign(
            EntityType::Lead,
            lead.id,
            workflow.id,
            Actor::new(Uuid::now_v7()),
            None,
        )
        .await
        .unwrap();
    let failure = outcome.sync.failure().expect("sync should time out");
    assert!(failure.reason.contains("timed out"));
    assert_eq!(outcome.entity.owner_id, Some(workflow.id));
}

#[test_log::test(tokio::test)]
async fn test_bulk_collects_sync_failures_separately() {
    let (builder, _store, _mailer) = builder();
    let engine = builder.build();
    // No adapter registered for the workflow's provider
    let workflow = active_workflow(&engine, vec![email("Hi", "Body")], None, binding()).await;
    let a = lead(&engine, "x@example.com").await;
    let b = lead(&engine, "y@example.com").await;

    let result = engine
        .coordinator()
        .bulk_assign(
            EntityType::Lead,
            &[a.id, b.id],
            workflow.id,
            Actor::new(Uuid::now_v7()),
        )
        .await;
    assert_eq!(result.succeeded.len(), 2);
    assert!(result.failed.is_empty());
    assert!(result.failure_warning().is_none());
    assert_eq!(result.sync_failures.len(), 2);
}

#[test_log::test(tokio::test)]
async fn test_workflow_targets_are_validated() {
    let h = harness();
    let workflow = active_workflow(&h.engine, vec![wait(1, WaitUnit::Days)], None, None).await;
    let company = h
        .engine
        .coordinator()
        .put_entity(EntityRecord::company(Uuid::now_v7(), "Initech"))
        .await
        .unwrap();

    let err = h
        .engine
        .coordinator()
        .assign(
            EntityType::Company,
            company.id,
            workflow.id,
            Actor::admin(Uuid::now_v7()),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));

    h.engine
        .state_machine()
        .archive(workflow.id, chrono::Utc::now())
        .await
        .unwrap();
    let lead = lead(&h.engine, "z@example.com").await;
    let err = h
        .engine
        .coordinator()
        .assign(
            EntityType::Lead,
            lead.id,
            workflow.id,
            Actor::new(Uuid::now_v7()),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[test_log::test(tokio::test)]
async fn test_binding_failure_after_commit_is_reported_not_raised() {
    let (builder, store, _mailer) = builder();
    let runs = Arc::new(FlakyRunStore {
        inner: store.clone(),
        failing: AtomicBool::new(false),
    });
    let engine = builder.runs(runs.clone()).build();
    let workflow = active_workflow(&engine, vec![email("Hi", "Body")], None, None).await;
    let first = lead(&engine, "flaky@example.com").await;
    let actor = Actor::new(Uuid::now_v7());

    runs.failing.store(true, Ordering::SeqCst);
    let outcome = engine
        .coordinator()
        .assign(EntityType::Lead, first.id, workflow.id, actor, None)
        .await
        .unwrap();
    assert_eq!(outcome.entity.owner_id, Some(workflow.id));
    assert!(outcome.history.is_some());
    assert!(outcome.run.is_none());
    let reason = outcome.binding_error.expect("binding should have failed");
    assert!(reason.contains("connection reset"));

    // The committed owner and history stand
    let history = engine
        .coordinator()
        .history(EntityType::Lead, first.id)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);

    // Bulk counts the lead as assigned and lists the binding failure
    let other = lead(&engine, "other@example.com").await.id;
    let result = engine
        .coordinator()
        .bulk_assign(EntityType::Lead, &[other], workflow.id, actor)
        .await;
    assert_eq!(result.succeeded, vec![other]);
    assert!(result.failed.is_empty());
    assert_eq!(result.binding_failures.len(), 1);
    assert_eq!(result.binding_failures[0].id, other);

    // Assigning the same owner again repairs the binding without new history
    runs.failing.store(false, Ordering::SeqCst);
    let outcome = engine
        .coordinator()
        .assign(EntityType::Lead, first.id, workflow.id, actor, None)
        .await
        .unwrap();
    assert!(outcome.history.is_none());
    assert!(outcome.binding_error.is_none());
    assert_eq!(outcome.run.map(|r| r.status), Some(RunStatus::Active));
}

#[test_log::test(tokio::test)]
async fn test_bulk_assign_with_bounded_concurrency_keeps_order() {
    let (builder, _store, _mailer) = builder();
    let engine = builder
        .config(EngineConfig::default().with_concurrency(2))
        .build();
    let owner = Uuid::now_v7();
    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(lead(&engine, &format!("lead{i}@example.com")).await.id);
    }
    let missing = Uuid::now_v7();
    ids.insert(3, missing);

    let result = engine
        .coordinator()
        .bulk_assign(EntityType::Lead, &ids, owner, Actor::new(Uuid::now_v7()))
        .await;

    let expected: Vec<Uuid> = ids.iter().copied().filter(|&id| id != missing).collect();
    assert_eq!(result.succeeded, expected);
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].id, missing);
    assert_eq!(result.summary(), "Successfully assigned 6 of 7 leads");
}
