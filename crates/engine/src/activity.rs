//! ActivityLog: append-only, idempotent per-lead event history

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{ActivityEvent, ActivityType};
use crate::persistence::{ActivityStore, AppendOutcome};

/// Append-only activity log over an [`ActivityStore`]
///
/// Storage keeps insertion order; reads for evaluation come back newest first.
#[derive(Clone)]
pub struct ActivityLog {
    store: Arc<dyn ActivityStore>,
}

impl ActivityLog {
    pub fn new(store: Arc<dyn ActivityStore>) -> Self {
        Self { store }
    }

    /// Append an event; a redelivered event (same fingerprint) is a no-op
    #[instrument(skip(self, event), fields(lead_id = %event.lead_id, event_type = %event.event_type))]
    pub async fn append(&self, event: ActivityEvent) -> Result<AppendOutcome> {
        let outcome = self.store.append_activity(event).await?;
        if outcome == AppendOutcome::Duplicate {
            debug!("duplicate activity event ignored");
        }
        Ok(outcome)
    }

    /// Events in insertion order
    pub async fn entries(&self, lead_id: Uuid) -> Result<Vec<ActivityEvent>> {
        Ok(self.store.list_activity(lead_id).await?)
    }

    /// All events for a lead, newest first by occurrence time
    pub async fn history(&self, lead_id: Uuid) -> Result<Vec<ActivityEvent>> {
        let mut events = self.entries(lead_id).await?;
        sort_newest_first(&mut events);
        Ok(events)
    }

    /// Events that occurred at or after `since`, newest first
    pub async fn window(&self, lead_id: Uuid, since: DateTime<Utc>) -> Result<Vec<ActivityEvent>> {
        let mut events = self.history(lead_id).await?;
        events.retain(|e| e.occurred_at >= since);
        Ok(events)
    }

    /// Whether an event of `event_type` occurred at or after `since`
    pub async fn occurred_since(
        &self,
        lead_id: Uuid,
        event_type: ActivityType,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self
            .entries(lead_id)
            .await?
            .iter()
            .any(|e| e.event_type == event_type && e.occurred_at >= since))
    }
}

/// Stable sort by occurrence time, newest first
pub fn sort_newest_first(events: &mut [ActivityEvent]) {
    events.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
}

/// Start of the window pause rules are evaluated over for a run.
///
/// Activity counts from when the lead was bound, or from its most recent
/// resume, whichever is later, so a resumed lead is not re-paused by the
/// activity that paused it.
pub fn evaluation_start(history: &[ActivityEvent], started_at: DateTime<Utc>) -> DateTime<Utc> {
    history
        .iter()
        .filter(|e| e.event_type == ActivityType::WorkflowResumed && e.occurred_at >= started_at)
        .map(|e| e.occurred_at)
        .max()
        .unwrap_or(started_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryStore;
    use chrono::Duration;
    use serde_json::Map;

    fn log() -> ActivityLog {
        ActivityLog::new(Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn test_history_is_newest_first_but_storage_keeps_insertion_order() {
        let log = log();
        let lead = Uuid::now_v7();
        let now = Utc::now();
        let late = ActivityEvent::new(lead, ActivityType::EmailOpened, now, Map::new());
        let early = ActivityEvent::new(
            lead,
            ActivityType::EmailClicked,
            now - Duration::hours(1),
            Map::new(),
        );
        log.append(late.clone()).await.unwrap();
        log.append(early.clone()).await.unwrap();

        let stored = log.entries(lead).await.unwrap();
        assert_eq!(stored[0].id, late.id);

        let history = log.history(lead).await.unwrap();
        assert_eq!(history[0].id, late.id);
        assert_eq!(history[1].id, early.id);
    }

    #[tokio::test]
    async fn test_window_and_occurred_since() {
        let log = log();
        let lead = Uuid::now_v7();
        let now = Utc::now();
        log.append(ActivityEvent::new(
            lead,
            ActivityType::EmailOpened,
            now - Duration::days(2),
            Map::new(),
        ))
        .await
        .unwrap();

        let since = now - Duration::days(1);
        assert!(log.window(lead, since).await.unwrap().is_empty());
        assert!(!log
            .occurred_since(lead, ActivityType::EmailOpened, since)
            .await
            .unwrap());
        assert!(log
            .occurred_since(lead, ActivityType::EmailOpened, now - Duration::days(3))
            .await
            .unwrap());
    }

    #[test]
    fn test_evaluation_start_uses_latest_resume() {
        let lead = Uuid::now_v7();
        let start = Utc::now() - Duration::days(5);
        let resumed = start + Duration::days(2);
        let history = vec![
            ActivityEvent::new(lead, ActivityType::WorkflowResumed, start - Duration::days(1), Map::new()),
            ActivityEvent::new(lead, ActivityType::WorkflowResumed, resumed, Map::new()),
            ActivityEvent::new(lead, ActivityType::EmailReplied, start + Duration::days(1), Map::new()),
        ];
        assert_eq!(evaluation_start(&history, start), resumed);
        assert_eq!(evaluation_start(&[], start), start);
    }
}
