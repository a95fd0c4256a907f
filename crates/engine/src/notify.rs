//! Pause notifications

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::model::PauseCause;

/// Sent to a workflow owner when a lead-run is paused by a rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseNotice {
    pub lead_id: Uuid,
    pub workflow_id: Uuid,
    pub owner_id: Uuid,
    pub cause: PauseCause,
    pub paused_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
#[error("pause notification failed: {0}")]
pub struct NotifyError(pub String);

/// Delivers pause notices; invoked fire-and-forget
#[async_trait]
pub trait PauseNotifier: Send + Sync + 'static {
    async fn notify(&self, notice: PauseNotice) -> Result<(), NotifyError>;
}

/// Notifier that only writes a log line
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

#[async_trait]
impl PauseNotifier for LoggingNotifier {
    async fn notify(&self, notice: PauseNotice) -> Result<(), NotifyError> {
        info!(
            lead_id = %notice.lead_id,
            workflow_id = %notice.workflow_id,
            owner_id = %notice.owner_id,
            cause = %notice.cause,
            "lead paused"
        );
        Ok(())
    }
}
