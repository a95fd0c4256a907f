//! Outbound email delivery for email steps

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// A rendered email ready to hand to a delivery service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundEmail {
    pub lead_id: Uuid,
    pub workflow_id: Uuid,
    pub step_number: u32,
    /// Lead address, when known
    pub to: Option<String>,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
#[error("email delivery failed: {0}")]
pub struct MailError(pub String);

/// Sends emails produced by the scheduler
///
/// Called once per fired step, after the run's new position is committed.
/// Failures are logged by the caller and not retried.
#[async_trait]
pub trait OutboundMailer: Send + Sync + 'static {
    async fn send(&self, email: OutboundEmail) -> Result<(), MailError>;
}

/// Mailer that only writes a log line
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMailer;

#[async_trait]
impl OutboundMailer for LoggingMailer {
    async fn send(&self, email: OutboundEmail) -> Result<(), MailError> {
        info!(
            lead_id = %email.lead_id,
            workflow_id = %email.workflow_id,
            step = email.step_number,
            to = email.to.as_deref().unwrap_or("<unknown>"),
            subject = %email.subject,
            "email step fired"
        );
        Ok(())
    }
}
