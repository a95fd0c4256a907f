//! Inbound email-provider webhook payload

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::model::{ActivityEvent, ActivityType};

/// Body of `POST /webhooks/email`
///
/// ```json
/// { "leadId": "...", "eventType": "email_opened", "metadata": { ... } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub lead_id: Uuid,
    /// `email_opened`, `email_clicked`, `email_replied`, `email_bounced` or `email_unsubscribed`
    pub event_type: String,
    /// Provider-specific; `timestamp` (RFC 3339) is used as the event time when present.
    /// Without it the receipt time is used and redeliveries are matched on content alone.
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub metadata: Map<String, Value>,
}

impl WebhookPayload {
    /// Validate the payload and turn it into an activity event.
    ///
    /// Engine-stamped types (`workflow_paused`, `workflow_resumed`) are not
    /// accepted from outside.
    pub fn into_event(self, received_at: DateTime<Utc>) -> Result<ActivityEvent> {
        let event_type: ActivityType = self.event_type.parse()?;
        if !event_type.is_inbound() {
            return Err(EngineError::validation(format!(
                "event type {event_type} cannot be submitted by webhook"
            )));
        }
        let event = match event_time(&self.metadata)? {
            Some(occurred_at) => {
                ActivityEvent::new(self.lead_id, event_type, occurred_at, self.metadata)
            }
            None => ActivityEvent::untimed(self.lead_id, event_type, received_at, self.metadata),
        };
        Ok(event)
    }
}

fn event_time(metadata: &Map<String, Value>) -> Result<Option<DateTime<Utc>>> {
    match metadata.get("timestamp") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) => DateTime::parse_from_rfc3339(raw)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| EngineError::validation(format!("invalid metadata.timestamp: {e}"))),
        Some(other) => Err(EngineError::validation(format!(
            "metadata.timestamp must be an RFC 3339 string, got {other}"
        ))),
    }
}
