//! Activity events recorded per lead

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::EngineError;

/// Kinds of activity the log records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    EmailOpened,
    EmailClicked,
    EmailReplied,
    EmailBounced,
    EmailUnsubscribed,
    WorkflowPaused,
    WorkflowResumed,
}

impl ActivityType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmailOpened => "email_opened",
            Self::EmailClicked => "email_clicked",
            Self::EmailReplied => "email_replied",
            Self::EmailBounced => "email_bounced",
            Self::EmailUnsubscribed => "email_unsubscribed",
            Self::WorkflowPaused => "workflow_paused",
            Self::WorkflowResumed => "workflow_resumed",
        }
    }

    /// Events reported by the sending provider (as opposed to engine stamps)
    pub fn is_inbound(self) -> bool {
        !matches!(self, Self::WorkflowPaused | Self::WorkflowResumed)
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email_opened" => Ok(Self::EmailOpened),
            "email_clicked" => Ok(Self::EmailClicked),
            "email_replied" => Ok(Self::EmailReplied),
            "email_bounced" => Ok(Self::EmailBounced),
            "email_unsubscribed" => Ok(Self::EmailUnsubscribed),
            "workflow_paused" => Ok(Self::WorkflowPaused),
            "workflow_resumed" => Ok(Self::WorkflowResumed),
            other => Err(EngineError::validation(format!(
                "unknown activity event type: {other}"
            ))),
        }
    }
}

/// One immutable entry in a lead's activity log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ActivityEvent {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub event_type: ActivityType,
    pub occurred_at: DateTime<Utc>,
    /// Provider-specific payload, opaque to the engine
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub metadata: Map<String, Value>,
    /// Identity of the event for idempotent append
    pub fingerprint: String,
}

impl ActivityEvent {
    pub fn new(
        lead_id: Uuid,
        event_type: ActivityType,
        occurred_at: DateTime<Utc>,
        metadata: Map<String, Value>,
    ) -> Self {
        let fingerprint = Self::fingerprint_of(lead_id, event_type, Some(occurred_at), &metadata);
        Self::with_fingerprint(lead_id, event_type, occurred_at, metadata, fingerprint)
    }

    /// Event whose source reported no time of its own.
    ///
    /// `received_at` stands in for `occurred_at`, but the fingerprint leaves
    /// time out so a redelivery received later still matches. Identical
    /// untimed reports for the same lead therefore collapse into one.
    pub fn untimed(
        lead_id: Uuid,
        event_type: ActivityType,
        received_at: DateTime<Utc>,
        metadata: Map<String, Value>,
    ) -> Self {
        let fingerprint = Self::fingerprint_of(lead_id, event_type, None, &metadata);
        Self::with_fingerprint(lead_id, event_type, received_at, metadata, fingerprint)
    }

    fn with_fingerprint(
        lead_id: Uuid,
        event_type: ActivityType,
        occurred_at: DateTime<Utc>,
        metadata: Map<String, Value>,
        fingerprint: String,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            lead_id,
            event_type,
            occurred_at,
            metadata,
            fingerprint,
        }
    }

    /// SHA-256 over lead, type, timestamp (microseconds, when known) and
    /// canonical metadata.
    ///
    /// Two deliveries of the same event produce the same fingerprint regardless
    /// of metadata key order.
    pub fn fingerprint_of(
        lead_id: Uuid,
        event_type: ActivityType,
        occurred_at: Option<DateTime<Utc>>,
        metadata: &Map<String, Value>,
    ) -> String {
        let mut canonical = String::new();
        write_canonical(&Value::Object(metadata.clone()), &mut canonical);

        let mut hasher = Sha256::new();
        hasher.update(lead_id.as_bytes());
        hasher.update(event_type.as_str().as_bytes());
        match occurred_at {
            Some(at) => {
                hasher.update([1u8]);
                hasher.update(at.timestamp_micros().to_be_bytes());
            }
            None => hasher.update([0u8]),
        }
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// JSON with object keys sorted at every level
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let lead = Uuid::now_v7();
        let at = Utc::now();
        let a = ActivityEvent::new(
            lead,
            ActivityType::EmailOpened,
            at,
            map(json!({"a": 1, "b": {"x": true, "y": [1, 2]}})),
        );
        let b = ActivityEvent::new(
            lead,
            ActivityType::EmailOpened,
            at,
            map(json!({"b": {"y": [1, 2], "x": true}, "a": 1})),
        );
        assert_ne!(a.id, b.id);
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn test_fingerprint_distinguishes_type_and_time() {
        let lead = Uuid::now_v7();
        let at = Utc::now();
        let opened = ActivityEvent::new(lead, ActivityType::EmailOpened, at, Map::new());
        let clicked = ActivityEvent::new(lead, ActivityType::EmailClicked, at, Map::new());
        let later = ActivityEvent::new(
            lead,
            ActivityType::EmailOpened,
            at + chrono::Duration::seconds(1),
            Map::new(),
        );
        assert_ne!(opened.fingerprint, clicked.fingerprint);
        assert_ne!(opened.fingerprint, later.fingerprint);
    }

    #[test]
    fn test_untimed_fingerprint_ignores_receipt_time() {
        let lead = Uuid::now_v7();
        let at = Utc::now();
        let meta = map(json!({"messageId": "m-1"}));
        let first = ActivityEvent::untimed(lead, ActivityType::EmailOpened, at, meta.clone());
        let again = ActivityEvent::untimed(
            lead,
            ActivityType::EmailOpened,
            at + chrono::Duration::minutes(5),
            meta.clone(),
        );
        assert_eq!(first.fingerprint, again.fingerprint);
        assert_eq!(first.occurred_at, at);

        // A reported time at the same instant is a different identity
        let timed = ActivityEvent::new(lead, ActivityType::EmailOpened, at, meta);
        assert_ne!(first.fingerprint, timed.fingerprint);
    }

    #[test]
    fn test_activity_type_round_trip_names() {
        for ty in [
            ActivityType::EmailOpened,
            ActivityType::EmailClicked,
            ActivityType::EmailReplied,
            ActivityType::WorkflowPaused,
        ] {
            assert_eq!(ty.as_str().parse::<ActivityType>().unwrap(), ty);
        }
        assert!(!ActivityType::WorkflowResumed.is_inbound());
        assert!(ActivityType::EmailBounced.is_inbound());
    }
}
