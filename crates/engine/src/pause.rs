//! Pause rule evaluation
//!
//! [`evaluate`] is a pure function of the configured rules and a slice of
//! activity. It never touches storage; the state machine acts on its decision.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::model::{ActivityEvent, ActivityType};

/// Conditions under which a lead-run must halt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PauseRules {
    #[serde(default)]
    pub on_reply: bool,
    #[serde(default)]
    pub on_click: bool,
    /// Pause once this many distinct opens are recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_open_count: Option<u32>,
    /// Operators may pause individual leads by hand
    #[serde(default)]
    pub manual_pause: bool,
    /// Notify the workflow owner when a lead is paused by a rule
    #[serde(default)]
    pub notify_on_pause: bool,
}

impl PauseRules {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.on_open_count == Some(0) {
            return Err(EngineError::validation(
                "on_open_count must be a positive integer",
            ));
        }
        Ok(())
    }
}

/// Pause rules attached to a workflow, with "nothing configured" as its own case
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<PauseRules>", into = "Option<PauseRules>")]
pub enum PauseConfig {
    #[default]
    NotConfigured,
    Rules(PauseRules),
}

impl PauseConfig {
    pub fn rules(&self) -> Option<&PauseRules> {
        match self {
            PauseConfig::NotConfigured => None,
            PauseConfig::Rules(rules) => Some(rules),
        }
    }

    pub fn allows_manual_pause(&self) -> bool {
        self.rules().is_some_and(|r| r.manual_pause)
    }

    pub fn notify_on_pause(&self) -> bool {
        self.rules().is_some_and(|r| r.notify_on_pause)
    }
}

impl From<Option<PauseRules>> for PauseConfig {
    fn from(rules: Option<PauseRules>) -> Self {
        match rules {
            Some(rules) => PauseConfig::Rules(rules),
            None => PauseConfig::NotConfigured,
        }
    }
}

impl From<PauseConfig> for Option<PauseRules> {
    fn from(config: PauseConfig) -> Self {
        match config {
            PauseConfig::NotConfigured => None,
            PauseConfig::Rules(rules) => Some(rules),
        }
    }
}

/// Which rule fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    Replied,
    Clicked,
    OpenedMultiple,
}

impl fmt::Display for PauseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replied => write!(f, "replied"),
            Self::Clicked => write!(f, "clicked"),
            Self::OpenedMultiple => write!(f, "opened_multiple"),
        }
    }
}

/// Outcome of evaluating pause rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseDecision {
    Continue,
    Pause(PauseReason),
}

impl PauseDecision {
    pub fn should_pause(self) -> bool {
        matches!(self, PauseDecision::Pause(_))
    }

    pub fn reason(self) -> Option<PauseReason> {
        match self {
            PauseDecision::Continue => None,
            PauseDecision::Pause(reason) => Some(reason),
        }
    }
}

/// Number of distinct events of `event_type` in `history`
pub fn count_distinct(history: &[ActivityEvent], event_type: ActivityType) -> usize {
    history
        .iter()
        .filter(|e| e.event_type == event_type)
        .map(|e| e.fingerprint.as_str())
        .collect::<HashSet<_>>()
        .len()
}

/// Decide whether a lead-run must pause.
///
/// Precedence is fixed: a reply beats a click, and a click beats the open
/// threshold. Events are identified by fingerprint, so a redelivered event
/// never counts twice.
pub fn evaluate(config: &PauseConfig, history: &[ActivityEvent]) -> PauseDecision {
    let Some(rules) = config.rules() else {
        return PauseDecision::Continue;
    };

    let any = |ty: ActivityType| history.iter().any(|e| e.event_type == ty);

    if rules.on_reply && any(ActivityType::EmailReplied) {
        return PauseDecision::Pause(PauseReason::Replied);
    }
    if rules.on_click && any(ActivityType::EmailClicked) {
        return PauseDecision::Pause(PauseReason::Clicked);
    }
    if let Some(threshold) = rules.on_open_count {
        if count_distinct(history, ActivityType::EmailOpened) >= threshold as usize {
            return PauseDecision::Pause(PauseReason::OpenedMultiple);
        }
    }
    PauseDecision::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::Map;
    use uuid::Uuid;

    fn events(lead: Uuid, entries: &[(ActivityType, i64)]) -> Vec<ActivityEvent> {
        let base = Utc::now();
        entries
            .iter()
            .map(|(ty, offset)| {
                ActivityEvent::new(lead, *ty, base + Duration::seconds(*offset), Map::new())
            })
            .collect()
    }

    fn rules(on_reply: bool, on_click: bool, on_open_count: Option<u32>) -> PauseConfig {
        PauseConfig::Rules(PauseRules {
            on_reply,
            on_click,
            on_open_count,
            ..Default::default()
        })
    }

    #[test]
    fn test_not_configured_never_pauses() {
        let lead = Uuid::now_v7();
        let history = events(lead, &[(ActivityType::EmailReplied, 0)]);
        assert_eq!(
            evaluate(&PauseConfig::NotConfigured, &history),
            PauseDecision::Continue
        );
    }

    #[test]
    fn test_reply_beats_open_threshold() {
        let lead = Uuid::now_v7();
        let mut entries: Vec<(ActivityType, i64)> =
            (0..10).map(|i| (ActivityType::EmailOpened, i)).collect();
        entries.push((ActivityType::EmailReplied, 20));
        let history = events(lead, &entries);

        let decision = evaluate(&rules(true, false, None), &history);
        assert_eq!(decision, PauseDecision::Pause(PauseReason::Replied));

        let decision = evaluate(&rules(true, true, Some(3)), &history);
        assert_eq!(decision.reason(), Some(PauseReason::Replied));
    }

    #[test]
    fn test_click_beats_open_threshold() {
        let lead = Uuid::now_v7();
        let history = events(
            lead,
            &[
                (ActivityType::EmailOpened, 0),
                (ActivityType::EmailOpened, 1),
                (ActivityType::EmailClicked, 2),
            ],
        );
        let decision = evaluate(&rules(true, true, Some(2)), &history);
        assert_eq!(decision, PauseDecision::Pause(PauseReason::Clicked));
    }

    #[test]
    fn test_open_threshold_counts_distinct_events() {
        let lead = Uuid::now_v7();
        let mut history = events(lead, &[(ActivityType::EmailOpened, 0)]);
        // Redelivery of the same event
        let mut copy = history[0].clone();
        copy.id = Uuid::now_v7();
        history.push(copy);

        assert_eq!(count_distinct(&history, ActivityType::EmailOpened), 1);
        assert_eq!(
            evaluate(&rules(false, false, Some(2)), &history),
            PauseDecision::Continue
        );

        history.extend(events(lead, &[(ActivityType::EmailOpened, 5)]));
        assert_eq!(
            evaluate(&rules(false, false, Some(2)), &history),
            PauseDecision::Pause(PauseReason::OpenedMultiple)
        );
    }

    #[test]
    fn test_evaluate_is_pure() {
        let lead = Uuid::now_v7();
        let history = events(
            lead,
            &[(ActivityType::EmailClicked, 0), (ActivityType::EmailBounced, 1)],
        );
        let snapshot = history.clone();
        let config = rules(false, true, None);

        let first = evaluate(&config, &history);
        let second = evaluate(&config, &history);
        assert_eq!(first, second);
        assert_eq!(history, snapshot);
    }

    #[test]
    fn test_disabled_rules_ignore_matching_events() {
        let lead = Uuid::now_v7();
        let history = events(
            lead,
            &[(ActivityType::EmailReplied, 0), (ActivityType::EmailClicked, 1)],
        );
        assert_eq!(
            evaluate(&rules(false, false, None), &history),
            PauseDecision::Continue
        );
    }

    #[test]
    fn test_pause_config_serializes_as_optional_rules() {
        let json = serde_json::to_value(PauseConfig::NotConfigured).unwrap();
        assert!(json.is_null());

        let config: PauseConfig =
            serde_json::from_value(serde_json::json!({"on_reply": true})).unwrap();
        assert!(config.rules().is_some_and(|r| r.on_reply && !r.manual_pause));
    }

    #[test]
    fn test_zero_open_threshold_is_invalid() {
        let rules = PauseRules {
            on_open_count: Some(0),
            ..Default::default()
        };
        assert!(rules.validate().is_err());
    }
}
