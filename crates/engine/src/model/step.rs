//! Sequence steps
//!
//! A step is a tagged variant, so an email step can never carry a wait
//! duration and a condition step can never carry a subject line.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::activity::ActivityType;
use crate::error::EngineError;

/// Longest delay a wait or condition step may configure
pub const MAX_STEP_DELAY_DAYS: i64 = 3650;

/// When an email step may go out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum SendTiming {
    /// As soon as the run enters the step
    #[default]
    Immediate,
    /// At the next Mon-Fri business-hours opening at or after entry
    BusinessHoursOnly,
}

/// Unit of a wait step's duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum WaitUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl WaitUnit {
    /// Wall-clock length of `amount` units
    pub fn duration(self, amount: u32) -> Duration {
        let amount = i64::from(amount);
        match self {
            Self::Minutes => Duration::minutes(amount),
            Self::Hours => Duration::hours(amount),
            Self::Days => Duration::days(amount),
            Self::Weeks => Duration::weeks(amount),
        }
    }

    /// Day and week waits are calendar waits; minute and hour waits are timers
    pub fn is_calendar(self) -> bool {
        matches!(self, Self::Days | Self::Weeks)
    }
}

/// What a condition step checks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    Opened,
    Clicked,
    Replied,
    Bounced,
    Unsubscribed,
}

impl ConditionType {
    /// The activity event that satisfies this condition
    pub fn activity_type(self) -> ActivityType {
        match self {
            Self::Opened => ActivityType::EmailOpened,
            Self::Clicked => ActivityType::EmailClicked,
            Self::Replied => ActivityType::EmailReplied,
            Self::Bounced => ActivityType::EmailBounced,
            Self::Unsubscribed => ActivityType::EmailUnsubscribed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Opened => "opened",
            Self::Clicked => "clicked",
            Self::Replied => "replied",
            Self::Bounced => "bounced",
            Self::Unsubscribed => "unsubscribed",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConditionType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "opened" => Ok(Self::Opened),
            "clicked" => Ok(Self::Clicked),
            "replied" => Ok(Self::Replied),
            "bounced" => Ok(Self::Bounced),
            "unsubscribed" => Ok(Self::Unsubscribed),
            other => Err(EngineError::validation(format!(
                "unknown condition type: {other}"
            ))),
        }
    }
}

/// Email step configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct EmailStep {
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub send_timing: SendTiming,
    /// Tokens that may be interpolated as `{{token}}` in subject and body
    #[serde(default)]
    pub tokens: Vec<String>,
}

/// An email with its templates resolved for one lead
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedEmail {
    pub subject: String,
    pub body: String,
}

impl EmailStep {
    /// Replace declared `{{token}}` placeholders with values from `vars`.
    ///
    /// Declared tokens without a value render as the empty string; placeholders
    /// for undeclared tokens are left untouched.
    pub fn render(&self, vars: &HashMap<String, String>) -> RenderedEmail {
        let mut subject = self.subject.clone();
        let mut body = self.body.clone();
        for token in &self.tokens {
            let value = vars.get(token).map(String::as_str).unwrap_or("");
            for placeholder in [format!("{{{{{token}}}}}"), format!("{{{{ {token} }}}}")] {
                subject = subject.replace(&placeholder, value);
                body = body.replace(&placeholder, value);
            }
        }
        RenderedEmail { subject, body }
    }
}

/// Wait step configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct WaitStep {
    pub duration: u32,
    pub unit: WaitUnit,
    /// Only Mon-Fri business hours count toward the duration
    #[serde(default)]
    pub business_hours_only: bool,
}

impl WaitStep {
    pub fn length(&self) -> Duration {
        self.unit.duration(self.duration)
    }
}

/// Condition step configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ConditionStep {
    pub condition: ConditionType,
    /// Hours to wait after entering the step before checking
    pub wait_hours: u32,
    /// Step to continue with when satisfied (default: next sequential step)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_satisfied: Option<Uuid>,
    /// Step to continue with when not satisfied (default: run completes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_not_satisfied: Option<Uuid>,
}

/// Step discriminant, used when adding a step with default configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Email,
    Wait,
    Condition,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Email => write!(f, "email"),
            Self::Wait => write!(f, "wait"),
            Self::Condition => write!(f, "condition"),
        }
    }
}

/// Type-specific step configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    Email(EmailStep),
    Wait(WaitStep),
    Condition(ConditionStep),
}

impl StepAction {
    pub fn kind(&self) -> StepKind {
        match self {
            Self::Email(_) => StepKind::Email,
            Self::Wait(_) => StepKind::Wait,
            Self::Condition(_) => StepKind::Condition,
        }
    }

    /// Default configuration for a freshly added step
    pub fn default_for(kind: StepKind) -> Self {
        match kind {
            StepKind::Email => Self::Email(EmailStep {
                subject: String::new(),
                body: String::new(),
                send_timing: SendTiming::Immediate,
                tokens: vec![
                    "first_name".to_string(),
                    "last_name".to_string(),
                    "company".to_string(),
                ],
            }),
            StepKind::Wait => Self::Wait(WaitStep {
                duration: 1,
                unit: WaitUnit::Days,
                business_hours_only: false,
            }),
            StepKind::Condition => Self::Condition(ConditionStep {
                condition: ConditionType::Opened,
                wait_hours: 24,
                on_satisfied: None,
                on_not_satisfied: None,
            }),
        }
    }

    /// Check the configuration in isolation (branch targets are checked by the sequence)
    pub fn validate(&self) -> Result<(), EngineError> {
        match self {
            Self::Email(email) => {
                if let Some(token) = email
                    .tokens
                    .iter()
                    .find(|t| t.is_empty() || !t.chars().all(|c| c.is_alphanumeric() || c == '_'))
                {
                    return Err(EngineError::validation(format!(
                        "invalid interpolation token: {token:?}"
                    )));
                }
                Ok(())
            }
            Self::Wait(wait) => {
                if wait.duration == 0 {
                    return Err(EngineError::validation(
                        "wait duration must be a positive integer",
                    ));
                }
                if wait.length() > Duration::days(MAX_STEP_DELAY_DAYS) {
                    return Err(EngineError::validation(format!(
                        "wait of {} {:?} exceeds {MAX_STEP_DELAY_DAYS} days",
                        wait.duration, wait.unit
                    )));
                }
                Ok(())
            }
            Self::Condition(condition) => {
                if i64::from(condition.wait_hours) > MAX_STEP_DELAY_DAYS * 24 {
                    return Err(EngineError::validation(format!(
                        "condition wait of {} hours exceeds {MAX_STEP_DELAY_DAYS} days",
                        condition.wait_hours
                    )));
                }
                Ok(())
            }
        }
    }

    /// Branch targets referenced by this step
    pub fn branch_targets(&self) -> impl Iterator<Item = Uuid> + '_ {
        let targets = match self {
            Self::Condition(c) => [c.on_satisfied, c.on_not_satisfied],
            _ => [None, None],
        };
        targets.into_iter().flatten()
    }
}

/// One step of a workflow's sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SequenceStep {
    /// Stable identifier, unchanged by reordering
    pub id: Uuid,
    /// 1-based position, contiguous within a workflow
    pub step_number: u32,
    pub action: StepAction,
}

impl SequenceStep {
    pub fn new(step_number: u32, action: StepAction) -> Self {
        Self {
            id: Uuid::now_v7(),
            step_number,
            action,
        }
    }

    pub fn kind(&self) -> StepKind {
        self.action.kind()
    }
}
