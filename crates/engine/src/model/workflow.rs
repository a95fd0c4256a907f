//! Workflow definitions

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::step::{SequenceStep, StepAction};
use crate::error::EngineError;
use crate::pause::{PauseConfig, PauseRules};

/// Workflow lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Being edited; never scheduled
    Draft,
    Active,
    Paused,
    /// Terminal and immutable
    Archived,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Active => write!(f, "active"),
            Self::Paused => write!(f, "paused"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

impl FromStr for WorkflowStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "archived" => Ok(Self::Archived),
            other => Err(EngineError::validation(format!(
                "unknown workflow status: {other}"
            ))),
        }
    }
}

/// Mirror of a workflow in an external campaign-sending service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ProviderBinding {
    /// Registered adapter name
    pub provider: String,
    /// Provider-side campaign id
    pub campaign_id: String,
}

/// A named, ordered outreach sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Workflow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: WorkflowStatus,
    pub steps: Vec<SequenceStep>,
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<PauseRules>))]
    pub pause_rules: PauseConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderBinding>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn step(&self, step_number: u32) -> Option<&SequenceStep> {
        self.steps.iter().find(|s| s.step_number == step_number)
    }

    pub fn step_by_id(&self, step_id: Uuid) -> Option<&SequenceStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    pub fn is_archived(&self) -> bool {
        self.status == WorkflowStatus::Archived
    }

    /// Reject edits to an archived workflow
    pub fn ensure_mutable(&self) -> Result<(), EngineError> {
        if self.is_archived() {
            return Err(EngineError::validation(format!(
                "workflow {} is archived and cannot be modified",
                self.id
            )));
        }
        Ok(())
    }
}

/// Input for creating a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CreateWorkflow {
    pub owner_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Initial steps, numbered in the given order
    #[serde(default)]
    pub steps: Vec<StepAction>,
    #[serde(default)]
    pub pause_rules: Option<PauseRules>,
    #[serde(default)]
    pub provider: Option<ProviderBinding>,
}

/// Partial update of a workflow's settings
///
/// Steps are edited through the dedicated step operations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct WorkflowPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub pause_rules: Option<PauseRules>,
    /// Remove the pause rules entirely
    #[serde(default)]
    pub clear_pause_rules: bool,
    #[serde(default)]
    pub provider: Option<ProviderBinding>,
    #[serde(default)]
    pub clear_provider: bool,
    /// Reject the update if the workflow has moved past this version
    #[serde(default)]
    pub expected_version: Option<i64>,
}
