//! Per-lead run state through a workflow

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineError;
use crate::pause::PauseReason;

/// Lead-run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Active,
    Paused,
    /// Terminal
    Completed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            other => Err(EngineError::validation(format!("unknown run status: {other}"))),
        }
    }
}

/// Why a lead-run is paused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum PauseCause {
    Replied,
    Clicked,
    OpenedMultiple,
    /// Cascaded from a workflow-level pause
    WorkflowPaused,
    Manual,
}

impl PauseCause {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Replied => "replied",
            Self::Clicked => "clicked",
            Self::OpenedMultiple => "opened_multiple",
            Self::WorkflowPaused => "workflow_paused",
            Self::Manual => "manual",
        }
    }
}

impl From<PauseReason> for PauseCause {
    fn from(reason: PauseReason) -> Self {
        match reason {
            PauseReason::Replied => Self::Replied,
            PauseReason::Clicked => Self::Clicked,
            PauseReason::OpenedMultiple => Self::OpenedMultiple,
        }
    }
}

impl fmt::Display for PauseCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PauseCause {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "replied" => Ok(Self::Replied),
            "clicked" => Ok(Self::Clicked),
            "opened_multiple" => Ok(Self::OpenedMultiple),
            "workflow_paused" => Ok(Self::WorkflowPaused),
            "manual" => Ok(Self::Manual),
            other => Err(EngineError::validation(format!("unknown pause cause: {other}"))),
        }
    }
}

/// The single live run row for a lead
///
/// `workflow_id = None` means the lead is not bound to any workflow; the row is
/// kept (superseded) so its version counter keeps serializing writers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct LeadWorkflowState {
    pub lead_id: Uuid,
    pub workflow_id: Option<Uuid>,
    pub status: RunStatus,
    /// 1-based step number the run is positioned at
    pub current_step: u32,
    /// When the lead was bound to the workflow
    pub started_at: DateTime<Utc>,
    pub step_entered_at: DateTime<Utc>,
    /// When the current step is due; `None` while paused, completed or unbound
    pub next_due_at: Option<DateTime<Utc>>,
    pub paused_by: Option<PauseCause>,
    pub last_fired_step: Option<u32>,
    pub last_fired_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency counter, bumped by every write
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl LeadWorkflowState {
    /// Fresh run bound to `workflow_id`, positioned before step 1
    pub fn bound(lead_id: Uuid, workflow_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            lead_id,
            workflow_id: Some(workflow_id),
            status: RunStatus::Active,
            current_step: 1,
            started_at: now,
            step_entered_at: now,
            next_due_at: None,
            paused_by: None,
            last_fired_step: None,
            last_fired_at: None,
            version: 0,
            updated_at: now,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.workflow_id.is_some()
    }

    /// Active and bound; the scheduler only acts on these
    pub fn is_live(&self) -> bool {
        self.is_bound() && self.status == RunStatus::Active
    }

    /// Bound and not yet completed
    pub fn is_engaged(&self) -> bool {
        self.is_bound() && self.status != RunStatus::Completed
    }

    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = RunStatus::Completed;
        self.next_due_at = None;
        self.paused_by = None;
        self.updated_at = now;
    }

    pub fn pause(&mut self, cause: PauseCause, now: DateTime<Utc>) {
        self.status = RunStatus::Paused;
        self.paused_by = Some(cause);
        self.next_due_at = None;
        self.updated_at = now;
    }

    /// Detach from the workflow, cancelling anything pending
    pub fn unbind(&mut self, now: DateTime<Utc>) {
        self.workflow_id = None;
        self.complete(now);
    }
}
