//! Domain types shared by every engine component

mod activity;
mod assignment;
mod run;
mod step;
mod workflow;

pub use activity::{ActivityEvent, ActivityType};
pub use assignment::{Actor, AssignmentHistoryEntry, EntityRecord, EntityType};
pub use run::{LeadWorkflowState, PauseCause, RunStatus};
pub use step::{
    ConditionStep, ConditionType, EmailStep, RenderedEmail, SendTiming, SequenceStep, StepAction,
    StepKind, WaitStep, WaitUnit, MAX_STEP_DELAY_DAYS,
};
pub use workflow::{CreateWorkflow, ProviderBinding, Workflow, WorkflowPatch, WorkflowStatus};
