//! Error types for engine operations

use thiserror::Error;
use uuid::Uuid;

use crate::persistence::StoreError;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by state-mutating engine operations
///
/// Pure evaluators never produce these; they return decisions instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input (bad step configuration, bad payload, ...). Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// An identifier did not resolve
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Uuid },

    /// The actor lacks the privilege the operation requires
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A versioned write kept losing against concurrent writers
    #[error("concurrent modification of {kind} {id}")]
    ConcurrentModification { kind: &'static str, id: Uuid },

    /// Lifecycle transition not allowed from the current state
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Workflow still has lead-runs bound to it
    #[error("workflow {workflow_id} still has {bound_leads} bound lead(s)")]
    WorkflowInUse { workflow_id: Uuid, bound_leads: usize },

    /// Persistence failure
    #[error("store error: {0}")]
    Store(StoreError),
}

impl EngineError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(kind: &'static str, id: Uuid) -> Self {
        EngineError::NotFound { kind, id }
    }

    /// Create a forbidden error
    pub fn forbidden(msg: impl Into<String>) -> Self {
        EngineError::Forbidden(msg.into())
    }

    /// Create an invalid-transition error
    pub fn transition(from: impl ToString, to: impl ToString) -> Self {
        EngineError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Whether this is the optimistic-concurrency conflict case
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::ConcurrentModification { .. })
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, id } => EngineError::NotFound { kind, id },
            StoreError::ConcurrencyConflict { kind, id, .. } => {
                EngineError::ConcurrentModification { kind, id }
            }
            other => EngineError::Store(other),
        }
    }
}
