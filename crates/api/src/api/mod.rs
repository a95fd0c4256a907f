// HTTP API routes
//
// Each submodule handles one resource type with its own AppState; every
// state wraps the same shared engine.

pub mod actor;
pub mod assignments;
pub mod common;
pub mod leads;
pub mod webhooks;
pub mod workflows;

// Re-export common types
pub use common::{ApiError, ErrorResponse, ListResponse};
