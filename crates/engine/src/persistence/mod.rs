//! Persistence layer
//!
//! Store traits plus two backends: [`InMemoryStore`] for tests and local
//! development, [`PostgresStore`] for deployments.

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use store::{
    ActivityStore, AppendOutcome, AssignmentStore, OutreachStore, RunStore, StoreError,
    WorkflowStore,
};
