//! Reliability patterns
//!
//! - [`RetryPolicy`] - bounded, jittered retry of version conflicts

mod retry;

pub use retry::RetryPolicy;
