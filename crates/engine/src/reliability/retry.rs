//! Bounded retry for optimistic-concurrency conflicts

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Retry policy for versioned writes that lose against a concurrent writer
///
/// Only [`EngineError::ConcurrentModification`](crate::EngineError) is
/// retried; every other error is returned immediately. Delays grow
/// exponentially with jitter so colliding writers spread out.
///
/// # Example
///
/// ```
/// use outreach_engine::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::conflict()
///     .with_max_attempts(3)
///     .with_initial_interval(Duration::from_millis(5));
/// assert!(policy.has_attempts_remaining(2));
/// assert!(!policy.has_attempts_remaining(3));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including initial)
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Maximum delay between retries
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Backoff multiplier
    pub backoff_coefficient: f64,

    /// Jitter factor (0.0-1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::conflict()
    }
}

impl RetryPolicy {
    /// Short, jittered backoff suited to row-level version conflicts
    ///
    /// - 5 max attempts
    /// - 10ms initial interval, capped at 250ms
    /// - 2x backoff coefficient
    /// - 50% jitter
    pub fn conflict() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(250),
            backoff_coefficient: 2.0,
            jitter: 0.5,
        }
    }

    /// Create a policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            backoff_coefficient: 1.0,
            jitter: 0.0,
        }
    }

    /// Set the maximum number of attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the initial retry interval
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Set the maximum retry interval
    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Set the jitter factor (0.0-1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before attempt number `attempt` (1-based; the first attempt has none)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let retry_num = attempt - 1;
        let base = self.initial_interval.as_secs_f64()
            * self.backoff_coefficient.powi(retry_num as i32 - 1);
        let capped = base.min(self.max_interval.as_secs_f64());

        let jittered = if self.jitter > 0.0 && capped > 0.0 {
            let jitter_range = capped * self.jitter;
            let offset = rand::thread_rng().gen_range(-jitter_range..jitter_range);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }

    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }

    /// Run `op` until it succeeds, fails with a non-conflict error, or the
    /// attempts are exhausted. `op` receives the 1-based attempt number and
    /// must re-read whatever state it writes.
    pub async fn retry_conflicts<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Err(err) if err.is_conflict() && self.has_attempts_remaining(attempt) => {
                    attempt += 1;
                    let delay = self.delay_for_attempt(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying after conflict");
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                other => return other,
            }
        }
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    #[test]
    fn test_delay_for_attempt() {
        let policy = RetryPolicy::conflict().with_jitter(0.0);

        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(10));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(20));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(250));
    }

    #[test]
    fn test_serialization() {
        let policy = RetryPolicy::conflict().with_max_attempts(7);
        let json = serde_json::to_string(&policy).unwrap();
        let parsed: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, parsed);
    }

    #[tokio::test]
    async fn test_retries_conflicts_until_exhausted() {
        let policy = RetryPolicy::conflict()
            .with_max_attempts(3)
            .with_initial_interval(Duration::ZERO);
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let id = Uuid::now_v7();

        let result: Result<()> = policy
            .retry_conflicts(move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::ConcurrentModification { kind: "lead run", id })
            })
            .await;

        assert!(matches!(result, Err(EngineError::ConcurrentModification { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let policy = RetryPolicy::conflict().with_initial_interval(Duration::ZERO);
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<()> = policy
            .retry_conflicts(move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::validation("bad"))
            })
            .await;

        assert!(matches!(result, Err(EngineError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_succeeds_after_conflict() {
        let policy = RetryPolicy::conflict().with_initial_interval(Duration::ZERO);
        let id = Uuid::now_v7();

        let result = policy
            .retry_conflicts(move |attempt| async move {
                if attempt < 2 {
                    Err(EngineError::ConcurrentModification { kind: "lead", id })
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
    }
}
