//! Engine configuration from environment variables

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::business_hours::BusinessHours;
use crate::error::Result;
use crate::reliability::RetryPolicy;

/// Engine-wide settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Window used for business-hours sends and waits
    pub business_hours: BusinessHours,

    /// Retry of versioned writes that hit a concurrent writer
    pub conflict_retry: RetryPolicy,

    /// Interval between scheduler ticks
    pub tick_interval: Duration,

    /// Maximum due runs picked up per tick
    pub batch_size: usize,

    /// Due runs advanced concurrently within one tick, and the in-flight
    /// limit for bulk assignment
    pub concurrency: usize,

    /// Upper bound on one external campaign call
    pub campaign_sync_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            business_hours: BusinessHours::default(),
            conflict_retry: RetryPolicy::conflict(),
            tick_interval: Duration::from_secs(30),
            batch_size: 100,
            concurrency: 8,
            campaign_sync_timeout: Duration::from_secs(10),
        }
    }
}

fn var_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl EngineConfig {
    /// Create configuration from environment variables
    ///
    /// Unset or unparsable values fall back to defaults. The business-hours
    /// window is validated as a whole and reported if inconsistent.
    pub fn from_env() -> Result<Self> {
        let business_hours = BusinessHours::new(
            var_or("BUSINESS_HOURS_UTC_OFFSET_MINUTES", 0),
            var_or("BUSINESS_HOURS_START", 9),
            var_or("BUSINESS_HOURS_END", 17),
        )?;

        let conflict_retry =
            RetryPolicy::conflict().with_max_attempts(var_or("CONFLICT_RETRY_MAX_ATTEMPTS", 5));

        Ok(Self {
            business_hours,
            conflict_retry,
            tick_interval: Duration::from_millis(var_or("SCHEDULER_TICK_INTERVAL_MS", 30_000)),
            batch_size: var_or("SCHEDULER_BATCH_SIZE", 100usize).max(1),
            concurrency: var_or("SCHEDULER_CONCURRENCY", 8usize).max(1),
            campaign_sync_timeout: Duration::from_millis(var_or("CAMPAIGN_SYNC_TIMEOUT_MS", 10_000)),
        })
    }

    pub fn with_business_hours(mut self, hours: BusinessHours) -> Self {
        self.business_hours = hours;
        self
    }

    pub fn with_conflict_retry(mut self, policy: RetryPolicy) -> Self {
        self.conflict_retry = policy;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_campaign_sync_timeout(mut self, timeout: Duration) -> Self {
        self.campaign_sync_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.tick_interval, Duration::from_secs(30));
        assert_eq!(config.conflict_retry.max_attempts, 5);
        assert_eq!(config.business_hours, BusinessHours::default());
    }

    #[test]
    fn test_builders_clamp_to_one() {
        let config = EngineConfig::default()
            .with_batch_size(0)
            .with_concurrency(0);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.concurrency, 1);
    }
}
