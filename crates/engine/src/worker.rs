//! Background scheduler loop
//!
//! Runs `StepScheduler::tick` on a fixed interval until shutdown is
//! signalled. A tick that fills its batch is followed immediately by another,
//! so a backlog drains without waiting out the interval.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

use crate::scheduler::{StepScheduler, TickReport};

/// Drives a [`StepScheduler`] until shutdown
pub struct SchedulerLoop {
    scheduler: Arc<StepScheduler>,
    interval: Duration,
    batch_size: usize,
    shutdown_rx: watch::Receiver<bool>,
}

impl SchedulerLoop {
    pub fn new(
        scheduler: Arc<StepScheduler>,
        interval: Duration,
        batch_size: usize,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            scheduler,
            interval,
            batch_size: batch_size.max(1),
            shutdown_rx,
        }
    }

    /// Spawn the loop on the current runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Run until the shutdown signal flips to `true` or its sender is dropped
    pub async fn run(mut self) {
        info!(interval_ms = self.interval.as_millis() as u64, "scheduler loop started");
        loop {
            if self.is_shutdown() {
                break;
            }

            let backlog = match self.scheduler.tick(Utc::now()).await {
                Ok(report) => {
                    trace!(due = report.due, "tick finished");
                    is_backlogged(&report, self.batch_size)
                }
                Err(err) => {
                    error!(error = %err, "scheduler tick failed");
                    false
                }
            };
            if backlog {
                continue;
            }

            if self.wait().await {
                break;
            }
        }
        info!("scheduler loop stopped");
    }

    /// Wait one interval; returns `true` if shutdown arrived meanwhile
    async fn wait(&mut self) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.interval) => false,
            changed = self.shutdown_rx.changed() => {
                debug!("shutdown signal received during wait");
                changed.is_err() || *self.shutdown_rx.borrow()
            }
        }
    }
}

/// A full batch that made progress suggests more runs are waiting
fn is_backlogged(report: &TickReport, batch_size: usize) -> bool {
    report.due >= batch_size && report.advanced > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backlog_needs_full_batch_and_progress() {
        let full = TickReport {
            due: 10,
            advanced: 3,
            ..Default::default()
        };
        assert!(is_backlogged(&full, 10));
        assert!(!is_backlogged(&full, 20));

        let stuck = TickReport {
            due: 10,
            skipped: 10,
            ..Default::default()
        };
        assert!(!is_backlogged(&stuck, 10));
    }
}
