//! Repeating background tasks with a healthy interval, a backoff interval
//! and a shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::Error;

/// A unit of periodic work.
#[async_trait]
pub trait ScheduledTask: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// One pass. An error switches the next delay to the backoff interval.
    async fn run_once(&self) -> Result<(), Error>;
}

/// Delays between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// After a successful run.
    pub interval: Duration,
    /// After a failed run.
    pub backoff: Duration,
}

/// Run `task` immediately, then again after each delay, until `shutdown`
/// flips to `true` (or its sender is dropped).
///
/// Runs never overlap: the next delay starts only after the current pass
/// finishes, and a pass in flight is never interrupted.
pub fn spawn_scheduled<T: ScheduledTask>(
    task: Arc<T>,
    schedule: Schedule,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let name = task.name();
        info!(
            task = name,
            interval_secs = schedule.interval.as_secs(),
            backoff_secs = schedule.backoff.as_secs(),
            "Scheduled task started"
        );

        while !*shutdown.borrow() {
            let delay = match task.run_once().await {
                Ok(()) => schedule.interval,
                Err(e) => {
                    error!(task = name, error = %e, "Scheduled run failed, backing off");
                    schedule.backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(task = name, "Scheduled task stopped");
    })
}
