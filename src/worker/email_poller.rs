//! Unread-mail poller: runs the pipeline over the inbox on a schedule.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::PollerConfig;
use crate::error::Error;
use crate::pipeline::EmailPipeline;
use crate::worker::schedule::{Schedule, ScheduledTask, spawn_scheduled};

pub struct EmailPoller {
    pipeline: Arc<EmailPipeline>,
}

impl EmailPoller {
    pub fn new(pipeline: Arc<EmailPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl ScheduledTask for EmailPoller {
    fn name(&self) -> &'static str {
        "email_poller"
    }

    /// Per-message failures are logged; only an unreachable inbox counts as
    /// a failed run.
    async fn run_once(&self) -> Result<(), Error> {
        let report = self.pipeline.process_unread().await?;
        if !report.errors.is_empty() {
            warn!(errors = ?report.errors, "Some messages were not processed");
        }
        if report.processed_count > 0 {
            info!(processed = report.processed_count, "Answered unread mail");
        }
        Ok(())
    }
}

/// Spawn the poll loop.
pub fn spawn_email_poller(
    pipeline: Arc<EmailPipeline>,
    config: &PollerConfig,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let schedule = Schedule {
        interval: config.interval,
        backoff: config.backoff,
    };
    spawn_scheduled(Arc::new(EmailPoller::new(pipeline)), schedule, shutdown)
}
