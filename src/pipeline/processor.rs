//! Email command pipeline: normalize, classify, execute, reply.
//!
//! **Core invariant: exactly one reply per inbound email.** Whatever happens
//! between classification and execution, the sender gets either the result
//! of their request or a single apology.
//!
//! Flow:
//! 1. Normalizer strips markup from the body
//! 2. Classifier turns the text into an `Action`
//! 3. Executor applies it and phrases the result
//! 4. Reply goes out through the mailbox; the message is marked read

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::channels::mailbox::{InboundEmail, Mailbox};
use crate::config::PollerConfig;
use crate::error::{ClassifyError, MailboxError, PipelineError};
use crate::pipeline::action::Action;
use crate::pipeline::classifier::IntentClassifier;
use crate::pipeline::executor::{
    ActionExecutor, GENERIC_FAILURE_REPLY, ReplyStatus, UNKNOWN_ACTION_REPLY,
};
use crate::pipeline::normalizer::normalize_content;

/// Subject of every reply carrying an executed result.
pub const REPLY_SUBJECT: &str = "Respuesta a tu solicitud de biblioteca";

/// Subject of the apology sent when a request could not be classified.
pub const ERROR_SUBJECT: &str = "Error en tu solicitud de biblioteca";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    /// The action ran.
    Completed,
    /// The action was understood but refused.
    Declined,
    /// The request could not be classified.
    Failed,
}

/// Result of handling one email.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub status: ProcessStatus,
    pub action: Option<Action>,
    /// Reply body sent (or attempted) to the requester.
    pub message: String,
    pub reply_sent: bool,
}

/// Summary of one unread-mail pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub processed_count: usize,
    /// Messages from our own address, marked read without a reply.
    pub skipped_count: usize,
    /// One `"message <id>: <reason>"` entry per failed message.
    pub errors: Vec<String>,
}

/// Drives emails through normalize → classify → execute → reply.
pub struct EmailPipeline {
    classifier: IntentClassifier,
    executor: ActionExecutor,
    mailbox: Arc<dyn Mailbox>,
    lookback: chrono::Duration,
    batch_limit: usize,
}

impl EmailPipeline {
    pub fn new(
        classifier: IntentClassifier,
        executor: ActionExecutor,
        mailbox: Arc<dyn Mailbox>,
        poller: &PollerConfig,
    ) -> Self {
        Self {
            classifier,
            executor,
            mailbox,
            lookback: poller.lookback,
            batch_limit: poller.batch_limit,
        }
    }

    /// Handle one email body from `user_email` and send exactly one reply.
    pub async fn process_one(&self, raw: &str, user_email: &str) -> ProcessOutcome {
        self.run(raw, user_email).await.0
    }

    /// Process unread mail from the lookback window, newest first.
    ///
    /// A message is marked read once its reply has been sent. Failures are
    /// collected per message and never stop the batch. Only a failure to
    /// list the inbox is returned as an error.
    pub async fn process_unread(&self) -> Result<BatchReport, MailboxError> {
        let since = Utc::now() - self.lookback;
        let unread = self.mailbox.list_unread(since, self.batch_limit).await?;
        info!(count = unread.len(), "Processing unread mail");

        let mut report = BatchReport::default();
        for email in &unread {
            match self.handle_inbound(email).await {
                Ok(Handled::Processed) => report.processed_count += 1,
                Ok(Handled::Skipped) => report.skipped_count += 1,
                Err(e) => {
                    error!(id = %email.id, from = %email.from_address, error = %e, "Failed to process message");
                    report.errors.push(format!("message {}: {e}", email.id));
                }
            }
        }

        info!(
            processed = report.processed_count,
            skipped = report.skipped_count,
            failed = report.errors.len(),
            "Unread mail pass complete"
        );
        Ok(report)
    }

    async fn handle_inbound(&self, email: &InboundEmail) -> Result<Handled, PipelineError> {
        if self.is_own_address(&email.from_address) {
            info!(id = %email.id, "Skipping message from our own address");
            self.mailbox.mark_read(&email.id).await?;
            return Ok(Handled::Skipped);
        }

        let (outcome, classify_error) = self.run(&email.body_html, &email.from_address).await;
        if !outcome.reply_sent {
            // Left unread so a later pass retries it.
            return Err(PipelineError::ReplyNotSent {
                to: email.from_address.clone(),
            });
        }

        self.mailbox.mark_read(&email.id).await?;
        match classify_error {
            Some(e) => Err(e.into()),
            None => Ok(Handled::Processed),
        }
    }

    async fn run(&self, raw: &str, user_email: &str) -> (ProcessOutcome, Option<ClassifyError>) {
        info!(user = %user_email, "Processing email");
        let text = normalize_content(raw);

        let (status, action, subject, body, classify_error) =
            match self.classifier.classify(&text).await {
                Ok(action) => {
                    let reply = self.executor.execute(&action, user_email).await;
                    let status = match reply.status {
                        ReplyStatus::Completed => ProcessStatus::Completed,
                        ReplyStatus::Declined => ProcessStatus::Declined,
                    };
                    (status, Some(action), REPLY_SUBJECT, reply.body, None)
                }
                Err(e) => {
                    warn!(user = %user_email, error = %e, "Could not classify email");
                    let body = match &e {
                        ClassifyError::Classification { .. } => UNKNOWN_ACTION_REPLY,
                        ClassifyError::Unavailable(_) => GENERIC_FAILURE_REPLY,
                    };
                    (ProcessStatus::Failed, None, ERROR_SUBJECT, body.to_string(), Some(e))
                }
            };

        let reply_sent = match self.mailbox.send(user_email, subject, &body).await {
            Ok(()) => true,
            Err(e) => {
                error!(user = %user_email, error = %e, "Failed to send reply");
                false
            }
        };

        let outcome = ProcessOutcome {
            status,
            action,
            message: body,
            reply_sent,
        };
        (outcome, classify_error)
    }

    fn is_own_address(&self, address: &str) -> bool {
        self.mailbox
            .own_address()
            .is_some_and(|own| own.eq_ignore_ascii_case(address.trim()))
    }
}

enum Handled {
    Processed,
    Skipped,
}
