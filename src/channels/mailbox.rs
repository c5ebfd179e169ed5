//! Mailbox trait: the narrow view of an email account the pipeline needs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::MailboxError;

/// An unread message as fetched from the mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboundEmail {
    /// Mailbox-specific identifier used for `mark_read`.
    pub id: String,
    pub subject: String,
    /// HTML body when present, otherwise the plain-text body.
    pub body_html: String,
    pub from_address: String,
    pub received_at: DateTime<Utc>,
}

#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Unread messages received at or after `since`, newest first, at most `limit`.
    async fn list_unread(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<InboundEmail>, MailboxError>;

    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailboxError>;

    async fn mark_read(&self, id: &str) -> Result<(), MailboxError>;

    /// Address replies are sent from. Mail from this address is never processed.
    fn own_address(&self) -> Option<&str> {
        None
    }
}
