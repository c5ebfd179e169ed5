//! Hand-written doubles shared by unit tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::channels::mailbox::{InboundEmail, Mailbox};
use crate::error::{LlmError, MailboxError};
use crate::llm::provider::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};

/// LLM that answers from a script keyed on the user message.
pub(crate) struct ScriptedLlm {
    /// (needle, reply): the first needle found in the user message wins.
    rules: Vec<(String, String)>,
    fail: bool,
    delay: Option<Duration>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlm {
    /// Always answer `reply`.
    pub(crate) fn replying(reply: &str) -> Self {
        Self::routing(&[("", reply)])
    }

    pub(crate) fn routing(rules: &[(&str, &str)]) -> Self {
        Self {
            rules: rules
                .iter()
                .map(|(needle, reply)| (needle.to_string(), reply.to_string()))
                .collect(),
            fail: false,
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every call fails at the transport level.
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::routing(&[])
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        (Decimal::ZERO, Decimal::ZERO)
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let prompt = request.last_user_message().unwrap_or_default().to_string();
        self.requests.lock().unwrap().push(request);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(LlmError::RequestFailed {
                provider: "scripted".into(),
                reason: "connection refused".into(),
            });
        }

        let reply = self
            .rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: "scripted".into(),
                reason: "no scripted reply".into(),
            })?;

        Ok(CompletionResponse {
            content: reply,
            input_tokens: 120,
            output_tokens: 20,
            finish_reason: FinishReason::Stop,
            response_id: None,
        })
    }
}

/// An email handed to `RecordingMailbox::send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SentEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// In-memory mailbox that records what the pipeline does with it.
pub(crate) struct RecordingMailbox {
    inbox: Vec<InboundEmail>,
    own_address: Option<String>,
    fail_send_to: Option<String>,
    fail_listing: bool,
    sent: Mutex<Vec<SentEmail>>,
    marked: Mutex<Vec<String>>,
}

impl RecordingMailbox {
    pub(crate) fn new(inbox: Vec<InboundEmail>) -> Self {
        Self {
            inbox,
            own_address: None,
            fail_send_to: None,
            fail_listing: false,
            sent: Mutex::new(Vec::new()),
            marked: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_own_address(mut self, address: &str) -> Self {
        self.own_address = Some(address.to_string());
        self
    }

    /// Sends to `address` fail.
    pub(crate) fn with_failing_send_to(mut self, address: &str) -> Self {
        self.fail_send_to = Some(address.to_string());
        self
    }

    pub(crate) fn with_listing_failure(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    pub(crate) fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn marked(&self) -> Vec<String> {
        self.marked.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailbox for RecordingMailbox {
    async fn list_unread(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<InboundEmail>, MailboxError> {
        if self.fail_listing {
            return Err(MailboxError::Fetch("connection reset".into()));
        }
        let marked = self.marked.lock().unwrap().clone();
        let mut unread: Vec<InboundEmail> = self
            .inbox
            .iter()
            .filter(|e| e.received_at >= since && !marked.contains(&e.id))
            .cloned()
            .collect();
        unread.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        unread.truncate(limit);
        Ok(unread)
    }

    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailboxError> {
        if self.fail_send_to.as_deref() == Some(to) {
            return Err(MailboxError::Send {
                to: to.to_string(),
                reason: "mailbox unavailable".into(),
            });
        }
        self.sent.lock().unwrap().push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }

    async fn mark_read(&self, id: &str) -> Result<(), MailboxError> {
        self.marked.lock().unwrap().push(id.to_string());
        Ok(())
    }

    fn own_address(&self) -> Option<&str> {
        self.own_address.as_deref()
    }
}

/// An unread email received `minutes_ago`.
pub(crate) fn inbound(id: &str, from: &str, body: &str, minutes_ago: i64) -> InboundEmail {
    InboundEmail {
        id: id.to_string(),
        subject: "Biblioteca".to_string(),
        body_html: body.to_string(),
        from_address: from.to_string(),
        received_at: Utc::now() - chrono::Duration::minutes(minutes_ago),
    }
}
