//! IMAP/SMTP mailbox: raw IMAP over TLS for reading, lettre SMTP for sending.
//!
//! IMAP and SMTP are blocking; every call runs inside `spawn_blocking`.
//! Message ids are IMAP UIDs, which stay valid across sessions, so a message
//! listed in one session can be marked read in another.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use mail_parser::MessageParser;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channels::mailbox::{InboundEmail, Mailbox};
use crate::config::env_or;
use crate::error::{ConfigError, MailboxError};

// ── Configuration ───────────────────────────────────────────────────

/// Mail account settings, built from environment variables.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    /// Socket read/write timeout for IMAP and SMTP.
    pub io_timeout: Duration,
}

impl EmailConfig {
    /// `EMAIL_IMAP_HOST`, `EMAIL_USERNAME` and `EMAIL_PASSWORD` are required.
    /// The SMTP host defaults to the IMAP host with `imap` replaced by `smtp`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let required = |key: &str| {
            std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
        };

        let imap_host = required("EMAIL_IMAP_HOST")?;
        let username = required("EMAIL_USERNAME")?;
        let password = SecretString::from(required("EMAIL_PASSWORD")?);
        let smtp_host =
            std::env::var("EMAIL_SMTP_HOST").unwrap_or_else(|_| imap_host.replace("imap", "smtp"));
        let from_address =
            std::env::var("EMAIL_FROM_ADDRESS").unwrap_or_else(|_| username.clone());

        Ok(Self {
            imap_port: env_or("EMAIL_IMAP_PORT", 993)?,
            smtp_port: env_or("EMAIL_SMTP_PORT", 587)?,
            io_timeout: Duration::from_secs(env_or("EMAIL_IO_TIMEOUT_SECS", 30)?),
            imap_host,
            smtp_host,
            username,
            password,
            from_address,
        })
    }
}

// ── Mailbox ─────────────────────────────────────────────────────────

/// Mailbox backed by an IMAP inbox and an SMTP relay.
pub struct ImapSmtpMailbox {
    config: Arc<EmailConfig>,
}

impl ImapSmtpMailbox {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl Mailbox for ImapSmtpMailbox {
    async fn list_unread(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<InboundEmail>, MailboxError> {
        let config = Arc::clone(&self.config);
        let mut emails = tokio::task::spawn_blocking(move || fetch_unread(&config, since, limit))
            .await
            .map_err(|e| MailboxError::Fetch(format!("IMAP task panicked: {e}")))?
            .map_err(|e| MailboxError::Fetch(e.to_string()))?;

        emails.retain(|email| email.received_at >= since);
        emails.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        emails.truncate(limit);
        debug!(count = emails.len(), "Fetched unread mail");
        Ok(emails)
    }

    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailboxError> {
        let config = Arc::clone(&self.config);
        let (to, subject, body) = (to.to_string(), subject.to_string(), body.to_string());
        let recipient = to.clone();

        tokio::task::spawn_blocking(move || send_smtp(&config, &to, &subject, &body))
            .await
            .map_err(|e| MailboxError::Send {
                to: recipient.clone(),
                reason: format!("SMTP task panicked: {e}"),
            })??;

        info!(to = %recipient, "Email sent");
        Ok(())
    }

    async fn mark_read(&self, id: &str) -> Result<(), MailboxError> {
        let config = Arc::clone(&self.config);
        let uid = id.to_string();
        let mark_err = |reason: String| MailboxError::MarkRead {
            id: id.to_string(),
            reason,
        };

        if !uid.chars().all(|c| c.is_ascii_digit()) || uid.is_empty() {
            return Err(mark_err("not an IMAP UID".into()));
        }

        tokio::task::spawn_blocking(move || mark_seen(&config, &uid))
            .await
            .map_err(|e| mark_err(format!("IMAP task panicked: {e}")))?
            .map_err(|e| mark_err(e.to_string()))
    }

    fn own_address(&self) -> Option<&str> {
        Some(&self.config.from_address)
    }
}

// ── SMTP ────────────────────────────────────────────────────────────

fn send_smtp(config: &EmailConfig, to: &str, subject: &str, body: &str) -> Result<(), MailboxError> {
    let send_err = |reason: String| MailboxError::Send {
        to: to.to_string(),
        reason,
    };

    let creds = Credentials::new(
        config.username.clone(),
        config.password.expose_secret().to_string(),
    );

    // 465 is implicit TLS; anything else upgrades with STARTTLS.
    let builder = if config.smtp_port == 465 {
        SmtpTransport::relay(&config.smtp_host)
    } else {
        SmtpTransport::starttls_relay(&config.smtp_host)
    }
    .map_err(|e| MailboxError::Config(format!("SMTP relay {}: {e}", config.smtp_host)))?;

    let transport = builder
        .port(config.smtp_port)
        .credentials(creds)
        .timeout(Some(config.io_timeout))
        .build();

    let email = Message::builder()
        .message_id(Some(outbound_message_id(&config.from_address)))
        .from(
            config
                .from_address
                .parse()
                .map_err(|e| MailboxError::Config(format!("Invalid from address: {e}")))?,
        )
        .to(to
            .parse()
            .map_err(|e| send_err(format!("Invalid to address: {e}")))?)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
        .map_err(|e| send_err(format!("Failed to build email: {e}")))?;

    transport
        .send(&email)
        .map_err(|e| send_err(format!("SMTP send failed: {e}")))?;
    Ok(())
}

/// `<uuid@domain>` using the sender's domain.
fn outbound_message_id(from_address: &str) -> String {
    let domain = from_address
        .rsplit_once('@')
        .map(|(_, d)| d)
        .filter(|d| !d.is_empty())
        .unwrap_or("localhost");
    format!("<{}@{domain}>", Uuid::new_v4())
}

// ── IMAP ────────────────────────────────────────────────────────────

/// Error type for blocking IMAP operations.
type ImapError = Box<dyn std::error::Error + Send + Sync>;

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// A logged-in IMAP session with INBOX selected.
struct ImapSession {
    tls: TlsStream,
    next_tag: u32,
}

impl ImapSession {
    fn open(config: &EmailConfig) -> Result<Self, ImapError> {
        let tcp = TcpStream::connect((config.imap_host.as_str(), config.imap_port))?;
        tcp.set_read_timeout(Some(config.io_timeout))?;
        tcp.set_write_timeout(Some(config.io_timeout))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls_pki_types::ServerName::try_from(config.imap_host.clone())?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)?;

        let mut session = Self {
            tls: rustls::StreamOwned::new(conn, tcp),
            next_tag: 1,
        };

        let _greeting = session.read_line()?;
        let login = session.command(&format!(
            "LOGIN {} {}",
            quote(&config.username),
            quote(config.password.expose_secret())
        ))?;
        ensure_ok(&login, "LOGIN")?;
        let select = session.command("SELECT \"INBOX\"")?;
        ensure_ok(&select, "SELECT")?;
        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, ImapError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match self.tls.read(&mut byte) {
                Ok(0) => return Err("IMAP connection closed".into()),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).into_owned());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, ImapError> {
        let mut buf = vec![0u8; len];
        self.tls.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn send(&mut self, cmd: &str) -> Result<String, ImapError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;
        self.tls.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        self.tls.flush()?;
        Ok(tag)
    }

    /// Send a command and collect response lines up to the tagged status line.
    fn command(&mut self, cmd: &str) -> Result<Vec<String>, ImapError> {
        let tag = self.send(cmd)?;
        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            let done = line.starts_with(&format!("{tag} "));
            lines.push(line);
            if done {
                return Ok(lines);
            }
        }
    }

    /// Fetch one full message without setting `\Seen`.
    fn fetch_message(&mut self, uid: &str) -> Result<Option<Vec<u8>>, ImapError> {
        let tag = self.send(&format!("UID FETCH {uid} BODY.PEEK[]"))?;
        let mut message = None;
        loop {
            let line = self.read_line()?;
            if line.starts_with(&format!("{tag} ")) {
                ensure_ok(&[line], "FETCH")?;
                return Ok(message);
            }
            if let Some(len) = literal_len(&line) {
                message = Some(self.read_exact(len)?);
            }
        }
    }

    fn store_seen(&mut self, uid: &str) -> Result<(), ImapError> {
        let store = self.command(&format!("UID STORE {uid} +FLAGS (\\Seen)"))?;
        ensure_ok(&store, "STORE")
    }

    fn logout(mut self) {
        if let Err(e) = self.command("LOGOUT") {
            debug!(error = %e, "IMAP logout failed");
        }
    }
}

/// Per-message operations `collect_unread` needs from a session.
trait MessageSource {
    fn fetch(&mut self, uid: &str) -> Result<Option<Vec<u8>>, ImapError>;
    fn mark_seen(&mut self, uid: &str) -> Result<(), ImapError>;
}

impl MessageSource for ImapSession {
    fn fetch(&mut self, uid: &str) -> Result<Option<Vec<u8>>, ImapError> {
        self.fetch_message(uid)
    }

    fn mark_seen(&mut self, uid: &str) -> Result<(), ImapError> {
        self.store_seen(uid)
    }
}

fn fetch_unread(
    config: &EmailConfig,
    since: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<InboundEmail>, ImapError> {
    let mut session = ImapSession::open(config)?;

    let search = session.command(&format!("UID SEARCH UNSEEN SINCE {}", imap_date(since)))?;
    ensure_ok(&search, "SEARCH")?;
    let uids = newest_first(parse_search(&search));

    let emails = collect_unread(&mut session, &uids, since, limit)?;
    session.logout();
    Ok(emails)
}

/// Download bodies newest UID first until `limit` usable messages are found.
///
/// `SINCE` only has day precision, so messages dated before `since` are
/// skipped without counting. Messages with no sender are marked seen so
/// later passes stop downloading them.
fn collect_unread<S: MessageSource>(
    source: &mut S,
    uids: &[u32],
    since: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<InboundEmail>, ImapError> {
    let mut emails = Vec::with_capacity(limit.min(uids.len()));
    for uid in uids {
        if emails.len() >= limit {
            break;
        }
        let uid = uid.to_string();
        let Some(raw) = source.fetch(&uid)? else {
            warn!(uid = %uid, "FETCH returned no body");
            continue;
        };
        match parse_email(&uid, &raw) {
            Some(email) if email.received_at >= since => emails.push(email),
            Some(_) => debug!(uid = %uid, "Message older than lookback window"),
            None => {
                warn!(uid = %uid, "Unparseable message, marking it read");
                if let Err(e) = source.mark_seen(&uid) {
                    warn!(uid = %uid, error = %e, "Could not mark unparseable message read");
                }
            }
        }
    }
    Ok(emails)
}

fn mark_seen(config: &EmailConfig, uid: &str) -> Result<(), ImapError> {
    let mut session = ImapSession::open(config)?;
    session.store_seen(uid)?;
    session.logout();
    Ok(())
}

fn ensure_ok(lines: &[String], what: &str) -> Result<(), ImapError> {
    match lines.last() {
        Some(status) if status.split_whitespace().nth(1) == Some("OK") => Ok(()),
        Some(status) => Err(format!("IMAP {what} failed: {}", status.trim()).into()),
        None => Err(format!("IMAP {what}: empty response").into()),
    }
}

/// IMAP quoted string.
fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Date in the `SEARCH SINCE` format, e.g. `7-Mar-2026`.
fn imap_date(ts: DateTime<Utc>) -> String {
    ts.format("%-d-%b-%Y").to_string()
}

/// UIDs from `* SEARCH ...` lines.
fn parse_search(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|line| line.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().map(str::to_string))
        .collect()
}

/// Numeric UIDs, highest first. UIDs grow with arrival order, so this is
/// newest first. Non-numeric tokens are dropped.
fn newest_first(uids: Vec<String>) -> Vec<u32> {
    let mut parsed: Vec<u32> = uids.iter().filter_map(|u| u.parse().ok()).collect();
    parsed.sort_unstable_by(|a, b| b.cmp(a));
    parsed.dedup();
    parsed
}

/// Size of a trailing `{N}` literal marker.
fn literal_len(line: &str) -> Option<usize> {
    let trimmed = line.trim_end();
    let inner = trimmed.strip_suffix('}')?;
    let open = inner.rfind('{')?;
    inner[open + 1..].parse().ok()
}

/// Build an `InboundEmail` from a raw RFC 822 message.
fn parse_email(uid: &str, raw: &[u8]) -> Option<InboundEmail> {
    let parsed = MessageParser::default().parse(raw)?;

    let from_address = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())?;

    let body_html = parsed
        .body_html(0)
        .or_else(|| parsed.body_text(0))
        .map(|b| b.into_owned())
        .unwrap_or_default();

    let received_at = parsed
        .date()
        .and_then(|d| DateTime::<Utc>::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or_else(Utc::now);

    Some(InboundEmail {
        id: uid.to_string(),
        subject: parsed.subject().unwrap_or("(sin asunto)").to_string(),
        body_html,
        from_address,
        received_at,
    })
}

// ── Tests ───────────────────────────────────────────────────────────
