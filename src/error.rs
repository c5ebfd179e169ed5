//! Error types for biblio-mail.

use std::time::Duration;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Mailbox (IMAP/SMTP) errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Failed to fetch unread mail: {0}")]
    Fetch(String),

    #[error("Failed to send mail to {to}: {reason}")]
    Send { to: String, reason: String },

    #[error("Failed to mark message {id} as read: {reason}")]
    MarkRead { id: String, reason: String },

    #[error("Mailbox misconfigured: {0}")]
    Config(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Intent classification errors.
///
/// Both variants escape to the pipeline, which turns them into a single
/// apology reply. Neither is retried within the same attempt.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    /// The model answered, but not with a usable action object.
    #[error("Model output is not a valid action: {raw}")]
    Classification { raw: String },

    /// The language service could not be reached (transport error or timeout).
    #[error("Classifier unavailable: {0}")]
    Unavailable(#[from] LlmError),
}

/// Catalog and reservation lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("Book not found: {title}")]
    BookNotFound { title: String },

    #[error("Book {id} not found")]
    BookIdNotFound { id: i64 },

    #[error("Book is not available: {title}")]
    BookUnavailable { title: String },

    #[error("No active reservation of '{title}' for {user_email}")]
    NoActiveReservation { user_email: String, title: String },

    #[error("Reservation {id} not found")]
    ReservationNotFound { id: i64 },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Pipeline-related errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Classification failed: {0}")]
    Classify(#[from] ClassifyError),

    #[error("Reply to {to} was not sent")]
    ReplyNotSent { to: String },

    #[error("Mailbox failed: {0}")]
    Mailbox(#[from] MailboxError),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
