//! Configuration types, built from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};

/// Read an optional env var and parse it, falling back to `default` when unset.
///
/// A set-but-unparseable value is an error rather than a silent default.
pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Reservation durations.
#[derive(Debug, Clone)]
pub struct LibraryConfig {
    /// Length of a reservation made (or renewed) by email.
    pub reservation_days: i64,
    /// Extension applied by the HTTP renew endpoint.
    pub renew_days: i64,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            reservation_days: 15,
            renew_days: 14,
        }
    }
}

impl LibraryConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            reservation_days: env_or("LIBRARY_RESERVATION_DAYS", defaults.reservation_days)?,
            renew_days: env_or("LIBRARY_RENEW_DAYS", defaults.renew_days)?,
        })
    }
}

/// Unread-mail poll loop settings.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Delay between healthy poll runs.
    pub interval: Duration,
    /// Delay after a failed poll run.
    pub backoff: Duration,
    /// Only messages received within this window are considered.
    pub lookback: chrono::Duration,
    /// Maximum messages handled per run.
    pub batch_limit: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            backoff: Duration::from_secs(60),
            lookback: chrono::Duration::hours(24),
            batch_limit: 10,
        }
    }
}

impl PollerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            interval: Duration::from_secs(env_or("EMAIL_POLL_INTERVAL_SECS", 30)?),
            backoff: Duration::from_secs(env_or("EMAIL_POLL_BACKOFF_SECS", 60)?),
            lookback: chrono::Duration::hours(env_or("EMAIL_LOOKBACK_HOURS", 24)?),
            batch_limit: env_or("EMAIL_BATCH_LIMIT", 10)?,
        })
    }
}

/// Expiry sweep loop settings.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub interval: Duration,
    pub backoff: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            backoff: Duration::from_secs(300),
        }
    }
}

impl SweepConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            interval: Duration::from_secs(env_or("EXPIRY_SWEEP_INTERVAL_SECS", 3600)?),
            backoff: Duration::from_secs(env_or("EXPIRY_SWEEP_BACKOFF_SECS", 300)?),
        })
    }
}

/// Intent classifier settings: which model to call and how long to wait.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub llm: LlmConfig,
    pub timeout: Duration,
}

impl ClassifierConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend: LlmBackend = env_or("LIBRARY_LLM_BACKEND", LlmBackend::OpenAi)?;
        let key_var = backend.api_key_var();
        let default_model = backend.default_model();
        let api_key = std::env::var(key_var)
            .map_err(|_| ConfigError::MissingEnvVar(key_var.to_string()))?;
        let model =
            std::env::var("LIBRARY_LLM_MODEL").unwrap_or_else(|_| default_model.to_string());

        Ok(Self {
            llm: LlmConfig {
                backend,
                api_key: SecretString::from(api_key),
                model,
            },
            timeout: Duration::from_secs(env_or("LIBRARY_CLASSIFIER_TIMEOUT_SECS", 30)?),
        })
    }
}

/// HTTP server and storage settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            port: env_or("LIBRARY_HTTP_PORT", 8080)?,
            db_path: std::env::var("LIBRARY_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data/biblio-mail.db")),
        })
    }
}
