use std::time::Duration;

use thiserror::Error;

use crate::config::RetryConfig;

/// Failure from the external text-generation capability.
///
/// Transient errors are retried with bounded exponential backoff inside the
/// invoker; permanent errors surface as a member-level failure result.
#[derive(Debug, Clone)]
pub enum ProviderError {
    Timeout { duration_secs: u64 },
    RateLimited { retry_after_secs: Option<u64> },
    Network(String),
    Permanent(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Permanent(_))
    }

    /// Base delay before the next retry attempt. The invoker doubles this
    /// per attempt up to the configured cap.
    pub fn suggested_delay(&self, config: &RetryConfig) -> Duration {
        match self {
            Self::Timeout { .. } => Duration::from_millis(config.timeout_delay_ms),
            Self::RateLimited { retry_after_secs } => retry_after_secs
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_millis(config.rate_limit_delay_ms)),
            Self::Network(_) => Duration::from_millis(config.network_delay_ms),
            Self::Permanent(_) => Duration::from_secs(0),
        }
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout { duration_secs } => write!(f, "timeout after {}s", duration_secs),
            Self::RateLimited { retry_after_secs } => match retry_after_secs {
                Some(secs) => write!(f, "rate limited, retry after {}s", secs),
                None => write!(f, "rate limited"),
            },
            Self::Network(msg) => write!(f, "network error: {}", msg),
            Self::Permanent(msg) => write!(f, "permanent provider error: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

#[derive(Error, Debug)]
pub enum SymposiumError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    #[error("Corrupt checkpoint {id}: {reason}")]
    CorruptCheckpoint { id: String, reason: String },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Invalid phase transition: {from} -> {to} (allowed: {allowed})")]
    InvalidTransition {
        from: String,
        to: String,
        allowed: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, SymposiumError>;

pub(crate) fn persistence_err_with(context: &str, err: impl std::fmt::Display) -> SymposiumError {
    SymposiumError::Persistence(format!("{}: {}", context, err))
}
