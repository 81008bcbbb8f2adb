use crate::providers::base::Capability;
use std::time::Duration;
use thiserror::Error;

/// Typed error hierarchy for leadline.
///
/// Use at module boundaries (vendor clients, config validation, webhook
/// payload handling). Internal/leaf functions can keep using `anyhow::Result`;
/// the `Internal` variant converts via `?`.
#[derive(Debug, Error)]
pub enum LeadlineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Upstream error: {message}")]
    Provider { message: String, retryable: bool },

    #[error("Rate limit exceeded")]
    RateLimit { retry_after: Option<u64> },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl LeadlineError {
    /// Whether this error is transient and the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { retryable, .. } => *retryable,
            Self::RateLimit { .. } | Self::Internal(_) => true,
            Self::Auth(_) | Self::Config(_) | Self::Validation(_) => false,
        }
    }
}

/// Typed failure of a call through the resilient service gateway.
///
/// Callers handle each variant distinctly: `CircuitOpen` and `Timeout` take
/// the fallback path, `RateLimited` is surfaced without retry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("{capability} timed out after {}ms", .after.as_millis())]
    Timeout {
        capability: Capability,
        after: Duration,
    },

    #[error("{capability} rate limited")]
    RateLimited {
        capability: Capability,
        retry_after: Option<Duration>,
    },

    #[error("{capability} circuit open, retry in {}s", .retry_in.as_secs())]
    CircuitOpen {
        capability: Capability,
        retry_in: Duration,
    },

    #[error("{capability} upstream error: {message}")]
    Upstream {
        capability: Capability,
        message: String,
        retryable: bool,
    },
}

impl GatewayError {
    pub fn capability(&self) -> Capability {
        match self {
            Self::Timeout { capability, .. }
            | Self::RateLimited { capability, .. }
            | Self::CircuitOpen { capability, .. }
            | Self::Upstream { capability, .. } => *capability,
        }
    }

    /// Failures that say something about the dependency's health.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::RateLimited { .. } => true,
            Self::Upstream { retryable, .. } => *retryable,
            Self::CircuitOpen { .. } => false,
        }
    }

    /// Classify a vendor client error.
    pub fn from_provider(capability: Capability, err: &anyhow::Error) -> Self {
        match err.downcast_ref::<LeadlineError>() {
            Some(LeadlineError::RateLimit { retry_after }) => Self::RateLimited {
                capability,
                retry_after: retry_after.map(Duration::from_secs),
            },
            Some(typed) => Self::Upstream {
                capability,
                message: typed.to_string(),
                retryable: typed.is_retryable(),
            },
            None => {
                // Untyped errors come from the transport (connect/reset/decode)
                let timed_out = err
                    .chain()
                    .filter_map(|e| e.downcast_ref::<reqwest::Error>())
                    .any(reqwest::Error::is_timeout);
                Self::Upstream {
                    capability,
                    message: if timed_out {
                        format!("transport timeout: {:#}", err)
                    } else {
                        format!("{:#}", err)
                    },
                    retryable: true,
                }
            }
        }
    }
}
