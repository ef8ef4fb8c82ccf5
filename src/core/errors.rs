//! Error types for the sync layer.

use thiserror::Error;

/// Errors surfaced by the REST client, the realtime client and the stores.
#[derive(Debug, Error)]
pub enum SyncError {
    /// HTTP transport failed (connect, timeout, body read).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with an error status or an `"error"` envelope.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message reported by the backend, or the status reason.
        message: String,
    },

    /// The bearer token was rejected; the session has been logged out.
    #[error("session expired or token rejected")]
    Unauthorized,

    /// The requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Client-side validation failed before anything was sent.
    #[error("validation failed: {0}")]
    Validation(String),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// JSON decoding error.
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Push provider failure (subscribe, connection drop).
    #[error("realtime error: {0}")]
    Realtime(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Check if this error is worth retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) => true,
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Get retry delay in milliseconds if applicable.
    #[must_use]
    pub const fn retry_delay(&self) -> Option<u64> {
        match self {
            Self::Api { status: 429, .. } => Some(5_000),
            Self::Api { status, .. } if *status >= 500 => Some(2_000),
            Self::Http(_) => Some(1_000),
            _ => None,
        }
    }

    /// Build an API error from a status and message.
    #[must_use]
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }
}

/// Convenience result alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
