//! Error types for dyk-core.
//!
//! Remote-call failures are split by who can act on them: [`ServiceError`]
//! is what a single backend attempt produced, [`CallError`] is the terminal
//! outcome of one logical call after retries and response repair, and
//! [`ParseError`] distinguishes "nothing usable" from "something, but not
//! enough".

use std::time::Duration;

use thiserror::Error;

/// Result type alias using dyk-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for dyk operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigValidationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

/// Failure of a single attempt against a remote text or search service.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    /// Connection, TLS or body-read failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The per-call timeout elapsed before a response arrived.
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    /// The service answered with a non-success status.
    #[error("service returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The service answered 2xx but the envelope had no completion text.
    #[error("empty completion: {0}")]
    EmptyCompletion(String),

    /// The service answered 2xx with a body that is not the expected envelope.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ServiceError {
    /// Create a status error
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Whether another attempt may succeed: transport failures, timeouts,
    /// 429 and 5xx responses.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::EmptyCompletion(_) | Self::MalformedResponse(_) => false,
        }
    }

    /// Classify a reqwest failure for a request sent with `timeout`.
    pub fn from_http(e: reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            return Self::Timeout(timeout.as_millis() as u64);
        }
        if e.is_decode() {
            return Self::MalformedResponse(e.to_string());
        }
        if let Some(status) = e.status() {
            return Self::status(status.as_u16(), e.to_string());
        }
        Self::Transport(e.to_string())
    }
}

/// A response that could not be coerced into the expected record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Nothing resembling a structured document was found.
    #[error("no usable content: {reason}")]
    NoContent { reason: String },

    /// A document was found, but even the repaired text did not parse
    /// into the expected shape.
    #[error("partially usable content ({recovered_chars} chars recovered): {message}")]
    Partial {
        message: String,
        recovered_chars: usize,
    },
}

impl ParseError {
    /// Create a no-content error
    pub fn no_content(reason: impl Into<String>) -> Self {
        Self::NoContent {
            reason: reason.into(),
        }
    }

    /// Create a partial-content error
    pub fn partial(message: impl Into<String>, recovered_chars: usize) -> Self {
        Self::Partial {
            message: message.into(),
            recovered_chars,
        }
    }

    /// Check if any content was recovered
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::Partial { .. })
    }
}

/// Terminal outcome of one logical remote call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CallError {
    /// Every attempt failed with a retryable error.
    #[error("failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: ServiceError },

    /// The service rejected the request (4xx other than 429).
    #[error("request rejected: {0}")]
    Rejected(ServiceError),

    /// The response arrived but could not be parsed.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
}

impl CallError {
    /// Stable category name used in run statistics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Exhausted { .. } => "transient_exhausted",
            Self::Rejected(_) => "rejected",
            Self::Parse(ParseError::NoContent { .. }) => "parse_no_content",
            Self::Parse(ParseError::Partial { .. }) => "parse_partial",
        }
    }
}
