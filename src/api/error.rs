//! Backend transport error types

use thiserror::Error;

/// Transport error with classification
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
    /// HTTP status, when the server answered at all
    pub status: Option<u16>,
}

impl ApiError {
    #[must_use]
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Network, message)
    }

    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Timeout, message)
    }

    #[must_use]
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: ApiErrorKind::Status,
            message: message.into(),
            status: Some(status),
        }
    }

    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Decode, message)
    }

    #[must_use]
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Unknown, message)
    }

    /// Classify a reqwest failure that happened before or while reading a body
    #[must_use]
    pub fn from_reqwest(context: &str, e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::timeout(format!("{context}: request timeout: {e}"))
        } else if e.is_connect() {
            Self::network(format!("{context}: connection failed: {e}"))
        } else if e.is_decode() {
            Self::decode(format!("{context}: failed to decode response: {e}"))
        } else if e.is_body() || e.is_request() {
            Self::network(format!("{context}: {e}"))
        } else {
            Self::unknown(format!("{context}: request failed: {e}"))
        }
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Connection refused, reset or dropped mid-body
    Network,
    /// Connect timeout
    Timeout,
    /// Server answered with a non-2xx status
    Status,
    /// Response body could not be decoded
    Decode,
    Unknown,
}
