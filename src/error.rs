//! Error taxonomy surfaced to callers of the orchestration engine.

use thiserror::Error;

/// Top-level error type for the orchestration engine.
#[derive(Error, Debug)]
pub enum LmStudioError {
    #[error("endpoint unreachable: {0}")]
    ConnectionError(String),

    #[error("endpoint returned status {status}: {body}")]
    EndpointError { status: u16, body: String },

    #[error("cancelled")]
    Cancelled { partial_text: String },

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("exceeded tool-call round limit without final response")]
    RoundLimitExceeded,

    #[error("{0}")]
    Other(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
}

impl LmStudioError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionError(msg.into())
    }

    pub fn endpoint(status: u16, body: impl Into<String>) -> Self {
        Self::EndpointError {
            status,
            body: body.into(),
        }
    }

    pub fn cancelled(partial_text: impl Into<String>) -> Self {
        Self::Cancelled {
            partial_text: partial_text.into(),
        }
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Partial text accumulated before a cancellation, if this is one.
    pub fn partial_text(&self) -> Option<&str> {
        match self {
            Self::Cancelled { partial_text } => Some(partial_text),
            _ => None,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LmStudioError>;

/// Extension trait mirroring the teacher's `into_*_error` convention for
/// wrapping foreign errors with context at call sites.
pub trait IntoLmStudioErrorResult<T> {
    fn context_err(self, context: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> IntoLmStudioErrorResult<T> for std::result::Result<T, E> {
    fn context_err(self, context: &str) -> Result<T> {
        self.map_err(|e| LmStudioError::Other(format!("{}: {}", context, e)))
    }
}
