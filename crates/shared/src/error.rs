use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    FetchFailed,
    MalformedResponse,
}

/// Failure reported by a page fetch. Never escapes the loader boundary as a
/// fault; it is folded into the collection state and handed to the error sink.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct LoadError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl LoadError {
    pub fn fetch_failed(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::FetchFailed,
            message: message.into(),
            status: None,
        }
    }

    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::FetchFailed,
            message: message.into(),
            status: Some(status),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::MalformedResponse,
            message: message.into(),
            status: None,
        }
    }

    /// Client errors (4xx) will not change on a second attempt.
    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::FetchFailed && !matches!(self.status, Some(400..=499))
    }
}
