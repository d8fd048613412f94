//! Error types for servekit

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("request failed with status: {0}")]
    Status(StatusCode),

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("Server is already running")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the client should try the request again.
    ///
    /// Transport failures are retried unless the request itself could not be
    /// built; responses are retried on 429 and any 5xx.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(err) => !err.is_builder(),
            Error::Status(status) => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            _ => false,
        }
    }

    /// The HTTP status carried by this error, if any
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Status(status) => Some(*status),
            Error::Transport(err) => err.status(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_message_carries_reason() {
        let err = Error::Status(StatusCode::NOT_FOUND);
        assert_eq!(err.to_string(), "request failed with status: 404 Not Found");
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(Error::Status(StatusCode::INTERNAL_SERVER_ERROR).is_retryable());
        assert!(Error::Status(StatusCode::SERVICE_UNAVAILABLE).is_retryable());
        assert!(Error::Status(StatusCode::TOO_MANY_REQUESTS).is_retryable());
        assert!(!Error::Status(StatusCode::BAD_REQUEST).is_retryable());
        assert!(!Error::Status(StatusCode::NOT_FOUND).is_retryable());
    }

    #[test]
    fn test_local_errors_not_retryable() {
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::DeadlineExceeded.is_retryable());
        assert!(!Error::UnsupportedMethod("TRACE".into()).is_retryable());
        assert!(!Error::Config("bad".into()).is_retryable());
    }
}
