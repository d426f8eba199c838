// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use crate::model::Platform;

/// Errors surfaced by the relay pipeline.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Malformed {platform} payload: {reason}")]
    MalformedPayload { platform: Platform, reason: String },

    #[error("Failed to retrieve log for unit {unit}: {reason}")]
    RetrievalFailure { unit: String, reason: String },

    #[error("Circuit open for target {target}")]
    CircuitOpen { target: String },

    #[error("Delivery failed: {0}")]
    DeliveryFailure(String),

    #[error("Failed to store run at {}: {source}", path.display())]
    StorageFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to sign delivery token: {0}")]
    Signing(String),
}

impl RelayError {
    pub fn malformed(platform: Platform, reason: impl Into<String>) -> Self {
        RelayError::MalformedPayload {
            platform,
            reason: reason.into(),
        }
    }
}

/// Outcome classification for a failed outbound HTTP call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HttpError {
    /// DNS, TLS, connection reset and other transport issues.
    #[error("transport error: {0}")]
    Transport(String),
    /// The request or a body read did not complete in time.
    #[error("request timed out: {0}")]
    Timeout(String),
    /// The remote answered with a non-success status.
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    /// The response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),
    /// The request could not be built, e.g. no server URL or credentials are known.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl HttpError {
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for HttpError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            HttpError::Timeout(e.to_string())
        } else if e.is_decode() {
            HttpError::Decode(e.to_string())
        } else if e.is_builder() {
            HttpError::InvalidRequest(e.to_string())
        } else if let Some(status) = e.status() {
            HttpError::Status {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            HttpError::Transport(e.to_string())
        }
    }
}

/// Errors that may be worth another attempt.
pub trait Retriable {
    fn is_retriable(&self) -> bool;
}

impl Retriable for HttpError {
    /// Transport errors, timeouts, 5xx and 429 are retriable; other statuses and decode
    /// failures are not.
    fn is_retriable(&self) -> bool {
        match self {
            HttpError::Transport(_) | HttpError::Timeout(_) => true,
            HttpError::Status { status, .. } => *status >= 500 || *status == 429,
            HttpError::Decode(_) | HttpError::InvalidRequest(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = RelayError::malformed(Platform::Gitlab, "missing object_attributes.id");
        assert_eq!(
            error.to_string(),
            "Malformed gitlab payload: missing object_attributes.id"
        );

        let error = RelayError::CircuitOpen {
            target: "gitlab.example.com".to_string(),
        };
        assert_eq!(error.to_string(), "Circuit open for target gitlab.example.com");
    }

    #[test]
    fn test_storage_failure_keeps_source() {
        let error = RelayError::StorageFailure {
            path: PathBuf::from("/tmp/runs"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(error.to_string().contains("/tmp/runs"));
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn test_retriable_classification() {
        let status = |status| HttpError::Status {
            status,
            body: String::new(),
        };
        assert!(HttpError::Transport("reset".into()).is_retriable());
        assert!(HttpError::Timeout("chunk".into()).is_retriable());
        assert!(status(500).is_retriable());
        assert!(status(503).is_retriable());
        assert!(status(429).is_retriable());
        assert!(!status(400).is_retriable());
        assert!(!status(404).is_retriable());
        assert!(!HttpError::Decode("bad json".into()).is_retriable());
        assert!(!HttpError::InvalidRequest("no server".into()).is_retriable());
    }

    #[test]
    fn test_status_accessor() {
        let error = HttpError::Status {
            status: 404,
            body: "not found".into(),
        };
        assert_eq!(error.status(), Some(404));
        assert_eq!(HttpError::Transport("x".into()).status(), None);
    }
}
