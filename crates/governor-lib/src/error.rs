//! Typed failures surfaced to direct callers
//!
//! Degraded sensor reads never show up here; they are replaced by defaults
//! inside the collector. Only operation failures and capacity rejections
//! are reported through [`GovernorError`].

use std::path::PathBuf;

/// Errors returned by governor operations
#[derive(Debug, thiserror::Error)]
pub enum GovernorError {
    /// The admission queue has no capacity and nothing could be evicted
    #[error("queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// Queue management is switched off in configuration
    #[error("queue management is disabled")]
    QueueDisabled,

    /// A request with the same id is already queued or running
    #[error("request {0} already exists")]
    DuplicateRequest(String),

    /// No request with the given id is known to the queue
    #[error("request {0} not found")]
    NotFound(String),

    /// A status change that would move a request backwards
    #[error("request {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: &'static str,
        to: &'static str,
    },

    /// A write location could not be created
    #[error("failed to create directory {path}")]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration failed validation
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization failed")]
    Serialization(#[from] serde_json::Error),
}

impl GovernorError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GovernorError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = GovernorError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = GovernorError::QueueFull { capacity: 3 };
        assert_eq!(err.to_string(), "queue full (capacity 3)");

        let err = GovernorError::InvalidTransition {
            id: "job-1".to_string(),
            from: "cancelled",
            to: "running",
        };
        assert_eq!(
            err.to_string(),
            "request job-1 cannot move from cancelled to running"
        );
    }

    #[test]
    fn test_directory_creation_keeps_source() {
        use std::error::Error;

        let err = GovernorError::DirectoryCreation {
            path: PathBuf::from("/nonexistent/wear0"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("/nonexistent/wear0"));
    }
}
