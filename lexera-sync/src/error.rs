/// Error types for the offline sync engine.
///
/// The taxonomy mirrors how each failure is handled:
/// validation errors never touch state, stale responses are routed to the
/// merge engine, transient network errors are absorbed by the queue, and
/// every other remote failure rolls the optimistic change back.
use thiserror::Error;

use crate::remote::RemoteEntity;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{entity} title must not be empty")]
    EmptyTitle { entity: &'static str },

    #[error("{entity} id must not be empty")]
    EmptyId { entity: &'static str },
}

#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// No response at all: connection refused, DNS failure, timeout.
    #[error("network unavailable: {0}")]
    Network(String),

    /// HTTP 409: the client's entity version is behind the server's.
    #[error("stale entity version, server has {server:?}")]
    Stale { server: Box<RemoteEntity> },

    #[error("not found on remote: {0}")]
    NotFound(String),

    /// Non-conflict 4xx.
    #[error("remote rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// 5xx.
    #[error("remote failure ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("could not decode remote response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Whether retrying the same call later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Network(_) | RemoteError::Server { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Network(_))
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, RemoteError::Stale { .. })
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid mutation: {0}")]
    Validation(#[from] ValidationError),

    /// The remote refused the change; the optimistic update was rolled back.
    #[error("remote commit failed, change rolled back: {0}")]
    Remote(RemoteError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("offline")]
    Offline,

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("no conflicts are waiting for resolution")]
    NoPendingConflicts,

    #[error("conflict index {index} out of range ({len} pending)")]
    ConflictIndex { index: usize, len: usize },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no server_url configured")]
    NoServerUrl,

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(RemoteError::Network("connection reset".into()).is_retryable());
        assert!(RemoteError::Server {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(!RemoteError::Rejected {
            status: 422,
            message: "bad title".into()
        }
        .is_retryable());
        assert!(!RemoteError::NotFound("card c1".into()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::ConflictIndex { index: 4, len: 2 };
        assert_eq!(err.to_string(), "conflict index 4 out of range (2 pending)");

        let err = ValidationError::EmptyTitle { entity: "card" };
        assert_eq!(err.to_string(), "card title must not be empty");
    }
}
