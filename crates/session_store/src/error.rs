use std::path::PathBuf;

use chat_api::ChatApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("no active session")]
    NoActiveSession,

    #[error("session '{0}' is not in the session list")]
    UnknownSession(String),

    #[error("a chat turn is already in flight")]
    TurnInFlight,

    #[error("'{0}' is not the pending assistant placeholder")]
    UnknownPlaceholder(String),

    #[error("assistant placeholder '{0}' is already finalized")]
    PlaceholderFinalized(String),

    #[error("backend request failed: {0}")]
    Backend(#[from] ChatApiError),

    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize state file {path}: {source}")]
    JsonSerialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to format current UTC timestamp as RFC3339: {0}")]
    ClockFormat(#[source] time::error::Format),
}

impl SessionStoreError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn json_serialize(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::JsonSerialize {
            path: path.into(),
            source,
        }
    }

    /// True when the backend rejected the stored credentials.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Backend(error) if error.is_auth_failure())
    }
}
