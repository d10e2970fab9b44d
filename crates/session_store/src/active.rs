use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::error::SessionStoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ActiveSessionRecord {
    active_session_id: String,
    saved_at: String,
}

/// Durable slot for the active session id.
#[derive(Debug, Clone)]
pub struct ActiveSessionFile {
    path: PathBuf,
}

impl ActiveSessionFile {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persisted id, or `None` when the file is missing, unreadable or corrupt.
    #[must_use]
    pub fn load(&self) -> Option<String> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return None,
            Err(error) => {
                warn!(path = %self.path.display(), %error, "failed to read active session file");
                return None;
            }
        };

        match serde_json::from_str::<ActiveSessionRecord>(&raw) {
            Ok(record) if !record.active_session_id.trim().is_empty() => {
                Some(record.active_session_id)
            }
            Ok(_) => None,
            Err(error) => {
                warn!(path = %self.path.display(), %error, "ignoring corrupt active session file");
                None
            }
        }
    }

    pub fn save(&self, session_id: &str) -> Result<(), SessionStoreError> {
        let saved_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(SessionStoreError::ClockFormat)?;
        let record = ActiveSessionRecord {
            active_session_id: session_id.to_string(),
            saved_at,
        };
        let body = serde_json::to_string_pretty(&record)
            .map_err(|source| SessionStoreError::json_serialize(&self.path, source))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| {
                SessionStoreError::io("creating state directory", parent, source)
            })?;
        }
        fs::write(&self.path, body)
            .map_err(|source| SessionStoreError::io("writing active session file", &self.path, source))?;
        debug!(session_id, "persisted active session");
        Ok(())
    }

    pub fn clear(&self) -> Result<(), SessionStoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SessionStoreError::io(
                "removing active session file",
                &self.path,
                source,
            )),
        }
    }
}
