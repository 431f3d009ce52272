//! Local persistence of the authenticated session.
//!
//! At most one [`SessionRecord`] is stored, as `session.json` in the data
//! directory. A stored record that does not parse is treated as absent and
//! the file is removed.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tchat_proto::api::UserProfile;

/// File name of the stored session inside the data directory.
pub const SESSION_FILE: &str = "session.json";

/// Errors that can occur while persisting the session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session file or its directory could not be accessed.
    #[error("session file {path}: {source}")]
    Persistence {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The record could not be serialized.
    #[error("failed to serialize session: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Bearer token plus the identity it was issued for.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Bearer token for REST calls and the realtime handshake.
    pub token: String,
    /// The logged-in user.
    pub user: UserProfile,
}

impl SessionRecord {
    /// Whether the record carries everything needed to act on it.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.token.is_empty() && !self.user.id.is_empty()
    }
}

impl std::fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecord")
            .field("token", &"[redacted]")
            .field("user", &self.user)
            .finish()
    }
}

/// Single-record session file store.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Store the session as `session.json` under `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(SESSION_FILE),
        }
    }

    /// Location of the session file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist `record`, replacing any stored one. Incomplete records are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Persistence`] if the directory or file cannot
    /// be written.
    pub fn save(&self, record: &SessionRecord) -> Result<(), SessionError> {
        if !record.is_complete() {
            tracing::debug!("not saving incomplete session record");
            return Ok(());
        }
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| SessionError::Persistence {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&self.path, json).map_err(|source| SessionError::Persistence {
            path: self.path.clone(),
            source,
        })?;
        tracing::debug!(user = %record.user.username, "session saved");
        Ok(())
    }

    /// Read the stored record.
    ///
    /// Returns `None` when no file exists, and also when the file does not
    /// parse or is incomplete; in that case the file is deleted.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Persistence`] only for I/O failures other
    /// than a missing file.
    pub fn load(&self) -> Result<Option<SessionRecord>, SessionError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(SessionError::Persistence {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        match serde_json::from_str::<SessionRecord>(&contents) {
            Ok(record) if record.is_complete() => Ok(Some(record)),
            Ok(_) => {
                tracing::warn!(path = %self.path.display(), "stored session is incomplete, removing");
                self.delete()?;
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), err = %e, "stored session is corrupt, removing");
                self.delete()?;
                Ok(None)
            }
        }
    }

    /// Remove the stored record. Succeeds if there is nothing to remove.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Persistence`] if the file exists but cannot
    /// be removed.
    pub fn delete(&self) -> Result<(), SessionError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!("session file removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SessionError::Persistence {
                path: self.path.clone(),
                source,
            }),
        }
    }
}
