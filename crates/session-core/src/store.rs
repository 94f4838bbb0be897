//! Session store
//!
//! File-backed persistence of [`PersistedState`]. Every save replaces the
//! whole file: the snapshot is written to a sibling temp file and renamed
//! over the target, so readers never see a partial write.

use chrono::Utc;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::errors::{Result, SessionError};
use crate::types::{PersistedState, SessionState};

/// Durable store for session configurations
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the sessions file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the sessions file.
    ///
    /// A missing file is the first-run case: an empty state is written and
    /// returned. An unreadable or corrupt file is an error.
    pub async fn load(&self) -> Result<PersistedState> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No sessions file at {}, creating an empty one", self.path.display());
                let state = PersistedState::default();
                self.save(&state).await?;
                return Ok(state);
            }
            Err(e) => {
                return Err(SessionError::storage(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        let state: PersistedState = serde_json::from_slice(&bytes).map_err(|e| {
            SessionError::storage(format!("corrupt sessions file {}: {}", self.path.display(), e))
        })?;

        let mut seen = HashSet::new();
        for session in &state.sessions {
            if !seen.insert(session.id()) {
                return Err(SessionError::storage(format!(
                    "corrupt sessions file {}: duplicate session id {}",
                    self.path.display(),
                    session.id()
                )));
            }
        }

        debug!("Loaded {} sessions from {}", state.sessions.len(), self.path.display());
        Ok(state)
    }

    /// Replace the file contents with `state`
    pub async fn save(&self, state: &PersistedState) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                SessionError::storage(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }

        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| SessionError::storage(format!("failed to serialize sessions: {}", e)))?;

        let tmp = self.temp_path();
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| SessionError::storage(format!("failed to write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            SessionError::storage(format!("failed to replace {}: {}", self.path.display(), e))
        })?;

        debug!("Saved {} sessions to {}", state.sessions.len(), self.path.display());
        Ok(())
    }

    /// Copy of `state` with `updated_at` set to now
    pub fn touch_session(state: &SessionState) -> SessionState {
        SessionState {
            updated_at: Utc::now(),
            ..state.clone()
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "sessions.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
