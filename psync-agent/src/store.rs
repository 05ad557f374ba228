//! JSON state file holding tracked policies between runs.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

use crate::record::TrackedPolicy;

/// Current state file format.
pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Invalid state file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported state file version {0} (expected {expected})", expected = STATE_VERSION)]
    UnsupportedVersion(u32),
}

/// Tracked policies keyed by manifest key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub version: u32,
    #[serde(default)]
    pub policies: BTreeMap<String, TrackedPolicy>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            policies: BTreeMap::new(),
        }
    }
}

/// File-backed store for [`SyncState`].
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the state; a missing file is an empty state.
    pub async fn load(&self) -> Result<SyncState, StoreError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No state file, starting empty");
                return Ok(SyncState::default());
            }
            Err(e) => return Err(self.io_error(e)),
        };

        let state: SyncState = serde_json::from_str(&content)?;
        if state.version != STATE_VERSION {
            return Err(StoreError::UnsupportedVersion(state.version));
        }
        Ok(state)
    }

    /// Write the state to a temporary sibling file and rename it into place.
    pub async fn save(&self, state: &SyncState) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("tmp");

        fs::write(&tmp, json).await.map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        debug!(path = %self.path.display(), policies = state.policies.len(), "State saved");
        Ok(())
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}
