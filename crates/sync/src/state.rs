//! Persisted agent state (`state.json`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use wallstream_content_store::is_valid_digest;

/// File name of the state record inside the agent's cache directory.
pub const STATE_FILE_NAME: &str = "state.json";

/// Errors from loading or saving agent state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Last wallpaper an agent applied (subscriber) or published (publisher).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    /// SHA-256 hex digest; empty until the first successful cycle.
    #[serde(default)]
    pub last_hash: String,
    /// Cached file backing `last_hash`.
    #[serde(default)]
    pub path: PathBuf,
    /// Unix seconds of the last save.
    #[serde(default)]
    pub timestamp: i64,
}

impl AgentState {
    /// Returns `true` if nothing was applied yet.
    pub fn is_empty(&self) -> bool {
        self.last_hash.is_empty()
    }

    /// Returns `true` if `hash` is the recorded digest.
    pub fn matches(&self, hash: &str) -> bool {
        !self.last_hash.is_empty() && self.last_hash.eq_ignore_ascii_case(hash)
    }

    /// Returns `true` if the cached file backing this state is still on disk.
    pub fn cached_file_present(&self) -> bool {
        !self.path.as_os_str().is_empty() && self.path.is_file()
    }
}

/// Reads and writes [`AgentState`] at a fixed location.
///
/// The file is owned by a single agent process; writes are last-write-wins.
#[derive(Debug, Clone)]
pub struct StateManager {
    path: PathBuf,
}

impl StateManager {
    /// Creates a manager storing `state.json` in `dir` (created if missing).
    pub fn new(dir: &Path) -> Result<Self, StateError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join(STATE_FILE_NAME),
        })
    }

    /// Path of the state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the state.
    ///
    /// A missing file yields the empty state. A corrupt file, or one holding a
    /// malformed digest, is logged and also yields the empty state.
    pub fn load(&self) -> Result<AgentState, StateError> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no state file, starting empty");
                return Ok(AgentState::default());
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice::<AgentState>(&data) {
            Ok(state) if state.is_empty() || is_valid_digest(&state.last_hash) => {
                debug!(path = %self.path.display(), hash = %state.last_hash, "state loaded");
                Ok(state)
            }
            Ok(state) => {
                warn!(
                    path = %self.path.display(),
                    hash = %state.last_hash,
                    "state file holds a malformed digest, resetting"
                );
                Ok(AgentState::default())
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "state file is corrupt, resetting");
                Ok(AgentState::default())
            }
        }
    }

    /// Stamps `state.timestamp` with the current time and writes it to disk.
    pub fn save(&self, state: &mut AgentState) -> Result<(), StateError> {
        state.timestamp = wallstream_protocol::unix_timestamp();
        let data = serde_json::to_vec_pretty(state)?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &data)?;
        std::fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), hash = %state.last_hash, "state saved");
        Ok(())
    }
}
