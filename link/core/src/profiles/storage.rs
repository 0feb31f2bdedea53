//! Durable profile persistence
//!
//! The store hands its full state to a [`ProfileStorage`] after every mutation.
//! The file backend writes a JSON document next to the target and renames it
//! into place so a crash never leaves a half-written list behind.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::profile::ConnectionProfile;

/// Errors from the persistence backend
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed
    #[error("Profile storage I/O failed at {path}: {source}")]
    Io {
        /// File that was accessed
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// The stored document could not be (de)serialized
    #[error("Profile storage is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persisted form of the store: MRU-ordered list plus the current pointer
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedProfiles {
    /// Profiles, most recently used first
    pub profiles: Vec<ConnectionProfile>,
    /// Current profile (may no longer be in `profiles`)
    pub current: Option<ConnectionProfile>,
}

/// Durable key-value persistence for the profile store
pub trait ProfileStorage: Send + Sync {
    /// Load the persisted state, `None` when nothing has been stored yet
    fn load(&self) -> Result<Option<PersistedProfiles>, StoreError>;

    /// Replace the persisted state
    fn persist(&self, state: &PersistedProfiles) -> Result<(), StoreError>;
}

/// JSON file storage
#[derive(Debug, Clone)]
pub struct FileProfileStorage {
    path: PathBuf,
}

impl FileProfileStorage {
    /// Store profiles at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$XDG_DATA_HOME/agent-link/profiles.json`
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|p| p.join("agent-link").join("profiles.json"))
    }

    /// Backing file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl ProfileStorage for FileProfileStorage {
    fn load(&self) -> Result<Option<PersistedProfiles>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn persist(&self, state: &PersistedProfiles) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let json = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))
    }
}

/// In-memory storage, shared between store instances to simulate restarts
#[derive(Debug, Default)]
pub struct MemoryProfileStorage {
    state: Mutex<Option<PersistedProfiles>>,
}

impl MemoryProfileStorage {
    /// Empty storage
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// What was last persisted
    pub fn snapshot(&self) -> Option<PersistedProfiles> {
        self.state.lock().clone()
    }
}

impl ProfileStorage for MemoryProfileStorage {
    fn load(&self) -> Result<Option<PersistedProfiles>, StoreError> {
        Ok(self.state.lock().clone())
    }

    fn persist(&self, state: &PersistedProfiles) -> Result<(), StoreError> {
        *self.state.lock() = Some(state.clone());
        Ok(())
    }
}
