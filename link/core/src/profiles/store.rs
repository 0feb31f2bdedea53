//! Connection Profile Store
//!
//! Bounded, deduplicated list of saved endpoints ordered most-recently-used
//! first, plus a "current profile" pointer.
//!
//! # Invariants
//!
//! - At most one profile per `(host, port)` key
//! - `len() <= capacity`; inserting past capacity evicts from the tail
//! - Removing the current profile clears the pointer even if other entries remain
//!
//! # Thread Safety
//!
//! All state lives behind a single `RwLock`. Mutations persist while still
//! holding the write lock, so the persisted order always matches the order in
//! which mutations were applied.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::profile::{ConnectionProfile, ProfileKey};
use super::storage::{PersistedProfiles, ProfileStorage};
use crate::transport::config::Endpoint;

/// Maximum number of saved profiles
pub const PROFILE_CAPACITY: usize = 5;

/// Saved connection profiles with recency ordering and eviction
pub struct ConnectionProfileStore {
    state: RwLock<PersistedProfiles>,
    storage: Arc<dyn ProfileStorage>,
    capacity: usize,
    last_persist_error: Mutex<Option<String>>,
}

impl ConnectionProfileStore {
    /// Open the store, loading any previously persisted state
    ///
    /// Unreadable or corrupt state is logged and replaced by an empty store.
    pub fn open(storage: Arc<dyn ProfileStorage>) -> Self {
        let mut state = match storage.load() {
            Ok(Some(state)) => state,
            Ok(None) => PersistedProfiles::default(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load saved profiles, starting empty");
                PersistedProfiles::default()
            }
        };

        // Files written by hand may violate the invariants
        dedup_by_key(&mut state.profiles);
        state.profiles.truncate(PROFILE_CAPACITY);

        tracing::debug!(count = state.profiles.len(), "Profile store opened");

        Self {
            state: RwLock::new(state),
            storage,
            capacity: PROFILE_CAPACITY,
            last_persist_error: Mutex::new(None),
        }
    }

    /// Save a profile: replace any entry with the same key, move it to the
    /// front, evict past capacity and make it current
    pub fn save(&self, profile: ConnectionProfile) {
        self.save_if(profile, || true);
    }

    /// Save a profile only if `still_wanted` holds once the write lock is taken
    ///
    /// Lets a caller that persists off its own lock drop a save that has been
    /// overtaken: any later save queues behind this one on the same lock.
    /// Returns whether the profile was saved.
    pub fn save_if(
        &self,
        mut profile: ConnectionProfile,
        still_wanted: impl FnOnce() -> bool,
    ) -> bool {
        let key = profile.key();

        let mut state = self.state.write();
        if !still_wanted() {
            tracing::debug!(profile = %key, "Skipped stale profile save");
            return false;
        }
        profile.touch();
        state.profiles.retain(|p| p.key() != key);
        state.profiles.insert(0, profile.clone());
        if state.profiles.len() > self.capacity {
            let evicted = state.profiles.split_off(self.capacity);
            for old in &evicted {
                tracing::debug!(profile = %old.key(), "Evicted oldest profile");
            }
        }
        state.current = Some(profile);

        tracing::info!(profile = %key, "Saved connection profile");
        self.persist(&state);
        true
    }

    /// Mark a profile as current
    ///
    /// If the profile is already saved its entry is refreshed and moved to the
    /// front. Unsaved profiles become current without being inserted.
    pub fn set_current(&self, mut profile: ConnectionProfile) {
        let key = profile.key();

        let mut state = self.state.write();
        if let Some(pos) = state.profiles.iter().position(|p| p.key() == key) {
            state.profiles.remove(pos);
            profile.touch();
            state.profiles.insert(0, profile.clone());
        }
        state.current = Some(profile);

        tracing::debug!(profile = %key, "Current profile set");
        self.persist(&state);
    }

    /// Remove a profile by key, clearing `current` if it pointed at it
    pub fn remove(&self, key: &ProfileKey) {
        let mut state = self.state.write();
        let before = state.profiles.len();
        state.profiles.retain(|p| &p.key() != key);

        let was_current = state.current.as_ref().is_some_and(|c| &c.key() == key);
        if was_current {
            state.current = None;
        }

        if before == state.profiles.len() && !was_current {
            tracing::debug!(profile = %key, "Remove of unknown profile ignored");
            return;
        }

        tracing::info!(profile = %key, was_current, "Removed connection profile");
        self.persist(&state);
    }

    /// Remove every profile and clear `current`
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.profiles.clear();
        state.current = None;

        tracing::info!("Cleared all connection profiles");
        self.persist(&state);
    }

    /// Endpoint for the current profile, if any
    #[must_use]
    pub fn load_current_as_config(&self) -> Option<Endpoint> {
        self.state.read().current.as_ref().map(ConnectionProfile::endpoint)
    }

    /// Current profile, if any
    #[must_use]
    pub fn current(&self) -> Option<ConnectionProfile> {
        self.state.read().current.clone()
    }

    /// Snapshot of saved profiles, most recent first
    #[must_use]
    pub fn profiles(&self) -> Vec<ConnectionProfile> {
        self.state.read().profiles.clone()
    }

    /// Look up a saved profile by key
    #[must_use]
    pub fn get(&self, key: &ProfileKey) -> Option<ConnectionProfile> {
        self.state
            .read()
            .profiles
            .iter()
            .find(|p| &p.key() == key)
            .cloned()
    }

    /// Number of saved profiles
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().profiles.len()
    }

    /// Whether no profiles are saved
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().profiles.is_empty()
    }

    /// Maximum number of saved profiles
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Last persistence failure, cleared by the next successful write
    #[must_use]
    pub fn last_persist_error(&self) -> Option<String> {
        self.last_persist_error.lock().clone()
    }

    fn persist(&self, state: &PersistedProfiles) {
        let mut last = self.last_persist_error.lock();
        match self.storage.persist(state) {
            Ok(()) => *last = None,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to persist connection profiles");
                *last = Some(e.to_string());
            }
        }
    }
}

impl std::fmt::Debug for ConnectionProfileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("ConnectionProfileStore")
            .field("profiles", &state.profiles.len())
            .field("current", &state.current.as_ref().map(ConnectionProfile::key))
            .finish()
    }
}

fn dedup_by_key(profiles: &mut Vec<ConnectionProfile>) {
    let mut seen = std::collections::HashSet::new();
    profiles.retain(|p| seen.insert(p.key()));
}
