//! Connection Profiles
//!
//! Saved server endpoints and their durable persistence.

pub mod profile;
pub mod storage;
pub mod store;

pub use profile::{ConnectionProfile, ProfileKey, DEFAULT_PATH};
pub use storage::{
    FileProfileStorage, MemoryProfileStorage, PersistedProfiles, ProfileStorage, StoreError,
};
pub use store::{ConnectionProfileStore, PROFILE_CAPACITY};
