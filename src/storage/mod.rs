//! Storage layer for graft.
//!
//! The state ledger, content hashing, the project lock and the backup area.

pub mod backup;
pub mod hash;
pub mod lock;
pub mod state;

pub use backup::{BackupArea, BackupEntry, BackupManifest};
pub use hash::{compute_hash, hash_bytes};
pub use lock::{LockHolder, ProjectLock};
pub use state::{
    AppliedSkill, CustomModification, FileStateStore, MemoryStateStore, SCHEMA_VERSION,
    StateRecord, StateStore,
};
