//! TerraSketch State Library
//!
//! Offline-first editor state management: three-way conflict detection and
//! merge, schema validation with repair-by-defaults, checksummed snapshots
//! over a key-value store, and a recovery ladder for corrupted live state.
//!
//! Rendering-path code elsewhere degrades gracefully; this crate is the
//! strict side of the house. Saved state that cannot be trusted is an
//! error, never silently accepted.

pub mod conflict;
pub mod recovery;
pub mod schema;
pub mod snapshot;
pub mod store;

use thiserror::Error;

pub use conflict::{
    Conflict, ConflictKind, ConflictResolver, MergeDefault, ResolutionRecord,
    ResolutionStrategy, create_merge_patch, detect_conflicts,
};
pub use recovery::{RecoveryAction, RecoveryOutcome, RecoverySeverity, RecoveryStep, recover};
pub use schema::{FieldKind, FieldSpec, SchemaRegistry, StateKind, StateSchema};
pub use snapshot::{SNAPSHOT_STORE_KEY, Snapshot, SnapshotManager};
pub use store::{KeyValueStore, MemoryStore};

#[cfg(not(target_arch = "wasm32"))]
pub use store::FileStore;

/// Errors from the state layer.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("checksum mismatch for snapshot {id}: expected {expected}, got {actual}")]
    ChecksumMismatch { id: String, expected: String, actual: String },

    #[error("schema validation failed for {kind}: {reason}")]
    SchemaValidation { kind: String, reason: String },

    #[error("state for {kind} cannot be repaired: {reason}")]
    Unrepairable { kind: String, reason: String },

    #[error("no schema registered for {0}")]
    UnknownKind(String),

    #[error("manual conflict resolution required: {message}")]
    ManualResolutionRequired { message: String, conflicts: Vec<Conflict> },

    #[error("snapshot decode failed: {0}")]
    Decode(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Result type for state operations.
pub type StateResult<T> = Result<T, StateError>;

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    #[cfg(not(target_arch = "wasm32"))]
    use std::time::{SystemTime, UNIX_EPOCH};
    #[cfg(target_arch = "wasm32")]
    use web_time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
