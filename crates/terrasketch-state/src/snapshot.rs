//! Checksummed snapshots of editor state over a key-value store.
//!
//! Every snapshot payload is the base64 of the state's JSON, paired with a
//! SHA-256 checksum of that encoded payload. Restores verify the checksum
//! before decoding; a mismatch is a hard error, never a silent fallback.
//! History is bounded per state kind and kept as one JSON blob under
//! [`SNAPSHOT_STORE_KEY`].

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

#[cfg(not(target_arch = "wasm32"))]
use std::time::Instant;
#[cfg(target_arch = "wasm32")]
use web_time::Instant;

use base64::{Engine, engine::general_purpose::STANDARD};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::schema::{SchemaRegistry, StateKind};
use crate::store::KeyValueStore;
use crate::{StateError, StateResult, now_ms};

/// Store key the full snapshot history is persisted under.
pub const SNAPSHOT_STORE_KEY: &str = "state-snapshots";

/// Format version written into new snapshots.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Bounded history length per state kind.
pub const DEFAULT_MAX_SNAPSHOTS_PER_KIND: usize = 20;

/// One stored snapshot. `payload` is base64 of the state JSON and
/// `checksum` is the hex SHA-256 of `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub timestamp_ms: u64,
    pub kind: StateKind,
    pub payload: String,
    pub version: u32,
    pub checksum: String,
}

fn checksum_of(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

/// Supplies the current state for an auto-snapshot registration.
pub type SnapshotProvider = Box<dyn Fn() -> Value>;

struct AutoSnapshot {
    interval: Duration,
    last_run: Option<Instant>,
    provider: SnapshotProvider,
}

/// Creates, persists and restores snapshots over a [`KeyValueStore`].
///
/// Writes go through schema validation first; invalid state is repaired by
/// defaults before it is encoded, so the history only ever holds state that
/// passes its schema.
pub struct SnapshotManager<S: KeyValueStore> {
    store: S,
    registry: SchemaRegistry,
    snapshots: Vec<Snapshot>,
    max_per_kind: usize,
    queue: VecDeque<(StateKind, Value)>,
    processing: bool,
    auto: HashMap<StateKind, AutoSnapshot>,
    destroyed: bool,
}

impl<S: KeyValueStore> SnapshotManager<S> {
    pub fn new(store: S) -> Self {
        Self::with_registry(store, SchemaRegistry::with_builtins())
    }

    /// Manager with a caller-extended schema registry.
    pub fn with_registry(store: S, registry: SchemaRegistry) -> Self {
        let snapshots = Self::load(&store);
        Self {
            store,
            registry,
            snapshots,
            max_per_kind: DEFAULT_MAX_SNAPSHOTS_PER_KIND,
            queue: VecDeque::new(),
            processing: false,
            auto: HashMap::new(),
            destroyed: false,
        }
    }

    pub fn set_max_per_kind(&mut self, max_per_kind: usize) {
        self.max_per_kind = max_per_kind.max(1);
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SchemaRegistry {
        &mut self.registry
    }

    fn load(store: &S) -> Vec<Snapshot> {
        match store.get_item(SNAPSHOT_STORE_KEY) {
            Ok(Some(blob)) => match serde_json::from_str(&blob) {
                Ok(snapshots) => snapshots,
                Err(e) => {
                    warn!("snapshot history unreadable, starting empty: {e}");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("snapshot history unavailable, starting empty: {e}");
                Vec::new()
            }
        }
    }

    fn persist(&mut self) -> StateResult<()> {
        let blob = serde_json::to_string(&self.snapshots)?;
        self.store.set_item(SNAPSHOT_STORE_KEY, &blob)
    }

    /// Validate, encode and store a snapshot of `state`.
    ///
    /// State that fails its schema is repaired by defaults first; only an
    /// unrepairable value is an error. The oldest snapshot of the kind is
    /// evicted once the per-kind bound is exceeded.
    pub fn create_snapshot(&mut self, kind: StateKind, state: &Value) -> StateResult<Snapshot> {
        if self.destroyed {
            return Err(StateError::Storage("snapshot manager destroyed".to_string()));
        }
        let state = match self.registry.validate(&kind, state) {
            Ok(()) => state.clone(),
            Err(e) => {
                debug!("repairing {kind} state before snapshot: {e}");
                let repaired = self.registry.repair(&kind, state)?;
                self.registry.validate(&kind, &repaired)?;
                repaired
            }
        };

        let payload = STANDARD.encode(serde_json::to_string(&state)?);
        let checksum = checksum_of(&payload);
        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            timestamp_ms: now_ms(),
            kind: kind.clone(),
            payload,
            version: SNAPSHOT_VERSION,
            checksum,
        };
        self.snapshots.push(snapshot.clone());

        let count = self.snapshots.iter().filter(|s| s.kind == kind).count();
        if count > self.max_per_kind {
            let mut to_drop = count - self.max_per_kind;
            self.snapshots.retain(|s| {
                if to_drop > 0 && s.kind == kind {
                    to_drop -= 1;
                    false
                } else {
                    true
                }
            });
        }

        self.persist()?;
        debug!("snapshot {} stored for {kind}", snapshot.id);
        Ok(snapshot)
    }

    /// Verify, decode and validate a snapshot back into state.
    pub fn restore_snapshot(&self, snapshot: &Snapshot) -> StateResult<Value> {
        let actual = checksum_of(&snapshot.payload);
        if actual != snapshot.checksum {
            return Err(StateError::ChecksumMismatch {
                id: snapshot.id.to_string(),
                expected: snapshot.checksum.clone(),
                actual,
            });
        }
        let bytes = STANDARD
            .decode(&snapshot.payload)
            .map_err(|e| StateError::Decode(format!("snapshot {}: {e}", snapshot.id)))?;
        let text = String::from_utf8(bytes)
            .map_err(|e| StateError::Decode(format!("snapshot {}: {e}", snapshot.id)))?;
        let state: Value = serde_json::from_str(&text)?;
        self.registry.validate(&snapshot.kind, &state)?;
        Ok(state)
    }

    /// Newest restorable state for a kind. Corrupt entries are skipped with
    /// a warning, not deleted.
    pub fn get_latest_snapshot(&self, kind: &StateKind) -> Option<Value> {
        for snapshot in self.snapshots.iter().rev().filter(|s| &s.kind == kind) {
            match self.restore_snapshot(snapshot) {
                Ok(state) => return Some(state),
                Err(e) => warn!("skipping snapshot {}: {e}", snapshot.id),
            }
        }
        None
    }

    /// Stored snapshots of a kind, oldest first.
    pub fn snapshots_for(&self, kind: &StateKind) -> Vec<&Snapshot> {
        self.snapshots.iter().filter(|s| &s.kind == kind).collect()
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Queue a snapshot for the next [`process_queue`](Self::process_queue).
    pub fn enqueue_snapshot(&mut self, kind: StateKind, state: Value) {
        if self.destroyed {
            return;
        }
        self.queue.push_back((kind, state));
    }

    /// Drain the queue in FIFO order. Per-task failures are logged and
    /// draining continues. Reentrant calls are no-ops.
    pub fn process_queue(&mut self) {
        if self.processing || self.destroyed {
            return;
        }
        self.processing = true;
        while let Some((kind, state)) = self.queue.pop_front() {
            if let Err(e) = self.create_snapshot(kind.clone(), &state) {
                warn!("queued snapshot for {kind} failed: {e}");
            }
        }
        self.processing = false;
    }

    /// Snapshot a kind on an interval, pulling state from `provider` each
    /// time. Registering a kind again replaces the prior registration.
    pub fn register_auto_snapshot(
        &mut self,
        kind: StateKind,
        interval: Duration,
        provider: SnapshotProvider,
    ) {
        if self.destroyed {
            return;
        }
        self.auto.insert(kind, AutoSnapshot { interval, last_run: None, provider });
    }

    pub fn unregister_auto_snapshot(&mut self, kind: &StateKind) {
        self.auto.remove(kind);
    }

    /// Fire due auto-snapshot providers through the queue. The host loop
    /// calls this once per frame or on its own cadence; the first tick arms
    /// each registration without firing.
    pub fn tick(&mut self, now: Instant) {
        if self.destroyed {
            return;
        }
        let mut due: Vec<(StateKind, Value)> = Vec::new();
        for (kind, auto) in &mut self.auto {
            match auto.last_run {
                None => auto.last_run = Some(now),
                Some(last) if now.duration_since(last) >= auto.interval => {
                    auto.last_run = Some(now);
                    due.push((kind.clone(), (auto.provider)()));
                }
                Some(_) => {}
            }
        }
        if !due.is_empty() {
            for (kind, state) in due {
                self.queue.push_back((kind, state));
            }
            self.process_queue();
        }
    }

    /// Drop snapshots older than `max_age` and persist the trimmed history.
    pub fn prune_older_than(&mut self, max_age: Duration) -> StateResult<usize> {
        let cutoff = now_ms().saturating_sub(max_age.as_millis() as u64);
        let before = self.snapshots.len();
        self.snapshots.retain(|s| s.timestamp_ms >= cutoff);
        let pruned = before - self.snapshots.len();
        if pruned > 0 {
            self.persist()?;
        }
        Ok(pruned)
    }

    /// Clear the queue and registrations; further writes are refused.
    pub fn destroy(&mut self) {
        self.queue.clear();
        self.auto.clear();
        self.destroyed = true;
    }
}
