//! Recovery ladder for corrupted live state.
//!
//! Three attempts, in order of how much user data each preserves: repair the
//! value in place against its schema, restore the newest valid snapshot, or
//! fall back to the kind's default state. The outcome reports each step
//! taken so callers can tell the user what was lost.

use log::{error, info, warn};
use serde_json::Value;

use crate::schema::StateKind;
use crate::snapshot::SnapshotManager;
use crate::store::KeyValueStore;
use crate::{StateError, StateResult};

/// Which rung of the ladder produced (or failed to produce) state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Missing or mistyped fields filled with schema defaults.
    SchemaRepair,
    /// Current value abandoned for the newest valid snapshot.
    SnapshotRestore,
    /// Everything abandoned for the kind's default state.
    DefaultReset,
}

/// How much was lost at a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RecoverySeverity {
    /// User data preserved.
    Info,
    /// Recent edits may be lost.
    Warning,
    /// All user data for this state was lost.
    Critical,
}

/// One attempted rung, successful or not.
#[derive(Debug, Clone)]
pub struct RecoveryStep {
    pub action: RecoveryAction,
    pub severity: RecoverySeverity,
    pub succeeded: bool,
    pub detail: String,
}

/// Recovered state plus the trail of steps that produced it.
#[derive(Debug, Clone)]
pub struct RecoveryOutcome {
    pub state: Value,
    pub steps: Vec<RecoveryStep>,
}

impl RecoveryOutcome {
    /// Severity of the step that actually produced the state.
    pub fn severity(&self) -> RecoverySeverity {
        self.steps
            .iter()
            .rev()
            .find(|s| s.succeeded)
            .map(|s| s.severity)
            .unwrap_or(RecoverySeverity::Critical)
    }
}

/// Recover usable state for `kind` from a corrupted value.
///
/// Errors only when no rung succeeds, which requires the kind to have no
/// registered schema.
pub fn recover<S: KeyValueStore>(
    kind: &StateKind,
    corrupt: &Value,
    snapshots: &SnapshotManager<S>,
) -> StateResult<RecoveryOutcome> {
    let mut steps = Vec::new();
    let registry = snapshots.registry();

    match registry.repair(kind, corrupt) {
        Ok(repaired) => {
            info!("{kind} state repaired in place");
            steps.push(RecoveryStep {
                action: RecoveryAction::SchemaRepair,
                severity: RecoverySeverity::Info,
                succeeded: true,
                detail: "invalid fields replaced with schema defaults".to_string(),
            });
            return Ok(RecoveryOutcome { state: repaired, steps });
        }
        Err(e) => {
            steps.push(RecoveryStep {
                action: RecoveryAction::SchemaRepair,
                severity: RecoverySeverity::Info,
                succeeded: false,
                detail: e.to_string(),
            });
        }
    }

    if let Some(state) = snapshots.get_latest_snapshot(kind) {
        warn!("{kind} state unrepairable, restored from snapshot");
        steps.push(RecoveryStep {
            action: RecoveryAction::SnapshotRestore,
            severity: RecoverySeverity::Warning,
            succeeded: true,
            detail: "restored newest valid snapshot; edits since then are lost".to_string(),
        });
        return Ok(RecoveryOutcome { state, steps });
    }
    steps.push(RecoveryStep {
        action: RecoveryAction::SnapshotRestore,
        severity: RecoverySeverity::Warning,
        succeeded: false,
        detail: "no valid snapshot available".to_string(),
    });

    match registry.default_state(kind) {
        Ok(state) => {
            error!("{kind} state reset to defaults, user data lost");
            steps.push(RecoveryStep {
                action: RecoveryAction::DefaultReset,
                severity: RecoverySeverity::Critical,
                succeeded: true,
                detail: "reset to the kind's default state".to_string(),
            });
            Ok(RecoveryOutcome { state, steps })
        }
        Err(e) => {
            error!("{kind} state unrecoverable: {e}");
            steps.push(RecoveryStep {
                action: RecoveryAction::DefaultReset,
                severity: RecoverySeverity::Critical,
                succeeded: false,
                detail: e.to_string(),
            });
            Err(StateError::Unrepairable {
                kind: kind.to_string(),
                reason: "no schema, snapshot, or default available".to_string(),
            })
        }
    }
}
