//! Three-way conflict detection and merge over JSON state trees.
//!
//! Offline edits and remote saves can diverge; this module finds where and
//! decides what survives. Detection compares local and remote against a
//! common base: a field is a conflict only when both sides changed it. A
//! two-way comparison (no base) cannot attribute changes, so it never
//! reports conflicts.

use std::collections::{BTreeSet, HashMap};

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::{StateError, StateResult, now_ms};

/// What kind of divergence a [`Conflict`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Both sides changed the same leaf to different values.
    Value,
    /// The sides disagree on the JSON type at this path.
    TypeMismatch,
    /// Arrays of different lengths; flagged wholesale, not element-wise.
    ArrayLength,
    /// One side removed a key the base had while the other kept or edited it.
    Deletion,
}

/// One divergence between local and remote state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Key path from the root; array indices are rendered as decimal strings.
    pub path: Vec<String>,
    pub kind: ConflictKind,
    pub local: Option<Value>,
    pub remote: Option<Value>,
    pub base: Option<Value>,
}

impl Conflict {
    /// Dot-joined path for log and error messages.
    pub fn path_display(&self) -> String {
        if self.path.is_empty() {
            "<root>".to_string()
        } else {
            self.path.join(".")
        }
    }
}

/// How a resolution run decides between the two sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Take the local tree unchanged.
    LocalWins,
    /// Take the remote tree unchanged.
    RemoteWins,
    /// Structural merge; conflicting leaves fall to timestamps, then to the
    /// configured [`MergeDefault`].
    Merge,
    /// Refuse to auto-resolve: any conflict is an error carrying the list.
    Manual,
}

/// Tie-break for merge when timestamps are missing or equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeDefault {
    #[default]
    PreferLocal,
    PreferRemote,
}

/// One entry of the resolver's history, kept even for zero-conflict runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionRecord {
    pub timestamp_ms: u64,
    pub strategy: ResolutionStrategy,
    pub conflicts: usize,
}

/// Per-kind override consulted before the built-in merge policy. Returning
/// `None` falls back to the default handling.
pub type CustomResolver = Box<dyn Fn(&Conflict) -> Option<Value>>;

/// Find every path where both sides diverged from the base.
///
/// Identical subtrees short-circuit. Without a base this returns an empty
/// list: one-sided attribution is impossible, and merge policy alone decides.
pub fn detect_conflicts(local: &Value, remote: &Value, base: Option<&Value>) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    diff_node(&mut Vec::new(), local, remote, base, &mut conflicts);
    conflicts
}

fn diff_node(
    path: &mut Vec<String>,
    local: &Value,
    remote: &Value,
    base: Option<&Value>,
    out: &mut Vec<Conflict>,
) {
    if local == remote {
        return;
    }
    // A side equal to the base did not change; the other side's edit stands.
    if let Some(b) = base {
        if b == local || b == remote {
            return;
        }
    }

    match (local, remote) {
        (Value::Object(l), Value::Object(r)) => {
            let keys: BTreeSet<&String> = l.keys().chain(r.keys()).collect();
            for key in keys {
                let base_field = base.and_then(|b| b.get(key.as_str()));
                match (l.get(key.as_str()), r.get(key.as_str())) {
                    (Some(lv), Some(rv)) => {
                        path.push(key.clone());
                        diff_node(path, lv, rv, base_field, out);
                        path.pop();
                    }
                    (Some(lv), None) => {
                        // Missing without a base key is a local addition.
                        if base_field.is_some() {
                            path.push(key.clone());
                            out.push(conflict_at(
                                path,
                                ConflictKind::Deletion,
                                Some(lv),
                                None,
                                base_field,
                            ));
                            path.pop();
                        }
                    }
                    (None, Some(rv)) => {
                        if base_field.is_some() {
                            path.push(key.clone());
                            out.push(conflict_at(
                                path,
                                ConflictKind::Deletion,
                                None,
                                Some(rv),
                                base_field,
                            ));
                            path.pop();
                        }
                    }
                    (None, None) => unreachable!("key came from one of the maps"),
                }
            }
        }
        (Value::Array(l), Value::Array(r)) => {
            if l.len() != r.len() {
                if base.is_some() {
                    out.push(conflict_at(
                        path,
                        ConflictKind::ArrayLength,
                        Some(local),
                        Some(remote),
                        base,
                    ));
                }
                return;
            }
            for (i, (lv, rv)) in l.iter().zip(r.iter()).enumerate() {
                let base_elem = base.and_then(|b| b.get(i));
                path.push(i.to_string());
                diff_node(path, lv, rv, base_elem, out);
                path.pop();
            }
        }
        _ => {
            if base.is_none() {
                return;
            }
            let kind = if json_type(local) == json_type(remote) {
                ConflictKind::Value
            } else {
                ConflictKind::TypeMismatch
            };
            out.push(conflict_at(path, kind, Some(local), Some(remote), base));
        }
    }
}

fn conflict_at(
    path: &[String],
    kind: ConflictKind,
    local: Option<&Value>,
    remote: Option<&Value>,
    base: Option<&Value>,
) -> Conflict {
    Conflict {
        path: path.to_vec(),
        kind,
        local: local.cloned(),
        remote: remote.cloned(),
        base: base.cloned(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Structural patch combining both sides, with explicit marker objects at
/// genuinely divergent leaves so callers can surface them for review.
///
/// Markers have the shape
/// `{"__conflict": true, "local": .., "remote": .., "base": ..}`.
/// Divergences without a base value carry the local side, matching the
/// resolver's default policy.
pub fn create_merge_patch(base: Option<&Value>, local: &Value, remote: &Value) -> Value {
    if local == remote {
        return local.clone();
    }
    if let Some(b) = base {
        if b == local {
            return remote.clone();
        }
        if b == remote {
            return local.clone();
        }
    }

    match (local, remote) {
        (Value::Object(l), Value::Object(r)) => {
            let keys: BTreeSet<&String> = l.keys().chain(r.keys()).collect();
            let mut merged = Map::new();
            for key in keys {
                let base_field = base.and_then(|b| b.get(key.as_str()));
                match (l.get(key.as_str()), r.get(key.as_str())) {
                    (Some(lv), Some(rv)) => {
                        merged.insert(key.clone(), create_merge_patch(base_field, lv, rv));
                    }
                    // Deletions keep the surviving value.
                    (Some(lv), None) => {
                        merged.insert(key.clone(), lv.clone());
                    }
                    (None, Some(rv)) => {
                        merged.insert(key.clone(), rv.clone());
                    }
                    (None, None) => unreachable!("key came from one of the maps"),
                }
            }
            Value::Object(merged)
        }
        (Value::Array(l), Value::Array(r)) if l.len() == r.len() => {
            let merged = l
                .iter()
                .zip(r.iter())
                .enumerate()
                .map(|(i, (lv, rv))| create_merge_patch(base.and_then(|b| b.get(i)), lv, rv))
                .collect();
            Value::Array(merged)
        }
        _ => {
            if base.is_some() {
                json!({
                    "__conflict": true,
                    "local": local.clone(),
                    "remote": remote.clone(),
                    "base": base.cloned().unwrap_or(Value::Null),
                })
            } else {
                local.clone()
            }
        }
    }
}

/// Applies a [`ResolutionStrategy`] to a local/remote pair and keeps a
/// history of every run.
pub struct ConflictResolver {
    merge_default: MergeDefault,
    local_timestamp_ms: Option<u64>,
    remote_timestamp_ms: Option<u64>,
    custom: HashMap<ConflictKind, CustomResolver>,
    history: Vec<ResolutionRecord>,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(MergeDefault::default())
    }
}

impl ConflictResolver {
    pub fn new(merge_default: MergeDefault) -> Self {
        Self {
            merge_default,
            local_timestamp_ms: None,
            remote_timestamp_ms: None,
            custom: HashMap::new(),
            history: Vec::new(),
        }
    }

    pub fn set_merge_default(&mut self, merge_default: MergeDefault) {
        self.merge_default = merge_default;
    }

    /// Last-modified times for the two sides. When both are known and
    /// unequal, the newer side wins value conflicts during merge.
    pub fn set_timestamps(&mut self, local_ms: Option<u64>, remote_ms: Option<u64>) {
        self.local_timestamp_ms = local_ms;
        self.remote_timestamp_ms = remote_ms;
    }

    /// Override handling for one conflict kind. The resolver is consulted
    /// before timestamps and the merge default; returning `None` falls back.
    pub fn register_custom_resolver(&mut self, kind: ConflictKind, resolver: CustomResolver) {
        self.custom.insert(kind, resolver);
    }

    pub fn history(&self) -> &[ResolutionRecord] {
        &self.history
    }

    /// Resolve `local` against `remote` under the given strategy.
    ///
    /// `Manual` succeeds only when the trees have no conflicts (the merge is
    /// then unambiguous); otherwise it returns
    /// [`StateError::ManualResolutionRequired`] with the full list.
    pub fn resolve(
        &mut self,
        local: &Value,
        remote: &Value,
        base: Option<&Value>,
        strategy: ResolutionStrategy,
    ) -> StateResult<Value> {
        let conflicts = detect_conflicts(local, remote, base);
        self.history.push(ResolutionRecord {
            timestamp_ms: now_ms(),
            strategy,
            conflicts: conflicts.len(),
        });
        if !conflicts.is_empty() {
            debug!(
                "resolving {} conflict(s) with {:?}, first at {}",
                conflicts.len(),
                strategy,
                conflicts[0].path_display()
            );
        }

        match strategy {
            ResolutionStrategy::LocalWins => Ok(local.clone()),
            ResolutionStrategy::RemoteWins => Ok(remote.clone()),
            ResolutionStrategy::Merge => Ok(self.merge_node(&mut Vec::new(), local, remote, base)),
            ResolutionStrategy::Manual => {
                if conflicts.is_empty() {
                    Ok(self.merge_node(&mut Vec::new(), local, remote, base))
                } else {
                    Err(StateError::ManualResolutionRequired {
                        message: format!(
                            "{} conflict(s), first at {}",
                            conflicts.len(),
                            conflicts[0].path_display()
                        ),
                        conflicts,
                    })
                }
            }
        }
    }

    fn merge_node(
        &self,
        path: &mut Vec<String>,
        local: &Value,
        remote: &Value,
        base: Option<&Value>,
    ) -> Value {
        if local == remote {
            return local.clone();
        }
        if let Some(b) = base {
            if b == local {
                return remote.clone();
            }
            if b == remote {
                return local.clone();
            }
        }

        match (local, remote) {
            (Value::Object(l), Value::Object(r)) => {
                let keys: BTreeSet<&String> = l.keys().chain(r.keys()).collect();
                let mut merged = Map::new();
                for key in keys {
                    let base_field = base.and_then(|b| b.get(key.as_str()));
                    match (l.get(key.as_str()), r.get(key.as_str())) {
                        (Some(lv), Some(rv)) => {
                            path.push(key.clone());
                            let value = self.merge_node(path, lv, rv, base_field);
                            path.pop();
                            merged.insert(key.clone(), value);
                        }
                        // Additions and deletion conflicts both keep the
                        // surviving value.
                        (Some(lv), None) => {
                            merged.insert(key.clone(), lv.clone());
                        }
                        (None, Some(rv)) => {
                            merged.insert(key.clone(), rv.clone());
                        }
                        (None, None) => unreachable!("key came from one of the maps"),
                    }
                }
                Value::Object(merged)
            }
            (Value::Array(l), Value::Array(r)) => {
                if l.len() == r.len() {
                    let merged = l
                        .iter()
                        .zip(r.iter())
                        .enumerate()
                        .map(|(i, (lv, rv))| {
                            path.push(i.to_string());
                            let value = self.merge_node(path, lv, rv, base.and_then(|b| b.get(i)));
                            path.pop();
                            value
                        })
                        .collect();
                    return Value::Array(merged);
                }
                let conflict =
                    conflict_at(path, ConflictKind::ArrayLength, Some(local), Some(remote), base);
                if let Some(value) = self.run_custom(&conflict) {
                    return value;
                }
                // Concatenate, deduplicating remote elements already present
                // locally by deep equality.
                let mut merged = l.clone();
                for elem in r {
                    if !merged.contains(elem) {
                        merged.push(elem.clone());
                    }
                }
                Value::Array(merged)
            }
            _ => {
                let kind = if json_type(local) == json_type(remote) {
                    ConflictKind::Value
                } else {
                    ConflictKind::TypeMismatch
                };
                let conflict = conflict_at(path, kind, Some(local), Some(remote), base);
                if let Some(value) = self.run_custom(&conflict) {
                    return value;
                }
                self.pick_side(local, remote)
            }
        }
    }

    fn run_custom(&self, conflict: &Conflict) -> Option<Value> {
        self.custom.get(&conflict.kind).and_then(|resolver| resolver(conflict))
    }

    fn pick_side(&self, local: &Value, remote: &Value) -> Value {
        if let (Some(lt), Some(rt)) = (self.local_timestamp_ms, self.remote_timestamp_ms) {
            if lt != rt {
                return if lt > rt { local.clone() } else { remote.clone() };
            }
        }
        match self.merge_default {
            MergeDefault::PreferLocal => local.clone(),
            MergeDefault::PreferRemote => remote.clone(),
        }
    }
}
