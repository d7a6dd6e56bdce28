//! Structural diffing of two recordings.
//!
//! The engine walks two JSON values and reports drift in the classic
//! deep-diff vocabulary: `values_changed`, `type_changes`,
//! `dictionary_item_added`/`removed` and `iterable_item_added`/`removed`,
//! with paths rendered like `root[0]['result']['table'][1]['b']`. Arrays
//! compare order-insensitively: items that match exactly cancel first,
//! leftovers pair up in index order and recurse, and surplus items are
//! reported as added or removed. An empty diff is `{}`.

use crate::config::RECORDER_ENV_VARS;
use crate::errors::RetraceError;
use crate::recorder::load_recording;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

// ── Deep diff ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    /// Exact rendered paths skipped entirely, subtrees included.
    pub exclude_paths: Vec<String>,
}

impl DiffOptions {
    fn excludes(&self, path: &str) -> bool {
        self.exclude_paths.iter().any(|p| p == path)
    }
}

#[derive(Default)]
struct DiffAcc {
    values_changed: Map<String, Value>,
    type_changes: Map<String, Value>,
    dictionary_item_added: Map<String, Value>,
    dictionary_item_removed: Map<String, Value>,
    iterable_item_added: Map<String, Value>,
    iterable_item_removed: Map<String, Value>,
}

impl DiffAcc {
    fn finish(self) -> Value {
        let mut out = Map::new();
        for (name, bucket) in [
            ("values_changed", self.values_changed),
            ("type_changes", self.type_changes),
            ("dictionary_item_added", self.dictionary_item_added),
            ("dictionary_item_removed", self.dictionary_item_removed),
            ("iterable_item_added", self.iterable_item_added),
            ("iterable_item_removed", self.iterable_item_removed),
        ] {
            if !bucket.is_empty() {
                out.insert(name.to_string(), Value::Object(bucket));
            }
        }
        Value::Object(out)
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) => {
            if n.is_f64() {
                "float"
            } else {
                "int"
            }
        }
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

/// Structural diff of `old` against `new`. Reported values are oriented the
/// way a regression reads: `new_value` is what the current run produced,
/// `old_value` what the baseline holds.
pub fn deep_diff(old: &Value, new: &Value, options: &DiffOptions) -> Value {
    let mut acc = DiffAcc::default();
    walk(&mut acc, "root", old, new, options);
    acc.finish()
}

fn walk(acc: &mut DiffAcc, path: &str, old: &Value, new: &Value, options: &DiffOptions) {
    if options.excludes(path) || old == new {
        return;
    }
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (key, old_value) in old_map {
                let child = format!("{path}['{key}']");
                match new_map.get(key) {
                    Some(new_value) => walk(acc, &child, old_value, new_value, options),
                    None => {
                        if !options.excludes(&child) {
                            acc.dictionary_item_removed.insert(child, old_value.clone());
                        }
                    }
                }
            }
            for (key, new_value) in new_map {
                if !old_map.contains_key(key) {
                    let child = format!("{path}['{key}']");
                    if !options.excludes(&child) {
                        acc.dictionary_item_added.insert(child, new_value.clone());
                    }
                }
            }
        }
        (Value::Array(old_items), Value::Array(new_items)) => {
            diff_arrays(acc, path, old_items, new_items, options);
        }
        _ if kind_of(old) != kind_of(new) => {
            acc.type_changes.insert(
                path.to_string(),
                json!({
                    "old_type": kind_of(old),
                    "new_type": kind_of(new),
                    "old_value": old.clone(),
                    "new_value": new.clone(),
                }),
            );
        }
        _ => {
            acc.values_changed.insert(
                path.to_string(),
                json!({
                    "new_value": new.clone(),
                    "old_value": old.clone(),
                }),
            );
        }
    }
}

/// Order-insensitive array comparison. Exact matches cancel as a multiset;
/// the remaining items pair up in index order and recurse, reported at the
/// new side's index. Anything unpaired is an addition or a removal.
fn diff_arrays(
    acc: &mut DiffAcc,
    path: &str,
    old_items: &[Value],
    new_items: &[Value],
    options: &DiffOptions,
) {
    let mut old_matched = vec![false; old_items.len()];
    let mut new_matched = vec![false; new_items.len()];

    for (new_index, new_item) in new_items.iter().enumerate() {
        let hit = (0..old_items.len()).find(|&i| !old_matched[i] && old_items[i] == *new_item);
        if let Some(old_index) = hit {
            old_matched[old_index] = true;
            new_matched[new_index] = true;
        }
    }

    let old_left: Vec<usize> = (0..old_items.len()).filter(|&i| !old_matched[i]).collect();
    let new_left: Vec<usize> = (0..new_items.len()).filter(|&i| !new_matched[i]).collect();

    let paired = old_left.len().min(new_left.len());
    for k in 0..paired {
        let child = format!("{path}[{}]", new_left[k]);
        walk(acc, &child, &old_items[old_left[k]], &new_items[new_left[k]], options);
    }
    for &new_index in new_left.iter().skip(paired) {
        let child = format!("{path}[{new_index}]");
        if !options.excludes(&child) {
            acc.iterable_item_added
                .insert(child, new_items[new_index].clone());
        }
    }
    for &old_index in old_left.iter().skip(paired) {
        let child = format!("{path}[{old_index}]");
        if !options.excludes(&child) {
            acc.iterable_item_removed
                .insert(child, old_items[old_index].clone());
        }
    }
}

/// True when any kind in a per-kind diff document reports drift.
pub fn has_drift(diff: &Value) -> bool {
    match diff.as_object() {
        Some(kinds) => kinds
            .values()
            .any(|d| d.as_object().map(|o| !o.is_empty()).unwrap_or(true)),
        None => true,
    }
}

// ── Recording diff ────────────────────────────────────────────────────────────

/// Compares a current recording file against a previous one, kind by kind.
pub struct Diff {
    current_recording_path: PathBuf,
    previous_recording_path: PathBuf,
}

impl Diff {
    pub fn new(current_recording_path: &Path, previous_recording_path: &Path) -> Self {
        Self {
            current_recording_path: current_recording_path.to_path_buf(),
            previous_recording_path: previous_recording_path.to_path_buf(),
        }
    }

    /// Loads both recordings (either persisted form) and produces one diff
    /// document per kind, `{}` for kinds without drift. Query records get
    /// their serialized tables parsed so row order never registers; env
    /// records ignore the recorder's own environment variables.
    pub fn calculate_diff(&self) -> Result<Value, RetraceError> {
        let current = load_normalized(&self.current_recording_path)?;
        let previous = load_normalized(&self.previous_recording_path)?;

        let mut kinds: Vec<&String> = current.keys().chain(previous.keys()).collect();
        kinds.sort();
        kinds.dedup();

        let empty = Vec::new();
        let mut out = Map::new();
        for kind in kinds {
            let current_records = current.get(kind).unwrap_or(&empty);
            let previous_records = previous.get(kind).unwrap_or(&empty);
            let diff = match kind.as_str() {
                "QueryRecord" => self.diff_query_records(current_records, previous_records),
                "GetEnvRecord" => self.diff_env_records(current_records, previous_records),
                _ => self.diff_default(current_records, previous_records),
            };
            out.insert(kind.clone(), diff);
        }
        Ok(Value::Object(out))
    }

    /// Query results carry their table as a JSON string; parse both sides
    /// before diffing so the comparison is structural, not textual.
    pub fn diff_query_records(&self, current: &[Value], previous: &[Value]) -> Value {
        let current: Vec<Value> = current.iter().map(parse_table_field).collect();
        let previous: Vec<Value> = previous.iter().map(parse_table_field).collect();
        deep_diff(
            &Value::Array(previous),
            &Value::Array(current),
            &DiffOptions::default(),
        )
    }

    /// Environment captures differ between runs in the recorder's own
    /// variables; exclude those paths so only real drift is reported.
    pub fn diff_env_records(&self, current: &[Value], previous: &[Value]) -> Value {
        let count = current.len().max(previous.len());
        let mut exclude_paths = Vec::with_capacity(count * RECORDER_ENV_VARS.len());
        for index in 0..count {
            for var in RECORDER_ENV_VARS {
                exclude_paths.push(format!("root[{index}]['result']['env']['{var}']"));
            }
        }
        deep_diff(
            &Value::Array(previous.to_vec()),
            &Value::Array(current.to_vec()),
            &DiffOptions { exclude_paths },
        )
    }

    pub fn diff_default(&self, current: &[Value], previous: &[Value]) -> Value {
        deep_diff(
            &Value::Array(previous.to_vec()),
            &Value::Array(current.to_vec()),
            &DiffOptions::default(),
        )
    }

    /// Calculates the diff and writes it as pretty JSON.
    pub fn write(&self, path: &Path) -> Result<(), RetraceError> {
        let diff = self.calculate_diff()?;
        let body = serde_json::to_string_pretty(&diff)
            .map_err(|e| RetraceError::Serialization(e.to_string()))?;
        fs::write(path, body).map_err(|e| RetraceError::Io(e.to_string()))
    }
}

fn load_normalized(path: &Path) -> Result<BTreeMap<String, Vec<Value>>, RetraceError> {
    let store = load_recording(path)?;
    let mut map: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for (kind, envelope) in store.iter() {
        map.entry(kind.to_string()).or_default().push(json!({
            "params": envelope.params,
            "result": envelope.result,
        }));
    }
    Ok(map)
}

fn parse_table_field(record: &Value) -> Value {
    let mut record = record.clone();
    let parsed = match record.pointer("/result/table") {
        Some(Value::String(raw)) => serde_json::from_str::<Value>(raw).ok(),
        _ => None,
    };
    if let Some(parsed) = parsed {
        if let Some(slot) = record.pointer_mut("/result/table") {
            *slot = parsed;
        }
    }
    record
}
