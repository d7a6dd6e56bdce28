//! In-memory recording store: one insertion-ordered bucket per record kind.
//!
//! Replay consumes the store destructively. Matching is structural equality
//! on the params value, and a matched envelope is removed, so a recording
//! with N occurrences of a call satisfies exactly N replays.

use crate::envelope::{Envelope, PortableEntry};
use crate::errors::RetraceError;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, Default)]
pub struct RecordingStore {
    records: BTreeMap<String, VecDeque<Envelope>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: &str, envelope: Envelope) {
        self.records
            .entry(kind.to_string())
            .or_default()
            .push_back(envelope);
    }

    /// Removes and returns the first envelope of `kind` whose params equal
    /// `params`, scanning the bucket in recording order. Returns `None` when
    /// no recorded call matches, which replay treats as drift.
    pub fn pop_matching(&mut self, kind: &str, params: &Value) -> Option<Envelope> {
        let bucket = self.records.get_mut(kind)?;
        let index = bucket.iter().position(|envelope| envelope.params == *params)?;
        bucket.remove(index)
    }

    pub fn len(&self) -> usize {
        self.records.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.records.values().all(VecDeque::is_empty)
    }

    /// Remaining envelopes per kind, for drift inspection after replay.
    pub fn kind_counts(&self) -> BTreeMap<String, usize> {
        self.records
            .iter()
            .filter(|(_, bucket)| !bucket.is_empty())
            .map(|(kind, bucket)| (kind.clone(), bucket.len()))
            .collect()
    }

    /// Flattens the store into the persisted form: one array of
    /// `{type, params, result, seq}` entries sorted by seq.
    pub fn to_portable(&self) -> Result<Value, RetraceError> {
        let mut entries: Vec<PortableEntry> = self
            .records
            .iter()
            .flat_map(|(kind, bucket)| {
                bucket
                    .iter()
                    .map(|envelope| PortableEntry::new(kind, envelope.clone()))
            })
            .collect();
        entries.sort_by_key(|entry| entry.seq);
        serde_json::to_value(entries).map_err(|e| RetraceError::Serialization(e.to_string()))
    }

    /// Rebuilds a store from a persisted recording. Accepts the flat array
    /// form and the legacy map form (`{kind: [{params, result}, …]}`). Flat
    /// entries are sorted by seq before grouping, so a streamed file whose
    /// physical order raced still replays in record order. Legacy entries
    /// carry no seq and get synthetic ones in encounter order.
    pub fn from_portable(document: Value) -> Result<Self, RetraceError> {
        match document {
            Value::Array(_) => {
                let mut entries: Vec<PortableEntry> = serde_json::from_value(document)
                    .map_err(|e| RetraceError::RecordingParse(e.to_string()))?;
                entries.sort_by_key(|entry| entry.seq);

                let mut store = Self::new();
                for entry in entries {
                    let (kind, envelope) = entry.into_envelope();
                    store.add(&kind, envelope);
                }
                Ok(store)
            }
            Value::Object(map) => {
                let mut store = Self::new();
                let mut seq = 0u64;
                for (kind, bucket) in map {
                    let Value::Array(items) = bucket else {
                        return Err(RetraceError::RecordingParse(format!(
                            "expected an array of records under {kind:?}"
                        )));
                    };
                    for item in items {
                        let Value::Object(mut fields) = item else {
                            return Err(RetraceError::RecordingParse(format!(
                                "expected a record object under {kind:?}"
                            )));
                        };
                        let params = fields.remove("params").ok_or_else(|| {
                            RetraceError::RecordingParse(format!(
                                "record under {kind:?} is missing params"
                            ))
                        })?;
                        let result = fields.remove("result").unwrap_or(Value::Null);
                        store.add(&kind, Envelope { params, result, seq });
                        seq += 1;
                    }
                }
                Ok(store)
            }
            other => Err(RetraceError::RecordingParse(format!(
                "expected a recording array or map, got {other}"
            ))),
        }
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Envelope)> {
        self.records.iter().flat_map(|(kind, bucket)| {
            bucket.iter().map(move |envelope| (kind.as_str(), envelope))
        })
    }
}
