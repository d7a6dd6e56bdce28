//! The recorder: one fixed mode, one sequence counter, one recording.
//!
//! A record or diff recorder captures envelopes as they happen, either
//! buffered in memory or streamed to the recording file as an incrementally
//! written JSON array. A replay recorder hydrates the baseline recording
//! once at construction and serves calls out of it destructively. The mode
//! never changes after construction; calling a record-side entry point on a
//! replay recorder (or the reverse) is a programming error and panics.

use crate::config::{validate_config, RecorderConfig, RecorderMode};
use crate::diff::Diff;
use crate::envelope::{Envelope, PortableEntry, Registry};
use crate::errors::RetraceError;
use crate::store::RecordingStore;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

// ── Anomalies ─────────────────────────────────────────────────────────────────

/// A recoverable recording problem: a call that executed fine but could not
/// be captured. The envelope is skipped; the host call is never failed.
#[derive(Debug, Clone, PartialEq)]
pub struct Anomaly {
    pub kind: String,
    pub message: String,
}

pub type AnomalyHook = Arc<dyn Fn(&Anomaly) + Send + Sync>;

// ── Streamed sink ─────────────────────────────────────────────────────────────

/// Incrementally written JSON array on disk. Entries are appended one per
/// line under the sink's own lock; `finalize` closes the array exactly once.
struct StreamedSink {
    path: PathBuf,
    state: Mutex<SinkState>,
}

struct SinkState {
    written: u64,
    finalized: bool,
}

impl StreamedSink {
    fn create(path: &Path) -> Result<Self, RetraceError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| RetraceError::Io(e.to_string()))?;
            }
        }
        // Truncate any stale recording from a previous run.
        fs::write(path, "").map_err(|e| RetraceError::Io(e.to_string()))?;
        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(SinkState {
                written: 0,
                finalized: false,
            }),
        })
    }

    fn append(&self, entry: &PortableEntry) -> Result<(), RetraceError> {
        let line = serde_json::to_string(entry)
            .map_err(|e| RetraceError::Serialization(e.to_string()))?;
        let mut state = self.state.lock().expect("recording sink lock");
        if state.finalized {
            return Err(RetraceError::Io(format!(
                "recording {} is already finalized",
                self.path.display()
            )));
        }
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| RetraceError::Io(e.to_string()))?;
        if state.written == 0 {
            write!(file, "[\n{line}").map_err(|e| RetraceError::Io(e.to_string()))?;
        } else {
            write!(file, ",\n{line}").map_err(|e| RetraceError::Io(e.to_string()))?;
        }
        state.written += 1;
        Ok(())
    }

    fn finalize(&self) -> Result<(), RetraceError> {
        let mut state = self.state.lock().expect("recording sink lock");
        if state.finalized {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| RetraceError::Io(e.to_string()))?;
        if state.written == 0 {
            write!(file, "[]").map_err(|e| RetraceError::Io(e.to_string()))?;
        } else {
            write!(file, "\n]").map_err(|e| RetraceError::Io(e.to_string()))?;
        }
        state.finalized = true;
        Ok(())
    }
}

// ── Recorder ──────────────────────────────────────────────────────────────────

pub struct Recorder {
    mode: RecorderMode,
    types: Option<Vec<String>>,
    registry: Registry,
    store: Mutex<RecordingStore>,
    seq: AtomicU64,
    recorded: AtomicU64,
    sink: Option<StreamedSink>,
    recording_path: PathBuf,
    baseline_path: Option<PathBuf>,
    written: AtomicBool,
    anomaly_hook: Mutex<Option<AnomalyHook>>,
}

impl fmt::Debug for Recorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recorder")
            .field("mode", &self.mode)
            .field("types", &self.types)
            .field("recording_path", &self.recording_path)
            .field("baseline_path", &self.baseline_path)
            .finish_non_exhaustive()
    }
}

/// Reads and parses a persisted recording in either supported form.
pub fn load_recording(path: &Path) -> Result<RecordingStore, RetraceError> {
    let contents = fs::read_to_string(path)
        .map_err(|e| RetraceError::Io(format!("{}: {e}", path.display())))?;
    let document: Value = serde_json::from_str(&contents)
        .map_err(|e| RetraceError::RecordingParse(format!("{}: {e}", path.display())))?;
    RecordingStore::from_portable(document)
}

impl Recorder {
    pub fn new(cfg: RecorderConfig, registry: Registry) -> Result<Self, RetraceError> {
        validate_config(&cfg)?;

        let store = if cfg.mode == RecorderMode::Replay {
            let baseline = cfg
                .baseline_path
                .as_deref()
                .ok_or_else(|| {
                    RetraceError::InvalidConfig("replay requires a baseline recording".to_string())
                })?;
            let store = load_recording(baseline)?;
            for (kind, envelope) in store.iter() {
                let entry = registry.expect_kind(kind)?;
                entry.validate_params(&envelope.params)?;
                entry.validate_result(&envelope.result)?;
            }
            store
        } else {
            RecordingStore::new()
        };

        let sink = if cfg.mode != RecorderMode::Replay && !cfg.in_memory {
            Some(StreamedSink::create(&cfg.recording_path)?)
        } else {
            None
        };

        Ok(Self {
            mode: cfg.mode,
            types: cfg.types,
            registry,
            store: Mutex::new(store),
            seq: AtomicU64::new(0),
            recorded: AtomicU64::new(0),
            sink,
            recording_path: cfg.recording_path,
            baseline_path: cfg.baseline_path,
            written: AtomicBool::new(false),
            anomaly_hook: Mutex::new(None),
        })
    }

    pub fn mode(&self) -> RecorderMode {
        self.mode
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn recording_path(&self) -> &Path {
        &self.recording_path
    }

    pub fn baseline_path(&self) -> Option<&Path> {
        self.baseline_path.as_deref()
    }

    /// Whether the allow-list admits this kind, matching either the kind
    /// name or its group name. No list means everything is recorded.
    pub fn records_kind(&self, kind: &str, group: Option<&str>) -> bool {
        match &self.types {
            None => true,
            Some(types) => types
                .iter()
                .any(|name| name == kind || group == Some(name.as_str())),
        }
    }

    /// Captures one envelope, assigning the next sequence number. Record and
    /// diff modes only; calling this on a replay recorder panics.
    pub fn add_record(&self, kind: &str, params: Value, result: Value) -> Result<u64, RetraceError> {
        assert!(
            self.mode != RecorderMode::Replay,
            "add_record called on a replay recorder"
        );
        self.registry.expect_kind(kind)?;

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let envelope = Envelope {
            params,
            result,
            seq,
        };
        if let Some(sink) = &self.sink {
            sink.append(&PortableEntry::new(kind, envelope))?;
        } else {
            self.store
                .lock()
                .expect("recording store lock")
                .add(kind, envelope);
        }
        self.recorded.fetch_add(1, Ordering::Relaxed);
        Ok(seq)
    }

    /// Consumes the recorded envelope matching `params`. Replay mode only;
    /// calling this on a record or diff recorder panics. A missing match
    /// means the program has drifted from the recording and fails this call.
    pub fn expect_record(&self, kind: &str, params: &Value) -> Result<Envelope, RetraceError> {
        assert!(
            self.mode == RecorderMode::Replay,
            "expect_record called on a {} recorder",
            self.mode.as_str()
        );
        self.registry.expect_kind(kind)?;

        self.store
            .lock()
            .expect("recording store lock")
            .pop_matching(kind, params)
            .ok_or_else(|| RetraceError::ReplayMiss {
                kind: kind.to_string(),
                params: params.to_string(),
            })
    }

    /// Number of envelopes captured so far.
    pub fn recorded_count(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    /// Baseline envelopes never consumed by replay, per kind. Anything left
    /// after the run means the program made fewer calls than the recording.
    pub fn unconsumed(&self) -> BTreeMap<String, usize> {
        self.store
            .lock()
            .expect("recording store lock")
            .kind_counts()
    }

    /// Finalizes the recording exactly once: closes the streamed array, or
    /// writes the buffered store as a seq-sorted flat array. A no-op on
    /// replay recorders and on every call after the first.
    pub fn write(&self) -> Result<(), RetraceError> {
        if self.mode == RecorderMode::Replay {
            return Ok(());
        }
        if self.written.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(sink) = &self.sink {
            return sink.finalize();
        }

        let portable = self
            .store
            .lock()
            .expect("recording store lock")
            .to_portable()?;
        let body = serde_json::to_string(&portable)
            .map_err(|e| RetraceError::Serialization(e.to_string()))?;
        if let Some(parent) = self.recording_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| RetraceError::Io(e.to_string()))?;
            }
        }
        fs::write(&self.recording_path, body).map_err(|e| RetraceError::Io(e.to_string()))
    }

    /// Diff mode only: finalizes the current recording and compares it with
    /// the baseline, one diff document per drifted kind.
    pub fn calculate_diff(&self) -> Result<Value, RetraceError> {
        assert!(
            self.mode == RecorderMode::Diff,
            "calculate_diff called on a {} recorder",
            self.mode.as_str()
        );
        let baseline = self.baseline_path.as_deref().ok_or_else(|| {
            RetraceError::InvalidConfig("diff requires a baseline recording".to_string())
        })?;
        self.write()?;
        Diff::new(&self.recording_path, baseline).calculate_diff()
    }

    pub fn set_anomaly_hook(&self, hook: AnomalyHook) {
        *self.anomaly_hook.lock().expect("anomaly hook lock") = Some(hook);
    }

    /// Reports a recoverable capture failure. Dropped silently when no hook
    /// is installed; the recorder never formats or routes events itself.
    pub fn report_anomaly(&self, kind: &str, message: &str) {
        let hook = self.anomaly_hook.lock().expect("anomaly hook lock").clone();
        if let Some(hook) = hook {
            hook(&Anomaly {
                kind: kind.to_string(),
                message: message.to_string(),
            });
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        // Backstop for hosts that never call write(); a buffered recorder
        // that was never written leaves no file behind.
        if let Some(sink) = &self.sink {
            let _ = sink.finalize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    operation! {
        op: Echo,
        params: EchoParams { text: String },
        result: EchoResult { echoed: String },
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register::<Echo>();
        registry
    }

    fn record_config(in_memory: bool, path: &Path) -> RecorderConfig {
        let mut cfg = RecorderConfig::new(RecorderMode::Record);
        cfg.in_memory = in_memory;
        cfg.recording_path = path.to_path_buf();
        cfg
    }

    fn write_baseline(path: &Path, document: &Value) {
        fs::write(path, serde_json::to_string(document).expect("encode baseline"))
            .expect("write baseline");
    }

    fn replay_recorder(baseline: &Value, dir: &Path) -> Recorder {
        let baseline_path = dir.join("baseline.json");
        write_baseline(&baseline_path, baseline);
        let mut cfg = RecorderConfig::new(RecorderMode::Replay);
        cfg.baseline_path = Some(baseline_path);
        Recorder::new(cfg, registry()).expect("build replay recorder")
    }

    #[test]
    fn add_record_assigns_sequential_seq_from_zero() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let recorder = Recorder::new(
            record_config(true, &dir.path().join("recording.json")),
            registry(),
        )
        .expect("build recorder");

        let first = recorder
            .add_record("EchoRecord", json!({"text": "a"}), json!({"echoed": "a"}))
            .expect("record first");
        let second = recorder
            .add_record("EchoRecord", json!({"text": "b"}), json!({"echoed": "b"}))
            .expect("record second");
        assert_eq!(first, 0);
        assert_eq!(second, 1);
        assert_eq!(recorder.recorded_count(), 2);
    }

    #[test]
    fn add_record_rejects_unregistered_kinds() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let recorder = Recorder::new(
            record_config(true, &dir.path().join("recording.json")),
            registry(),
        )
        .expect("build recorder");

        let err = recorder
            .add_record("MysteryRecord", json!({}), Value::Null)
            .expect_err("kind was never registered");
        assert!(matches!(err, RetraceError::UnregisteredKind(_)));
    }

    #[test]
    fn types_filter_matches_kind_or_group() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let mut cfg = record_config(true, &dir.path().join("recording.json"));
        cfg.types = Some(vec!["EchoRecord".to_string(), "Database".to_string()]);
        let recorder = Recorder::new(cfg, registry()).expect("build recorder");

        assert!(recorder.records_kind("EchoRecord", None));
        assert!(recorder.records_kind("QueryRecord", Some("Database")));
        assert!(!recorder.records_kind("GetEnvRecord", None));

        let unfiltered = Recorder::new(
            record_config(true, &dir.path().join("recording2.json")),
            registry(),
        )
        .expect("build recorder");
        assert!(unfiltered.records_kind("AnythingRecord", None));
    }

    #[test]
    fn buffered_write_dumps_a_seq_sorted_array() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("recording.json");
        let recorder = Recorder::new(record_config(true, &path), registry())
            .expect("build recorder");

        recorder
            .add_record("EchoRecord", json!({"text": "a"}), json!({"echoed": "a"}))
            .expect("record");
        recorder
            .add_record("EchoRecord", json!({"text": "b"}), json!({"echoed": "b"}))
            .expect("record");
        recorder.write().expect("write recording");
        recorder.write().expect("second write is a no-op");

        let document: Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read recording"))
                .expect("parse recording");
        let entries = document.as_array().expect("array form");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["seq"], 0);
        assert_eq!(entries[0]["type"], "EchoRecord");
        assert_eq!(entries[1]["params"], json!({"text": "b"}));
    }

    #[test]
    fn buffered_recorder_without_write_leaves_no_file() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("recording.json");
        {
            let recorder = Recorder::new(record_config(true, &path), registry())
                .expect("build recorder");
            recorder
                .add_record("EchoRecord", json!({"text": "a"}), json!({"echoed": "a"}))
                .expect("record");
        }
        assert!(!path.exists());
    }

    #[test]
    fn streamed_recorder_closes_the_array_on_write() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("recording.json");
        let recorder = Recorder::new(record_config(false, &path), registry())
            .expect("build recorder");

        recorder
            .add_record("EchoRecord", json!({"text": "a"}), json!({"echoed": "a"}))
            .expect("record");
        recorder
            .add_record("EchoRecord", json!({"text": "b"}), json!({"echoed": "b"}))
            .expect("record");
        recorder.write().expect("finalize recording");

        let document: Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read recording"))
                .expect("parse recording");
        assert_eq!(document.as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn streamed_recorder_with_no_records_writes_an_empty_array() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("recording.json");
        let recorder = Recorder::new(record_config(false, &path), registry())
            .expect("build recorder");
        recorder.write().expect("finalize recording");

        assert_eq!(
            fs::read_to_string(&path).expect("read recording"),
            "[]"
        );
    }

    #[test]
    fn dropping_a_streamed_recorder_finalizes_the_file() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("recording.json");
        {
            let recorder = Recorder::new(record_config(false, &path), registry())
                .expect("build recorder");
            recorder
                .add_record("EchoRecord", json!({"text": "a"}), json!({"echoed": "a"}))
                .expect("record");
        }
        let document: Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read recording"))
                .expect("parse recording");
        assert_eq!(document.as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn expect_record_pops_matches_and_reports_misses() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let recorder = replay_recorder(
            &json!([
                {"type": "EchoRecord", "params": {"text": "hi"}, "result": {"echoed": "hi"}, "seq": 0},
            ]),
            dir.path(),
        );

        let envelope = recorder
            .expect_record("EchoRecord", &json!({"text": "hi"}))
            .expect("recorded call");
        assert_eq!(envelope.result, json!({"echoed": "hi"}));

        let err = recorder
            .expect_record("EchoRecord", &json!({"text": "hi"}))
            .expect_err("recording is exhausted");
        assert!(matches!(err, RetraceError::ReplayMiss { .. }));
        assert!(err.to_string().contains("EchoRecord"));
    }

    #[test]
    fn replay_hydration_rejects_unregistered_kinds() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let baseline_path = dir.path().join("baseline.json");
        write_baseline(
            &baseline_path,
            &json!([
                {"type": "MysteryRecord", "params": {}, "result": null, "seq": 0},
            ]),
        );
        let mut cfg = RecorderConfig::new(RecorderMode::Replay);
        cfg.baseline_path = Some(baseline_path);

        let err = Recorder::new(cfg, registry()).expect_err("unknown kind in baseline");
        assert!(matches!(err, RetraceError::UnregisteredKind(_)));
    }

    #[test]
    fn replay_hydration_rejects_malformed_shapes() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let baseline_path = dir.path().join("baseline.json");
        write_baseline(
            &baseline_path,
            &json!([
                {"type": "EchoRecord", "params": {"text": 42}, "result": {"echoed": "x"}, "seq": 0},
            ]),
        );
        let mut cfg = RecorderConfig::new(RecorderMode::Replay);
        cfg.baseline_path = Some(baseline_path);

        let err = Recorder::new(cfg, registry()).expect_err("params shape drifted");
        assert!(matches!(err, RetraceError::RecordingParse(_)));
    }

    #[test]
    fn unconsumed_reports_leftover_baseline_records() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let recorder = replay_recorder(
            &json!([
                {"type": "EchoRecord", "params": {"text": "a"}, "result": {"echoed": "a"}, "seq": 0},
                {"type": "EchoRecord", "params": {"text": "b"}, "result": {"echoed": "b"}, "seq": 1},
            ]),
            dir.path(),
        );

        recorder
            .expect_record("EchoRecord", &json!({"text": "a"}))
            .expect("first call");
        assert_eq!(recorder.unconsumed().get("EchoRecord").copied(), Some(1));
    }

    #[test]
    #[should_panic(expected = "add_record called on a replay recorder")]
    fn add_record_panics_in_replay_mode() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let recorder = replay_recorder(&json!([]), dir.path());
        let _ = recorder.add_record("EchoRecord", json!({"text": "x"}), Value::Null);
    }

    #[test]
    #[should_panic(expected = "expect_record called on a record recorder")]
    fn expect_record_panics_in_record_mode() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let recorder = Recorder::new(
            record_config(true, &dir.path().join("recording.json")),
            registry(),
        )
        .expect("build recorder");
        let _ = recorder.expect_record("EchoRecord", &json!({"text": "x"}));
    }

    #[test]
    fn anomaly_hook_receives_reports() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let recorder = Recorder::new(
            record_config(true, &dir.path().join("recording.json")),
            registry(),
        )
        .expect("build recorder");

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_hook = Arc::clone(&seen);
        recorder.set_anomaly_hook(Arc::new(move |anomaly| {
            assert_eq!(anomaly.kind, "EchoRecord");
            seen_in_hook.fetch_add(1, Ordering::SeqCst);
        }));

        recorder.report_anomaly("EchoRecord", "result failed to serialize");
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
