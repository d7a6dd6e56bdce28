use crate::errors::RetraceError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub type EnvMap = BTreeMap<String, String>;

pub const MODE_ENV: &str = "RETRACE_MODE";
pub const RECORDING_PATH_ENV: &str = "RETRACE_RECORDING_PATH";
pub const BASELINE_PATH_ENV: &str = "RETRACE_BASELINE_PATH";
pub const TYPES_ENV: &str = "RETRACE_TYPES";

pub const DEFAULT_RECORDING_PATH: &str = "recording.json";

/// Environment variables the recorder itself reads. Env-capturing
/// operations and the diff engine treat these as noise, never as drift.
pub const RECORDER_ENV_VARS: &[&str] = &[
    MODE_ENV,
    RECORDING_PATH_ENV,
    BASELINE_PATH_ENV,
    TYPES_ENV,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecorderMode {
    Record,
    Replay,
    Diff,
}

impl RecorderMode {
    pub fn parse(value: &str) -> Result<Self, RetraceError> {
        match value.to_ascii_lowercase().as_str() {
            "record" => Ok(RecorderMode::Record),
            "replay" => Ok(RecorderMode::Replay),
            "diff" => Ok(RecorderMode::Diff),
            other => Err(RetraceError::InvalidConfig(format!(
                "{MODE_ENV} must be record, replay or diff, got {other:?}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecorderMode::Record => "record",
            RecorderMode::Replay => "replay",
            RecorderMode::Diff => "diff",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecorderConfig {
    pub mode: RecorderMode,
    /// Where record and diff runs write the current recording.
    pub recording_path: PathBuf,
    /// Previous recording consumed by replay and diff runs.
    pub baseline_path: Option<PathBuf>,
    /// Allow-list of record kind or group names. None records everything.
    pub types: Option<Vec<String>>,
    /// Keep the recording in memory until `write()` instead of streaming.
    pub in_memory: bool,
}

impl RecorderConfig {
    pub fn new(mode: RecorderMode) -> Self {
        Self {
            mode,
            recording_path: PathBuf::from(DEFAULT_RECORDING_PATH),
            baseline_path: None,
            types: None,
            in_memory: false,
        }
    }

    /// Reads activation settings from an environment map. Returns
    /// `Ok(None)` when no mode is set, which leaves the subsystem inert.
    pub fn from_env(env: &EnvMap) -> Result<Option<Self>, RetraceError> {
        load_config(None, env)
    }

    /// Like [`from_env`](Self::from_env), but snapshots the real process
    /// environment instead of taking an explicit map.
    pub fn from_process_env() -> Result<Option<Self>, RetraceError> {
        Self::from_env(&process_env())
    }
}

/// Snapshot of the process environment as an [`EnvMap`]. Entries that are
/// not valid UTF-8 are skipped.
pub fn process_env() -> EnvMap {
    std::env::vars_os()
        .filter_map(|(name, value)| Some((name.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialConfigFile {
    recorder: Option<PartialRecorderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialRecorderConfig {
    mode: Option<String>,
    recording_path: Option<PathBuf>,
    baseline_path: Option<PathBuf>,
    types: Option<Vec<String>>,
    in_memory: Option<bool>,
}

/// Layers an optional TOML file beneath the environment map. Environment
/// values win over file values; the file wins over defaults.
pub fn load_config(
    config_path: Option<&Path>,
    env: &EnvMap,
) -> Result<Option<RecorderConfig>, RetraceError> {
    let mut partial = PartialRecorderConfig::default();

    if let Some(path) = config_path {
        let contents =
            std::fs::read_to_string(path).map_err(|e| RetraceError::Io(e.to_string()))?;
        let file: PartialConfigFile =
            toml::from_str(&contents).map_err(|e| RetraceError::ConfigParse(e.to_string()))?;
        if let Some(recorder) = file.recorder {
            partial = recorder;
        }
    }

    merge_env_overrides(&mut partial, env);
    resolve_config(partial)
}

fn merge_env_overrides(partial: &mut PartialRecorderConfig, env: &EnvMap) {
    if let Some(mode) = env.get(MODE_ENV) {
        partial.mode = Some(mode.clone());
    }
    if let Some(path) = env.get(RECORDING_PATH_ENV) {
        partial.recording_path = Some(PathBuf::from(path));
    }
    if let Some(path) = env.get(BASELINE_PATH_ENV) {
        partial.baseline_path = Some(PathBuf::from(path));
    }
    if let Some(types) = env.get(TYPES_ENV) {
        partial.types = Some(split_types(types));
    }
}

fn split_types(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

fn resolve_config(partial: PartialRecorderConfig) -> Result<Option<RecorderConfig>, RetraceError> {
    let Some(mode_raw) = partial.mode else {
        return Ok(None);
    };
    let mode = RecorderMode::parse(&mode_raw)?;

    let cfg = RecorderConfig {
        mode,
        recording_path: partial
            .recording_path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RECORDING_PATH)),
        baseline_path: partial.baseline_path,
        types: partial.types,
        in_memory: partial.in_memory.unwrap_or(false),
    };

    validate_config(&cfg)?;
    Ok(Some(cfg))
}

pub fn validate_config(cfg: &RecorderConfig) -> Result<(), RetraceError> {
    if matches!(cfg.mode, RecorderMode::Replay | RecorderMode::Diff)
        && cfg.baseline_path.is_none()
    {
        return Err(RetraceError::InvalidConfig(format!(
            "{} mode requires {BASELINE_PATH_ENV} to point at a previous recording",
            cfg.mode.as_str()
        )));
    }
    Ok(())
}
