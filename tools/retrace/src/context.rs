//! Process-wide recorder slot.
//!
//! Holds at most one active [`Recorder`] behind an
//! `OnceLock<Mutex<Option<…>>>`. Intercepted operations consult the slot on
//! every call; while it is empty they pass straight through to the real
//! implementation.

use crate::config::{EnvMap, RecorderConfig};
use crate::envelope::Registry;
use crate::errors::RetraceError;
use crate::recorder::Recorder;
use std::sync::{Arc, Mutex, OnceLock};

static ACTIVE_RECORDER: OnceLock<Mutex<Option<Arc<Recorder>>>> = OnceLock::new();

fn recorder_slot() -> &'static Mutex<Option<Arc<Recorder>>> {
    ACTIVE_RECORDER.get_or_init(|| Mutex::new(None))
}

/// Install `recorder` as the process-wide recorder.
pub fn set_recorder(recorder: Arc<Recorder>) {
    *recorder_slot().lock().expect("recorder set lock") = Some(recorder);
}

/// Remove the active recorder, returning it so the host can still finalize
/// the recording. Subsequent intercepted calls pass through untouched.
pub fn clear_recorder() -> Option<Arc<Recorder>> {
    recorder_slot().lock().expect("recorder clear lock").take()
}

/// The recorder intercepted operations consult, if one is active.
pub fn active_recorder() -> Option<Arc<Recorder>> {
    recorder_slot().lock().expect("recorder get lock").clone()
}

/// Builds a recorder from the environment and installs it into the slot.
/// Returns `Ok(None)` without touching the slot when no mode is set.
pub fn activate_from_env(
    registry: Registry,
    env: &EnvMap,
) -> Result<Option<Arc<Recorder>>, RetraceError> {
    let Some(cfg) = RecorderConfig::from_env(env)? else {
        return Ok(None);
    };
    let recorder = Arc::new(Recorder::new(cfg, registry)?);
    set_recorder(Arc::clone(&recorder));
    Ok(Some(recorder))
}

/// Like [`activate_from_env`], but snapshots the real process environment.
/// Hosts that do not need to inject a map call this at startup.
pub fn activate_from_process_env(
    registry: Registry,
) -> Result<Option<Arc<Recorder>>, RetraceError> {
    activate_from_env(registry, &crate::config::process_env())
}
