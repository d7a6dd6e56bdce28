//! The interception wrapper around recordable operations.
//!
//! Every recorded client function funnels through [`intercept`]. With no
//! active recorder the wrapper is a plain pass-through and never even builds
//! the params value. With one, the recorder's mode decides: replay serves
//! the call from the baseline without running the body; record and diff run
//! the body and capture an envelope, suppressing capture of recorded calls
//! nested inside the one already being captured on this thread.

use crate::config::RecorderMode;
use crate::context::active_recorder;
use crate::envelope::Operation;
use crate::errors::RetraceError;
use serde_json::Value;
use std::cell::Cell;

thread_local! {
    static IN_RECORDED_CALL: Cell<bool> = Cell::new(false);
}

/// Set while the outermost recorded call on this thread runs its body.
/// Recorded calls made from inside it pass through uncaptured, so a
/// recording holds one envelope per outermost call.
struct ReentrancyGuard;

impl ReentrancyGuard {
    fn enter() -> Option<Self> {
        IN_RECORDED_CALL.with(|flag| {
            if flag.get() {
                None
            } else {
                flag.set(true);
                Some(ReentrancyGuard)
            }
        })
    }
}

impl Drop for ReentrancyGuard {
    fn drop(&mut self) {
        IN_RECORDED_CALL.with(|flag| flag.set(false));
    }
}

fn encode_params<O: Operation>(params: &O::Params) -> Result<Value, RetraceError> {
    serde_json::to_value(params)
        .map_err(|e| RetraceError::Serialization(format!("{} params: {e}", O::NAME)))
}

fn encode_result<O: Operation>(output: &O::Output) -> Result<Value, RetraceError> {
    serde_json::to_value(O::to_result(output))
        .map_err(|e| RetraceError::Serialization(format!("{} result: {e}", O::NAME)))
}

/// Runs `call` as the recordable operation `O`.
///
/// `params_fn` is deferred so the inert path costs nothing. Replay never
/// runs `call`; a call with no matching baseline envelope fails with
/// [`RetraceError::ReplayMiss`]. In record and diff modes a capture failure
/// other than an unregistered kind is reported as an anomaly and skipped,
/// never failing the host call that already succeeded.
pub fn intercept<O, P, F, E>(params_fn: P, call: F) -> Result<O::Output, E>
where
    O: Operation,
    P: FnOnce() -> O::Params,
    F: FnOnce() -> Result<O::Output, E>,
    E: From<RetraceError>,
{
    let Some(recorder) = active_recorder() else {
        return call();
    };
    if !recorder.records_kind(O::NAME, O::GROUP) {
        return call();
    }

    let params = params_fn();
    if !O::include(&params) {
        return call();
    }

    if recorder.mode() == RecorderMode::Replay {
        let params_value = encode_params::<O>(&params).map_err(E::from)?;
        let envelope = recorder
            .expect_record(O::NAME, &params_value)
            .map_err(E::from)?;
        let result: O::Result = serde_json::from_value(envelope.result)
            .map_err(|e| E::from(RetraceError::RecordingParse(format!("{}: {e}", O::NAME))))?;
        return Ok(O::to_output(result));
    }

    let Some(_guard) = ReentrancyGuard::enter() else {
        return call();
    };
    let output = call()?;

    let captured = encode_params::<O>(&params)
        .and_then(|params_value| Ok((params_value, encode_result::<O>(&output)?)));
    match captured {
        Ok((params_value, result_value)) => {
            match recorder.add_record(O::NAME, params_value, result_value) {
                Ok(_) => {}
                Err(err @ RetraceError::UnregisteredKind(_)) => return Err(E::from(err)),
                Err(err) => recorder.report_anomaly(O::NAME, &err.to_string()),
            }
        }
        Err(err) => recorder.report_anomaly(O::NAME, &err.to_string()),
    }

    Ok(output)
}
