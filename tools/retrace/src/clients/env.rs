//! Recorded environment capture.

use crate::config::process_env;
use crate::errors::RetraceError;
use crate::intercept::intercept;
use crate::operation;
use std::collections::BTreeMap;

operation! {
    op: GetEnv,
    params: GetEnvParams {},
    result: GetEnvResult { env: BTreeMap<String, String> },
}

/// Snapshots the process environment. Variables with non-UTF-8 names or
/// values are skipped; replay restores exactly what was captured.
pub fn get_env() -> Result<BTreeMap<String, String>, RetraceError> {
    intercept::<GetEnv, _, _, _>(|| GetEnvParams {}, || Ok(process_env()))
}
