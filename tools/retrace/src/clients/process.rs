//! Recorded subprocess execution.
//!
//! Subprocess running is a trait seam: hosts depend on [`CommandRunner`]
//! and compose [`RecordedRunner`] around whichever implementation they use.
//! Because the adapter wraps the trait rather than one concrete type, every
//! implementation — the production runner, an override, a stateless stub, a
//! boxed trait object — records through the same interception path.

use crate::errors::RetraceError;
use crate::intercept::intercept;
use crate::operation;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

operation! {
    op: RunCmd,
    group: "Process",
    params: RunCmdParams {
        cwd: String,
        cmd: Vec<String>,
        env: BTreeMap<String, String>,
    },
    result: RunCmdResult {
        stdout: String,
        stderr: String,
    },
}

pub trait CommandRunner: Send + Sync {
    /// Runs `cmd` in `cwd` with extra environment `env`, returning captured
    /// stdout and stderr.
    fn run_cmd(
        &self,
        cwd: &Path,
        cmd: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<(String, String), RetraceError>;
}

impl CommandRunner for Arc<dyn CommandRunner> {
    fn run_cmd(
        &self,
        cwd: &Path,
        cmd: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<(String, String), RetraceError> {
        self.as_ref().run_cmd(cwd, cmd, env)
    }
}

/// Runs commands with `std::process`.
pub struct ProductionRunner;

impl CommandRunner for ProductionRunner {
    fn run_cmd(
        &self,
        cwd: &Path,
        cmd: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<(String, String), RetraceError> {
        let (program, args) = cmd
            .split_first()
            .ok_or_else(|| RetraceError::Process("empty command".to_string()))?;
        let output = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .envs(env)
            .output()
            .map_err(|e| RetraceError::Process(format!("{program}: {e}")))?;
        Ok((
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ))
    }
}

/// Records every call through the wrapped runner as a `RunCmdRecord`.
pub struct RecordedRunner<R: CommandRunner> {
    inner: R,
}

impl<R: CommandRunner> RecordedRunner<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: CommandRunner> CommandRunner for RecordedRunner<R> {
    fn run_cmd(
        &self,
        cwd: &Path,
        cmd: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<(String, String), RetraceError> {
        intercept::<RunCmd, _, _, _>(
            || RunCmdParams {
                cwd: cwd.display().to_string(),
                cmd: cmd.to_vec(),
                env: env.clone(),
            },
            || self.inner.run_cmd(cwd, cmd, env),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Operation;

    #[test]
    fn run_cmd_kind_and_group() {
        assert_eq!(RunCmd::NAME, "RunCmdRecord");
        assert_eq!(RunCmd::GROUP, Some("Process"));
    }

    #[test]
    fn result_expands_to_a_stdout_stderr_tuple() {
        let output = ("out".to_string(), "err".to_string());
        let result = RunCmd::to_result(&output);
        assert_eq!(result.stdout, "out");
        assert_eq!(result.stderr, "err");
        assert_eq!(RunCmd::to_output(result), output);
    }

    #[test]
    fn empty_command_is_rejected() {
        let err = ProductionRunner
            .run_cmd(Path::new("."), &[], &BTreeMap::new())
            .expect_err("nothing to run");
        assert!(matches!(err, RetraceError::Process(_)));
    }

    #[cfg(unix)]
    #[test]
    fn production_runner_captures_stdout() {
        let (stdout, stderr) = ProductionRunner
            .run_cmd(
                Path::new("."),
                &["echo".to_string(), "hello".to_string()],
                &BTreeMap::new(),
            )
            .expect("echo runs");
        assert_eq!(stdout.trim(), "hello");
        assert!(stderr.is_empty());
    }
}
