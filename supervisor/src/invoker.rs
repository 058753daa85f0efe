//! Agent invocation: run one attempt and turn whatever happened into a record.

use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::core::types::{IterationRecord, Termination};
use crate::io::executor::{ExecOutput, ExecRequest, Executor};
use crate::io::iteration_log::IterationLog;
use crate::io::paths::ExperimentPaths;
use crate::io::snapshot::workspace_fingerprint;

/// Runs attempts through an [`Executor`] and logs each one before returning it.
pub struct AgentInvoker<'a, E: Executor> {
    executor: &'a E,
    paths: ExperimentPaths,
    log: IterationLog,
}

impl<'a, E: Executor> AgentInvoker<'a, E> {
    pub fn new(executor: &'a E, paths: ExperimentPaths) -> Self {
        let log = IterationLog::new(paths.clone());
        Self {
            executor,
            paths,
            log,
        }
    }

    /// Invoke the agent for `request.index`.
    ///
    /// Launch errors become a [`Termination::LaunchFailed`] record. The only
    /// error returned is a failure to write the iteration logs.
    #[instrument(skip_all, fields(index = request.index))]
    pub fn invoke(&self, request: &ExecRequest) -> Result<IterationRecord> {
        let before = self.fingerprint();
        let started_at = Utc::now();
        let clock = Instant::now();

        let output = match self.executor.exec(request) {
            Ok(output) => output,
            Err(err) => {
                let message = format!("{err:#}");
                warn!(err = %message, "agent could not be launched");
                ExecOutput {
                    termination: Termination::LaunchFailed {
                        message: message.clone(),
                    },
                    stdout: Vec::new(),
                    stderr: format!("{message}\n").into_bytes(),
                }
            }
        };
        let duration_ms = u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX);
        let after = self.fingerprint();

        let record = IterationRecord {
            index: request.index,
            started_at,
            duration_ms,
            termination: output.termination,
            stdout: output.stdout,
            stderr: output.stderr,
            workspace_changed: matches!((before, after), (Some(b), Some(a)) if b != a),
        };
        self.log
            .write(&record)
            .with_context(|| format!("log iteration {}", record.index))?;

        info!(
            exit_code = record.exit_code(),
            failure = ?record.termination.failure_class(),
            timed_out = record.termination == Termination::TimedOut,
            duration_ms,
            workspace_changed = record.workspace_changed,
            "attempt recorded"
        );
        Ok(record)
    }

    pub fn log(&self) -> &IterationLog {
        &self.log
    }

    fn fingerprint(&self) -> Option<String> {
        match workspace_fingerprint(&self.paths) {
            Ok(digest) => Some(digest),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "workspace fingerprint failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::fs;
    use std::path::PathBuf;
    use std::time::Duration;

    struct FakeExecutor {
        fail_launch: bool,
        create_file: Option<&'static str>,
    }

    impl Executor for FakeExecutor {
        fn exec(&self, request: &ExecRequest) -> Result<ExecOutput> {
            if self.fail_launch {
                return Err(anyhow!("No such file or directory")).context("spawn command");
            }
            if let Some(name) = self.create_file {
                fs::write(request.workdir.join(name), "made by agent")?;
            }
            Ok(ExecOutput {
                termination: Termination::Exited { code: 0 },
                stdout: Vec::new(),
                stderr: Vec::new(),
            })
        }
    }

    fn request(workdir: PathBuf) -> ExecRequest {
        ExecRequest {
            index: 1,
            workdir,
            prompt: "p".to_string(),
            session_id: None,
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn launch_error_becomes_a_logged_record() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ExperimentPaths::new(temp.path());
        let executor = FakeExecutor {
            fail_launch: true,
            create_file: None,
        };
        let invoker = AgentInvoker::new(&executor, paths.clone());

        let record = invoker.invoke(&request(temp.path().to_path_buf())).expect("invoke");
        assert!(matches!(record.termination, Termination::LaunchFailed { .. }));
        assert_eq!(record.exit_code(), 127);
        let stderr = fs::read_to_string(paths.stderr_path(1)).expect("stderr log");
        assert!(stderr.contains("spawn command"));
    }

    #[test]
    fn silent_attempt_that_writes_files_counts_as_progress() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ExperimentPaths::new(temp.path());
        let executor = FakeExecutor {
            fail_launch: false,
            create_file: Some("train.py"),
        };
        let invoker = AgentInvoker::new(&executor, paths);

        let record = invoker.invoke(&request(temp.path().to_path_buf())).expect("invoke");
        assert!(record.stdout.is_empty());
        assert!(record.workspace_changed);
        assert!(record.made_progress());
    }

    #[test]
    fn no_op_attempt_is_not_progress() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ExperimentPaths::new(temp.path());
        let executor = FakeExecutor {
            fail_launch: false,
            create_file: None,
        };
        let invoker = AgentInvoker::new(&executor, paths);

        let record = invoker.invoke(&request(temp.path().to_path_buf())).expect("invoke");
        assert!(!record.made_progress());
        assert!(invoker.log().read(1).expect("read").is_some());
    }
}
