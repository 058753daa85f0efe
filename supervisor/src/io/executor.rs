//! Executor abstraction for agent invocation.
//!
//! The [`Executor`] trait decouples the supervisor loop from the actual agent
//! backend (by default the `claude` CLI). Tests use scripted executors that
//! return predetermined outputs without spawning processes.

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::core::budget::Deadline;
use crate::core::types::Termination;
use crate::io::config::AgentConfig;
use crate::io::process::run_command_with_timeout;

/// Parameters for an executor invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Index the attempt will be recorded under.
    pub index: u32,
    /// Working directory for the agent process (the experiment directory).
    pub workdir: PathBuf,
    pub prompt: String,
    /// Agent session to resume, if an earlier attempt reported one.
    pub session_id: Option<String>,
    /// Hard wall-clock budget for the whole invocation, retries included.
    pub timeout: Duration,
}

/// What the agent left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub termination: Termination,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Abstraction over agent execution backends.
///
/// An `Err` means the agent could not be run at all; the caller records it as
/// a launch failure rather than aborting.
pub trait Executor {
    fn exec(&self, request: &ExecRequest) -> Result<ExecOutput>;

    /// Check, before the first attempt, that the backend can run in `workdir`.
    ///
    /// An `Err` is a configuration problem the operator has to fix.
    fn preflight(&self, _workdir: &Path) -> Result<()> {
        Ok(())
    }
}

/// Executor that spawns the configured agent CLI.
pub struct CommandExecutor {
    agent: AgentConfig,
    retry_patterns: Vec<Regex>,
}

impl CommandExecutor {
    pub fn new(agent: AgentConfig) -> Result<Self> {
        let retry_patterns = agent.retry.compile_patterns()?;
        Ok(Self {
            agent,
            retry_patterns,
        })
    }

    /// Assemble `program args… [tools] [resume] [prompt]`.
    pub fn build_command(&self, request: &ExecRequest) -> Command {
        let agent = &self.agent;
        let mut cmd = Command::new(&agent.program);
        cmd.args(&agent.args);
        if !agent.allowed_tools.is_empty() && !agent.allowed_tools_flag.is_empty() {
            cmd.arg(&agent.allowed_tools_flag)
                .arg(agent.allowed_tools.join(","));
        }
        if let Some(session) = &request.session_id
            && !agent.resume_flag.is_empty()
        {
            cmd.arg(&agent.resume_flag).arg(session);
        }
        if !agent.prompt_flag.is_empty() {
            cmd.arg(&agent.prompt_flag);
        }
        cmd.arg(&request.prompt).current_dir(&request.workdir);
        cmd
    }

    fn is_transient(&self, stderr: &[u8]) -> bool {
        let text = String::from_utf8_lossy(stderr);
        self.retry_patterns.iter().any(|re| re.is_match(&text))
    }
}

impl Executor for CommandExecutor {
    #[instrument(skip_all, fields(index = request.index, timeout_secs = request.timeout.as_secs()))]
    fn exec(&self, request: &ExecRequest) -> Result<ExecOutput> {
        let deadline = Deadline::after(request.timeout);
        let delay = Duration::from_secs(self.agent.retry.delay_secs);
        let mut earlier_stderr = Vec::new();
        let mut attempt = 0u32;

        loop {
            if deadline.is_expired() {
                warn!("no time left in iteration budget, not starting agent");
                return Ok(ExecOutput {
                    termination: Termination::TimedOut,
                    stdout: Vec::new(),
                    stderr: earlier_stderr,
                });
            }
            attempt += 1;
            info!(
                attempt,
                program = %self.agent.program,
                resume = request.session_id.is_some(),
                "starting agent"
            );
            let output = run_command_with_timeout(self.build_command(request), deadline.remaining())?;
            let termination = output.termination();

            let retryable = !termination.is_success()
                && !output.timed_out
                && attempt <= self.agent.retry.max_retries
                && self.is_transient(&output.stderr);
            if retryable && deadline.allows_pause(delay) {
                warn!(
                    attempt,
                    exit_code = termination.exit_code(),
                    delay_secs = delay.as_secs(),
                    "transient agent failure, retrying"
                );
                earlier_stderr.extend_from_slice(
                    format!("[attempt {attempt} failed: {termination}]\n").as_bytes(),
                );
                earlier_stderr.extend_from_slice(&output.stderr);
                if !earlier_stderr.ends_with(b"\n") {
                    earlier_stderr.push(b'\n');
                }
                thread::sleep(delay);
                continue;
            }

            debug!(attempt, %termination, "agent finished");
            let mut stderr = earlier_stderr;
            stderr.extend_from_slice(&output.stderr);
            return Ok(ExecOutput {
                termination,
                stdout: output.stdout,
                stderr,
            });
        }
    }

    fn preflight(&self, workdir: &Path) -> Result<()> {
        let program = &self.agent.program;
        let resolved = resolve_program(program, workdir).ok_or_else(|| {
            anyhow!("agent program {program:?} not found (is it installed and on PATH?)")
        })?;
        debug!(program = %resolved.display(), "agent program resolved");
        Ok(())
    }
}

/// Locate `program` the way it will be spawned from `workdir`.
///
/// Names containing a path separator are checked as given (relative ones
/// against `workdir` and the current directory); bare names are searched on
/// `PATH`.
pub fn resolve_program(program: &str, workdir: &Path) -> Option<PathBuf> {
    let given = Path::new(program);
    if given.components().count() > 1 {
        return [workdir.join(given), given.to_path_buf()]
            .into_iter()
            .find(|path| path.is_file());
    }
    let path_var = env::var_os("PATH")?;
    env::split_paths(&path_var)
        .flat_map(|dir| program_candidates(&dir, program))
        .find(|path| path.is_file())
}

fn program_candidates(dir: &Path, program: &str) -> Vec<PathBuf> {
    let mut candidates = vec![dir.join(program)];
    if cfg!(windows) {
        candidates.push(dir.join(format!("{program}.exe")));
    }
    candidates
}
