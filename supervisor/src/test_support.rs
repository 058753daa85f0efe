//! Test-only helpers: a scripted agent and a throwaway experiment directory.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::state::ExperimentState;
use crate::core::types::Termination;
use crate::io::config::SupervisorConfig;
use crate::io::executor::{ExecOutput, ExecRequest, Executor};
use crate::io::paths::ExperimentPaths;
use crate::io::state_store::StateStore;

/// How a scripted attempt ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedOutcome {
    Exit(i32),
    Timeout,
    /// The executor returns an error, as if the program could not be spawned.
    LaunchError(String),
}

/// One scripted agent response.
#[derive(Debug, Clone)]
pub struct ScriptedExec {
    pub outcome: ScriptedOutcome,
    pub stdout: String,
    pub stderr: String,
    /// File the agent writes into the experiment directory before returning.
    pub creates: Option<String>,
}

impl ScriptedExec {
    pub fn success(stdout: &str) -> Self {
        Self {
            outcome: ScriptedOutcome::Exit(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
            creates: None,
        }
    }

    pub fn failure(code: i32) -> Self {
        Self {
            outcome: ScriptedOutcome::Exit(code),
            stdout: String::new(),
            stderr: format!("failed with {code}\n"),
            creates: None,
        }
    }

    pub fn timeout() -> Self {
        Self {
            outcome: ScriptedOutcome::Timeout,
            stdout: String::new(),
            stderr: String::new(),
            creates: None,
        }
    }

    pub fn launch_error(message: &str) -> Self {
        Self {
            outcome: ScriptedOutcome::LaunchError(message.to_string()),
            stdout: String::new(),
            stderr: String::new(),
            creates: None,
        }
    }

    /// Also write `name` into the experiment directory (e.g. the completion artifact).
    pub fn creating(mut self, name: &str) -> Self {
        self.creates = Some(name.to_string());
        self
    }
}

/// Executor that replays a fixed script and records every request it saw.
///
/// Once the script runs out, every further call fails as a launch error.
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<ScriptedExec>>,
    requests: Mutex<Vec<ExecRequest>>,
}

impl ScriptedExecutor {
    pub fn new(script: Vec<ScriptedExec>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn requests(&self) -> Vec<ExecRequest> {
        lock(&self.requests).clone()
    }
}

impl Executor for ScriptedExecutor {
    fn exec(&self, request: &ExecRequest) -> Result<ExecOutput> {
        lock(&self.requests).push(request.clone());
        let next = lock(&self.script)
            .pop_front()
            .ok_or_else(|| anyhow!("scripted executor exhausted"))?;
        if let Some(name) = &next.creates {
            fs::write(request.workdir.join(name), "written by scripted agent\n")
                .with_context(|| format!("create {name}"))?;
        }
        let termination = match next.outcome {
            ScriptedOutcome::Exit(code) => Termination::Exited { code },
            ScriptedOutcome::Timeout => Termination::TimedOut,
            ScriptedOutcome::LaunchError(message) => return Err(anyhow!(message)),
        };
        Ok(ExecOutput {
            termination,
            stdout: next.stdout.into_bytes(),
            stderr: next.stderr.into_bytes(),
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Config with no pauses and a short budget, suitable for scripted runs.
pub fn fast_config(max_iterations: u32) -> SupervisorConfig {
    let mut config = SupervisorConfig {
        max_iterations,
        iteration_timeout_secs: 5,
        pause_between_iterations_ms: 0,
        ..SupervisorConfig::default()
    };
    config.agent.retry.delay_secs = 0;
    config
}

/// Temporary experiment directory.
pub struct TestExperiment {
    dir: TempDir,
}

impl TestExperiment {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir().context("create experiment tempdir")?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn paths(&self) -> ExperimentPaths {
        ExperimentPaths::new(self.path())
    }

    pub fn write_file(&self, name: &str, contents: &str) -> Result<()> {
        fs::write(self.path().join(name), contents).with_context(|| format!("write {name}"))
    }

    pub fn store(&self) -> StateStore {
        StateStore::new(self.paths().state_path)
    }

    pub fn load_state(&self) -> Result<Option<ExperimentState>> {
        self.store().load()
    }

    pub fn save_state(&self, state: &ExperimentState) -> Result<()> {
        self.store().save(state)
    }
}
