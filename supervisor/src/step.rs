//! One supervisor iteration: render the prompt, invoke the agent, fold the
//! attempt into the state and evaluate it.
//!
//! Persisting the result is left to the caller (`looping`), which owns the
//! state store.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::core::evaluator::evaluate;
use crate::core::report::{AgentReport, parse_agent_report};
use crate::core::state::ExperimentState;
use crate::core::types::{IterationRecord, Verdict};
use crate::invoker::AgentInvoker;
use crate::io::config::SupervisorConfig;
use crate::io::executor::{ExecRequest, Executor};
use crate::io::paths::{ExperimentPaths, LOGS_DIR};
use crate::io::prompt::{PreviousAttempt, PromptInputs, PromptRenderer};

/// Result of a single iteration.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub record: IterationRecord,
    pub verdict: Verdict,
    /// Parsed agent summary, if stdout carried one.
    pub report: Option<AgentReport>,
}

/// Everything an iteration needs besides the state itself.
pub struct Stepper<'a, E: Executor> {
    paths: &'a ExperimentPaths,
    config: &'a SupervisorConfig,
    invoker: AgentInvoker<'a, E>,
    renderer: PromptRenderer,
}

impl<'a, E: Executor> Stepper<'a, E> {
    pub fn new(
        paths: &'a ExperimentPaths,
        config: &'a SupervisorConfig,
        executor: &'a E,
        renderer: PromptRenderer,
    ) -> Self {
        Self {
            paths,
            config,
            invoker: AgentInvoker::new(executor, paths.clone()),
            renderer,
        }
    }

    /// Whether the completion artifact is present right now.
    pub fn artifact_present(&self) -> bool {
        self.paths
            .artifact_path(&self.config.completion_artifact)
            .exists()
    }

    /// Run attempt `state.iteration + 1` and fold it into `state`.
    pub fn run_step(&self, state: &mut ExperimentState) -> Result<StepOutcome> {
        let index = state.next_index();
        info!(index, "starting iteration");

        let prompt = self.renderer.render(&PromptInputs {
            index,
            max_iterations: self.config.max_iterations,
            artifact: &self.config.completion_artifact,
            required_files: &self.config.required_files,
            allowed_tools: &self.config.agent.allowed_tools,
            previous: self.previous_attempt(state),
        })?;
        debug!(index, prompt_bytes = prompt.len(), "prompt rendered");

        let request = ExecRequest {
            index,
            workdir: self.paths.root.clone(),
            prompt,
            session_id: state.session_id.clone(),
            timeout: Duration::from_secs(self.config.iteration_timeout_secs),
        };
        let record = self.invoker.invoke(&request)?;

        let report = parse_agent_report(&record.stdout);
        if let Some(report) = &report {
            info!(
                index,
                session_id = ?report.session_id,
                cost_usd = ?report.cost_usd,
                total_cost = ?report.total_cost,
                num_turns = ?report.num_turns,
                "agent report"
            );
            if report.reported_error() {
                let result = report.result_text().unwrap_or("");
                warn!(index, result, "agent reported an error");
            } else if let Some(result) = report.result_text() {
                debug!(index, result, "agent result");
            }
        }

        state
            .record_attempt(&record, Utc::now())
            .with_context(|| format!("record iteration {index}"))?;
        state.remember_session(report.as_ref().and_then(|r| r.session_id.clone()));

        let verdict = evaluate(
            state,
            &record,
            self.artifact_present(),
            &self.config.evaluation_policy(),
        );
        match &verdict {
            Verdict::Continue => debug!(index, "continuing"),
            Verdict::Stop(reason) => info!(index, %reason, "stopping"),
        }
        Ok(StepOutcome {
            record,
            verdict,
            report,
        })
    }

    fn previous_attempt(&self, state: &ExperimentState) -> Option<PreviousAttempt> {
        let index = state.iteration;
        if index == 0 {
            return None;
        }
        let outcome = match self.invoker.log().read(index) {
            Ok(Some(stored)) => stored.meta.map(|m| m.termination.to_string()),
            Ok(None) => None,
            Err(err) => {
                warn!(index, err = %format!("{err:#}"), "could not read previous iteration");
                None
            }
        }
        .or_else(|| state.last_exit_code.map(|code| format!("exited with code {code}")))
        .unwrap_or_else(|| "finished".to_string());

        Some(PreviousAttempt {
            index,
            outcome,
            stdout_path: format!("{LOGS_DIR}/iter_{index}_stdout.txt"),
            stderr_path: format!("{LOGS_DIR}/iter_{index}_stderr.txt"),
        })
    }
}
