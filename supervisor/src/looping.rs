//! The supervisor loop: load state, run iterations, persist, stop.

use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::Utc;
use tracing::{info, warn};

use crate::core::evaluator::stop_before_attempt;
use crate::core::state::ExperimentState;
use crate::core::types::{StopReason, Verdict};
use crate::io::config::SupervisorConfig;
use crate::io::executor::Executor;
use crate::io::paths::ExperimentPaths;
use crate::io::prompt::PromptRenderer;
use crate::io::state_store::{LoadStatus, StateStore};
use crate::step::{StepOutcome, Stepper};

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopStop {
    /// `complete` was already set, by an earlier run or by the watchdog.
    AlreadyComplete { reason: Option<StopReason> },
    /// This run decided to stop.
    Stopped(StopReason),
}

impl LoopStop {
    pub fn reason(&self) -> Option<&StopReason> {
        match self {
            Self::AlreadyComplete { reason } => reason.as_ref(),
            Self::Stopped(reason) => Some(reason),
        }
    }
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    /// `iteration` as loaded when the loop started.
    pub started_at_iteration: u32,
    pub iterations_run: u32,
    pub final_iteration: u32,
    pub stop: LoopStop,
}

/// Run iterations in `root` until the experiment stops.
///
/// Per-iteration failures (agent errors, timeouts, launch failures) are
/// recorded and evaluated, never returned. Errors are returned only when
/// `root` is missing or the state and log stores cannot be written.
pub fn run_loop<E: Executor, F: FnMut(&StepOutcome)>(
    root: &Path,
    executor: &E,
    config: &SupervisorConfig,
    mut on_iteration: F,
) -> Result<LoopOutcome> {
    if !root.is_dir() {
        return Err(anyhow!(
            "experiment directory {} does not exist",
            root.display()
        ));
    }
    let paths = ExperimentPaths::new(root);
    let store = StateStore::new(&paths.state_path);

    let (mut state, status) = store.load_or_fresh(Utc::now());
    if let LoadStatus::Recovered { problem } = &status {
        warn!(%problem, "resuming with fresh state after corrupt record");
    }
    let started_at_iteration = state.iteration;
    let mut iterations_run = 0u32;
    let finish = |state: &ExperimentState, iterations_run: u32, stop: LoopStop| {
        info!(
            iteration = state.iteration,
            iterations_run,
            reason = ?stop.reason().map(ToString::to_string),
            "supervisor stopped"
        );
        LoopOutcome {
            started_at_iteration,
            iterations_run,
            final_iteration: state.iteration,
            stop,
        }
    };

    if state.complete {
        let reason = state.stop_reason.clone();
        return Ok(finish(&state, 0, LoopStop::AlreadyComplete { reason }));
    }
    state.clear_pending_stop();
    info!(
        dir = %root.display(),
        iteration = state.iteration,
        "supervisor starting"
    );

    if let Some(reason) = preflight(&paths, config, executor) {
        warn!(%reason, "preflight failed");
        state.stop(reason.clone(), Utc::now());
        store.commit(&mut state)?;
        return Ok(finish(&state, 0, LoopStop::Stopped(reason)));
    }
    let renderer = match PromptRenderer::new(config.agent.prompt_template.as_deref()) {
        Ok(renderer) => renderer,
        Err(err) => {
            let reason = StopReason::ConfigurationError {
                message: format!("{err:#}"),
            };
            state.stop(reason.clone(), Utc::now());
            store.commit(&mut state)?;
            return Ok(finish(&state, 0, LoopStop::Stopped(reason)));
        }
    };
    let stepper = Stepper::new(&paths, config, executor, renderer);
    let policy = config.evaluation_policy();
    let pause = Duration::from_millis(config.pause_between_iterations_ms);

    loop {
        absorb_external_completion(&store, &mut state);
        if state.complete {
            let reason = state.stop_reason.clone();
            return Ok(finish(&state, iterations_run, LoopStop::AlreadyComplete { reason }));
        }
        if let Some(reason) = stop_before_attempt(&state, stepper.artifact_present(), &policy) {
            state.stop(reason.clone(), Utc::now());
            store.commit(&mut state)?;
            return Ok(finish(&state, iterations_run, LoopStop::Stopped(reason)));
        }

        let step = stepper.run_step(&mut state)?;
        iterations_run += 1;
        on_iteration(&step);

        // A watchdog stop during the attempt wins over this attempt's verdict;
        // its report would otherwise read as the goal being reached.
        if absorb_external_completion(&store, &mut state) {
            store.save(&state)?;
            let reason = state.stop_reason.clone();
            return Ok(finish(&state, iterations_run, LoopStop::AlreadyComplete { reason }));
        }

        match step.verdict {
            Verdict::Stop(reason) => {
                state.stop(reason.clone(), Utc::now());
                store.commit(&mut state)?;
                return Ok(finish(&state, iterations_run, LoopStop::Stopped(reason)));
            }
            Verdict::Continue => {
                store.commit(&mut state)?;
                if !pause.is_zero() {
                    thread::sleep(pause);
                }
            }
        }
    }
}

/// Fold in a completion written to the store by another process.
fn absorb_external_completion(store: &StateStore, state: &mut ExperimentState) -> bool {
    match store.load() {
        Ok(Some(on_disk)) => state.absorb_external_completion(&on_disk),
        _ => false,
    }
}

fn preflight<E: Executor>(
    paths: &ExperimentPaths,
    config: &SupervisorConfig,
    executor: &E,
) -> Option<StopReason> {
    let missing: Vec<&str> = config
        .required_files
        .iter()
        .map(String::as_str)
        .filter(|name| !paths.root.join(name).exists())
        .collect();
    if !missing.is_empty() {
        return Some(StopReason::ConfigurationError {
            message: format!("missing required files: {}", missing.join(", ")),
        });
    }
    executor
        .preflight(&paths.root)
        .err()
        .map(|err| StopReason::ConfigurationError {
            message: format!("{err:#}"),
        })
}
