//! Experiment supervisor CLI.
//!
//! Runs an agent in an experiment directory iteration by iteration, resumes
//! after interruptions, and audits running experiments for stalls.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use supervisor::core::types::StopReason;
use supervisor::exit_codes;
use supervisor::io::config::{SupervisorConfig, load_config};
use supervisor::io::executor::CommandExecutor;
use supervisor::io::init::{InitOptions, init_experiment};
use supervisor::io::paths::ExperimentPaths;
use supervisor::io::state_store::StateStore;
use supervisor::logging;
use supervisor::looping::{LoopStop, run_loop};
use supervisor::watchdog::{AuditOutcome, audit};

#[derive(Parser)]
#[command(
    name = "supervisor",
    version,
    about = "Crash-safe supervisor for iterative agent experiments"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the experiment directory and a default `supervisor.toml`.
    Init {
        dir: PathBuf,
        /// Overwrite an existing `supervisor.toml`.
        #[arg(short, long)]
        force: bool,
    },
    /// Run iterations until the goal is reached or a budget runs out.
    Run {
        dir: PathBuf,
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Per-iteration time budget in seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Extra tool permission passed to the agent (repeatable).
        #[arg(long = "allow-tool", value_name = "TOOL")]
        allow_tools: Vec<String>,
    },
    /// Check an experiment for stalls; force completion if it is stuck.
    Watchdog {
        dir: PathBuf,
        #[arg(long)]
        max_hours: Option<f64>,
        #[arg(long)]
        max_iterations: Option<u32>,
        #[arg(long)]
        no_progress_hours: Option<f64>,
    },
    /// Print the experiment's state record.
    Status {
        dir: PathBuf,
        /// Print the raw JSON record.
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::FATAL
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();

    let journal = match &cli.command {
        Command::Run { dir, .. } | Command::Watchdog { dir, .. } if dir.is_dir() => {
            Some(ExperimentPaths::new(dir).journal_path)
        }
        _ => None,
    };
    if let Err(err) = logging::init(journal.as_deref()) {
        eprintln!("warning: {err:#}");
    }

    match cli.command {
        Command::Init { dir, force } => cmd_init(&dir, force),
        Command::Run {
            dir,
            max_iterations,
            timeout_secs,
            allow_tools,
        } => cmd_run(&dir, max_iterations, timeout_secs, allow_tools),
        Command::Watchdog {
            dir,
            max_hours,
            max_iterations,
            no_progress_hours,
        } => cmd_watchdog(&dir, max_hours, max_iterations, no_progress_hours),
        Command::Status { dir, json } => cmd_status(&dir, json),
    }
}

fn cmd_init(dir: &Path, force: bool) -> Result<i32> {
    let paths = init_experiment(dir, &InitOptions { force })?;
    println!("wrote {}", paths.config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(
    dir: &Path,
    max_iterations: Option<u32>,
    timeout_secs: Option<u64>,
    allow_tools: Vec<String>,
) -> Result<i32> {
    let paths = ExperimentPaths::new(dir);
    let mut config = load_config(&paths.config_path)?;
    if let Some(max) = max_iterations {
        config.max_iterations = max;
    }
    if let Some(secs) = timeout_secs {
        config.iteration_timeout_secs = secs;
    }
    config.agent.allowed_tools.extend(allow_tools);
    config.validate()?;

    let executor = CommandExecutor::new(config.agent.clone())?;
    let outcome = run_loop(dir, &executor, &config, |step| {
        println!(
            "iteration {}: {} ({} ms)",
            step.record.index, step.record.termination, step.record.duration_ms
        );
    })?;

    let code = match &outcome.stop {
        LoopStop::AlreadyComplete { reason } => {
            match reason {
                Some(reason) => println!("experiment already complete: {reason}"),
                None => println!("experiment already complete"),
            }
            exit_codes::OK
        }
        LoopStop::Stopped(reason) => {
            println!(
                "stopped after iteration {}: {reason}",
                outcome.final_iteration
            );
            stop_exit_code(reason)
        }
    };
    Ok(code)
}

fn stop_exit_code(reason: &StopReason) -> i32 {
    match reason {
        StopReason::GoalReached => exit_codes::OK,
        StopReason::ConfigurationError { .. } => exit_codes::CONFIG_ERROR,
        StopReason::PersistentFailure { .. }
        | StopReason::IterationBudgetExhausted { .. }
        | StopReason::Stalled { .. } => exit_codes::STOPPED,
    }
}

fn cmd_watchdog(
    dir: &Path,
    max_hours: Option<f64>,
    max_iterations: Option<u32>,
    no_progress_hours: Option<f64>,
) -> Result<i32> {
    let paths = ExperimentPaths::new(dir);
    let SupervisorConfig {
        completion_artifact,
        mut watchdog,
        ..
    } = load_config(&paths.config_path)?;
    if let Some(hours) = max_hours {
        watchdog.max_elapsed_hours = hours;
    }
    if let Some(max) = max_iterations {
        watchdog.max_iterations = max;
    }
    if let Some(hours) = no_progress_hours {
        watchdog.no_progress_hours = hours;
    }
    watchdog.validate()?;

    let code = match audit(dir, &completion_artifact, &watchdog.limits(), Utc::now())? {
        AuditOutcome::NoState => {
            println!("Status: no state record");
            exit_codes::OK
        }
        AuditOutcome::AlreadyComplete => {
            println!("Status: already complete");
            exit_codes::OK
        }
        AuditOutcome::Healthy {
            iteration,
            elapsed_hours,
        } => {
            println!("Status: iteration {iteration}, {elapsed_hours:.1} hours");
            exit_codes::OK
        }
        AuditOutcome::Stalled {
            reason,
            report_written,
        } => {
            println!("Status: stalled: {reason}");
            if report_written {
                println!("wrote {completion_artifact}; the experiment will stop before its next iteration");
            }
            exit_codes::STALLED
        }
    };
    Ok(code)
}

fn cmd_status(dir: &Path, json: bool) -> Result<i32> {
    let paths = ExperimentPaths::new(dir);
    let Some(state) = StateStore::new(&paths.state_path).load()? else {
        println!("no state record in {}", dir.display());
        return Ok(exit_codes::OK);
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(exit_codes::OK);
    }
    println!("iteration: {}", state.iteration);
    println!("complete: {}", state.complete);
    if let Some(reason) = &state.stop_reason {
        println!("stop reason: {reason}");
    }
    println!("started at: {}", state.started_at.to_rfc3339());
    println!("last updated: {}", state.last_updated_at.to_rfc3339());
    if let Some(at) = state.last_progress_at {
        println!("last progress: {}", at.to_rfc3339());
    }
    if let Some(code) = state.last_exit_code {
        println!("last exit code: {code}");
    }
    println!("consecutive failures: {}", state.consecutive_failures);
    if let Some(session) = &state.session_id {
        println!("session: {session}");
    }
    Ok(exit_codes::OK)
}
