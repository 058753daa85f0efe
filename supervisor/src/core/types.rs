//! Shared deterministic types for supervisor core logic.
//!
//! These types define the contracts between the invoker, the evaluator and the
//! watchdog. They carry no I/O and serialize to stable JSON.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exit code recorded when the agent was killed for exceeding its time budget.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code recorded when the agent could not be started at all.
pub const LAUNCH_FAILURE_EXIT_CODE: i32 = 127;

/// How an agent invocation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Termination {
    /// The process exited on its own with `code`.
    Exited { code: i32 },
    /// The process was terminated by a signal it did not ask for.
    Signaled { signal: Option<i32> },
    /// The process exceeded its budget and was killed.
    TimedOut,
    /// The process never ran (missing executable, permissions, wait failure).
    LaunchFailed { message: String },
}

impl Termination {
    /// Integer status persisted as `last_exit_code`.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Exited { code } => *code,
            Self::Signaled { signal } => 128 + signal.unwrap_or(0),
            Self::TimedOut => TIMEOUT_EXIT_CODE,
            Self::LaunchFailed { .. } => LAUNCH_FAILURE_EXIT_CODE,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited { code: 0 })
    }

    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::Exited { code: 0 } => FailureClass::None,
            Self::Exited { .. } => FailureClass::Application,
            Self::Signaled { .. } | Self::TimedOut | Self::LaunchFailed { .. } => {
                FailureClass::Process
            }
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited { code } => write!(f, "exited with code {code}"),
            Self::Signaled { signal: Some(signal) } => write!(f, "killed by signal {signal}"),
            Self::Signaled { signal: None } => f.write_str("killed by unknown signal"),
            Self::TimedOut => f.write_str("timed out"),
            Self::LaunchFailed { message } => write!(f, "failed to launch: {message}"),
        }
    }
}

/// Whether a failed attempt was the agent's own doing or the process level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    #[default]
    None,
    /// The agent ran and reported failure through a non-zero exit.
    Application,
    /// The agent was killed, timed out, or never started.
    Process,
}

/// One attempt's captured output.
///
/// Created once per invocation and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationRecord {
    /// Equals the `iteration` value the attempt was recorded under.
    pub index: u32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub termination: Termination,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// The experiment directory fingerprint differed before and after the attempt.
    pub workspace_changed: bool,
}

impl IterationRecord {
    pub fn exit_code(&self) -> i32 {
        self.termination.exit_code()
    }

    pub fn is_success(&self) -> bool {
        self.termination.is_success()
    }

    /// An attempt that emitted output or touched the workspace counts as progress.
    pub fn made_progress(&self) -> bool {
        !self.stdout.is_empty() || self.workspace_changed
    }
}

/// Why the watchdog considers an experiment stalled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StallReason {
    /// Total wall-clock time since the experiment started exceeded the ceiling.
    Elapsed { hours: f64, limit_hours: f64 },
    TooManyIterations { iteration: u32, limit: u32 },
    /// No progress was recorded for longer than the ceiling.
    NoProgress { hours: f64, limit_hours: f64 },
}

impl fmt::Display for StallReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Elapsed { hours, limit_hours } => {
                write!(f, "running for {hours:.1}h (limit {limit_hours}h)")
            }
            Self::TooManyIterations { iteration, limit } => {
                write!(f, "iteration {iteration} exceeds limit {limit}")
            }
            Self::NoProgress { hours, limit_hours } => {
                write!(f, "no progress for {hours:.1}h (limit {limit_hours}h)")
            }
        }
    }
}

/// Why the supervisor loop (or the watchdog) stopped an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopReason {
    GoalReached,
    PersistentFailure { consecutive_failures: u32 },
    IterationBudgetExhausted { iteration: u32, max_iterations: u32 },
    Stalled { reason: StallReason },
    /// Recorded with `complete = false`; fixing the configuration allows a resume.
    ConfigurationError { message: String },
}

impl StopReason {
    /// Short, stable label for the reason.
    pub fn label(&self) -> &'static str {
        match self {
            Self::GoalReached => "goal reached",
            Self::PersistentFailure { .. } => "persistent failure",
            Self::IterationBudgetExhausted { .. } => "iteration budget exhausted",
            Self::Stalled { .. } => "stalled",
            Self::ConfigurationError { .. } => "configuration error",
        }
    }

    /// Whether this reason marks the experiment complete when persisted.
    pub fn completes(&self) -> bool {
        !matches!(self, Self::ConfigurationError { .. })
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PersistentFailure {
                consecutive_failures,
            } => write!(
                f,
                "{} ({consecutive_failures} consecutive failures)",
                self.label()
            ),
            Self::IterationBudgetExhausted {
                iteration,
                max_iterations,
            } => write!(f, "{} ({iteration}/{max_iterations})", self.label()),
            Self::Stalled { reason } => write!(f, "{}: {reason}", self.label()),
            Self::ConfigurationError { message } => write!(f, "{}: {message}", self.label()),
            Self::GoalReached => f.write_str(self.label()),
        }
    }
}

/// Outcome of the progress evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Continue,
    Stop(StopReason),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_distinguish_termination_kinds() {
        assert_eq!(Termination::Exited { code: 3 }.exit_code(), 3);
        assert_eq!(
            Termination::Signaled { signal: Some(9) }.exit_code(),
            128 + 9
        );
        assert_eq!(Termination::TimedOut.exit_code(), TIMEOUT_EXIT_CODE);
        assert_eq!(
            Termination::LaunchFailed {
                message: "missing".to_string()
            }
            .exit_code(),
            LAUNCH_FAILURE_EXIT_CODE
        );
    }

    #[test]
    fn failure_classes() {
        assert_eq!(
            Termination::Exited { code: 0 }.failure_class(),
            FailureClass::None
        );
        assert_eq!(
            Termination::Exited { code: 1 }.failure_class(),
            FailureClass::Application
        );
        assert_eq!(Termination::TimedOut.failure_class(), FailureClass::Process);
    }

    #[test]
    fn stop_reason_serializes_with_kind_tag() {
        let reason = StopReason::Stalled {
            reason: StallReason::TooManyIterations {
                iteration: 21,
                limit: 20,
            },
        };
        let json = serde_json::to_value(&reason).expect("serialize");
        assert_eq!(json["kind"], "stalled");
        assert_eq!(json["reason"]["kind"], "too_many_iterations");

        let back: StopReason = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, reason);
    }

    #[test]
    fn stop_reason_display_starts_with_label() {
        let reason = StopReason::IterationBudgetExhausted {
            iteration: 3,
            max_iterations: 3,
        };
        assert_eq!(reason.to_string(), "iteration budget exhausted (3/3)");
        assert_eq!(StopReason::GoalReached.to_string(), "goal reached");
        assert!(
            !StopReason::ConfigurationError {
                message: "x".to_string()
            }
            .completes()
        );
    }

    #[test]
    fn empty_attempt_without_workspace_change_is_not_progress() {
        let record = IterationRecord {
            index: 1,
            started_at: Utc::now(),
            duration_ms: 5,
            termination: Termination::Exited { code: 0 },
            stdout: Vec::new(),
            stderr: b"noise".to_vec(),
            workspace_changed: false,
        };
        assert!(!record.made_progress());
        assert!(
            IterationRecord {
                workspace_changed: true,
                ..record
            }
            .made_progress()
        );
    }
}
