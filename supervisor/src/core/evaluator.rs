//! Progress evaluation after each attempt.

use crate::core::state::ExperimentState;
use crate::core::types::{IterationRecord, StopReason, Verdict};

/// Limits the evaluator enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationPolicy {
    pub max_iterations: u32,
    pub max_consecutive_failures: u32,
}

/// Decide whether the loop continues after `latest`.
///
/// `state` must already include `latest` (`state.iteration == latest.index`).
/// Rules are checked in order: completion artifact, persistent failure,
/// iteration budget.
pub fn evaluate(
    state: &ExperimentState,
    latest: &IterationRecord,
    artifact_present: bool,
    policy: &EvaluationPolicy,
) -> Verdict {
    if artifact_present {
        return Verdict::Stop(StopReason::GoalReached);
    }
    if !latest.is_success() && state.consecutive_failures >= policy.max_consecutive_failures {
        return Verdict::Stop(StopReason::PersistentFailure {
            consecutive_failures: state.consecutive_failures,
        });
    }
    if state.iteration >= policy.max_iterations {
        return Verdict::Stop(StopReason::IterationBudgetExhausted {
            iteration: state.iteration,
            max_iterations: policy.max_iterations,
        });
    }
    Verdict::Continue
}

/// Stop reason that applies before any attempt is made, if one does.
///
/// Covers a resumed experiment whose artifact already exists or whose
/// iteration budget was used up by an earlier run.
pub fn stop_before_attempt(
    state: &ExperimentState,
    artifact_present: bool,
    policy: &EvaluationPolicy,
) -> Option<StopReason> {
    if artifact_present {
        return Some(StopReason::GoalReached);
    }
    if state.iteration >= policy.max_iterations {
        return Some(StopReason::IterationBudgetExhausted {
            iteration: state.iteration,
            max_iterations: policy.max_iterations,
        });
    }
    None
}
