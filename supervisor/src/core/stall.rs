//! Pure stall detection used by the watchdog.

use chrono::{DateTime, Utc};

use crate::core::state::ExperimentState;
use crate::core::types::StallReason;

/// Ceilings past which an experiment counts as stalled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StallLimits {
    pub max_elapsed_hours: f64,
    pub max_iterations: u32,
    pub no_progress_hours: f64,
}

impl Default for StallLimits {
    fn default() -> Self {
        Self {
            max_elapsed_hours: 24.0,
            max_iterations: 20,
            no_progress_hours: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StallCheck {
    Healthy,
    Stalled(StallReason),
}

/// Check `state` against `limits` at time `now`.
///
/// Conditions are tested in order: total elapsed time, iteration count, time
/// since the last recorded progress. All comparisons are strict.
pub fn check(state: &ExperimentState, now: DateTime<Utc>, limits: &StallLimits) -> StallCheck {
    let elapsed = hours_between(state.started_at, now);
    if elapsed > limits.max_elapsed_hours {
        return StallCheck::Stalled(StallReason::Elapsed {
            hours: elapsed,
            limit_hours: limits.max_elapsed_hours,
        });
    }
    if state.iteration > limits.max_iterations {
        return StallCheck::Stalled(StallReason::TooManyIterations {
            iteration: state.iteration,
            limit: limits.max_iterations,
        });
    }
    let idle = hours_between(state.progress_clock(), now);
    if idle > limits.no_progress_hours {
        return StallCheck::Stalled(StallReason::NoProgress {
            hours: idle,
            limit_hours: limits.no_progress_hours,
        });
    }
    StallCheck::Healthy
}

// Clock skew (a timestamp in the future) reads as zero elapsed time.
fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let secs = (to - from).num_seconds().max(0);
    secs as f64 / 3600.0
}
