//! Out-of-band stall audit of an experiment directory.
//!
//! The watchdog shares nothing with a running supervisor except the files. When
//! it declares a stall it writes the completion artifact (unless the agent
//! already did) and marks the state complete, so the supervisor stops before its
//! next attempt. An attempt already in flight runs until its own time budget
//! expires; the watchdog has no way to kill it.

use std::path::Path;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::core::stall::{StallCheck, StallLimits, check};
use crate::core::state::ExperimentState;
use crate::core::types::{StallReason, StopReason};
use crate::io::atomic::write_atomic;
use crate::io::paths::ExperimentPaths;
use crate::io::state_store::StateStore;

/// Result of one audit.
#[derive(Debug, Clone, PartialEq)]
pub enum AuditOutcome {
    /// No usable state record; nothing to judge.
    NoState,
    AlreadyComplete,
    Healthy { iteration: u32, elapsed_hours: f64 },
    Stalled {
        reason: StallReason,
        /// False when the artifact already existed and was left untouched.
        report_written: bool,
    },
}

/// Audit the experiment in `root` at time `now`.
///
/// Idempotent: auditing a stalled experiment twice yields `AlreadyComplete`
/// the second time and changes nothing.
pub fn audit(
    root: &Path,
    artifact: &str,
    limits: &StallLimits,
    now: DateTime<Utc>,
) -> Result<AuditOutcome> {
    if !root.is_dir() {
        return Err(anyhow!(
            "experiment directory {} does not exist",
            root.display()
        ));
    }
    let paths = ExperimentPaths::new(root);
    let store = StateStore::new(&paths.state_path);

    let state = match store.load() {
        Ok(Some(state)) => state,
        Ok(None) => return Ok(AuditOutcome::NoState),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "state record unreadable, skipping audit");
            return Ok(AuditOutcome::NoState);
        }
    };
    if state.complete {
        return Ok(AuditOutcome::AlreadyComplete);
    }

    let reason = match check(&state, now, limits) {
        StallCheck::Healthy => {
            let elapsed_hours = (now - state.started_at).num_seconds().max(0) as f64 / 3600.0;
            info!(iteration = state.iteration, elapsed_hours, "experiment healthy");
            return Ok(AuditOutcome::Healthy {
                iteration: state.iteration,
                elapsed_hours,
            });
        }
        StallCheck::Stalled(reason) => reason,
    };
    warn!(%reason, iteration = state.iteration, "experiment stalled");

    let artifact_path = paths.artifact_path(artifact);
    let report_written = !artifact_path.exists();
    if report_written {
        write_atomic(&artifact_path, render_report(&state, &reason, now).as_bytes())?;
    }

    // Apply the stop to the freshest copy so a concurrent supervisor write is not rolled back.
    let mut latest = match store.load() {
        Ok(Some(latest)) => latest,
        _ => state,
    };
    if !latest.complete {
        latest.stop(
            StopReason::Stalled {
                reason: reason.clone(),
            },
            now,
        );
        store.save(&latest)?;
    }
    Ok(AuditOutcome::Stalled {
        reason,
        report_written,
    })
}

fn render_report(state: &ExperimentState, reason: &StallReason, now: DateTime<Utc>) -> String {
    let last_exit = state
        .last_exit_code
        .map_or_else(|| "none".to_string(), |code| code.to_string());
    format!(
        "# Experiment Report (Watchdog Termination)\n\
         \n\
         ## Summary\n\
         - **Status**: Stopped by watchdog\n\
         - **Reason**: {reason}\n\
         - **Iterations completed**: {iteration}\n\
         - **Started**: {started}\n\
         - **Last update**: {updated}\n\
         - **Last exit code**: {last_exit}\n\
         - **Stopped at**: {now}\n\
         \n\
         ## Recommendation\n\
         Check the iteration logs in `logs/` to understand why the experiment did not complete naturally.\n",
        iteration = state.iteration,
        started = state.started_at.to_rfc3339(),
        updated = state.last_updated_at.to_rfc3339(),
        now = now.to_rfc3339(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestExperiment;
    use chrono::Duration;
    use std::fs;

    fn state_started(now: DateTime<Utc>, hours_ago: i64) -> ExperimentState {
        let mut state = ExperimentState::fresh(now - Duration::hours(hours_ago));
        state.iteration = 4;
        state
    }

    #[test]
    fn no_state_is_left_alone() {
        let exp = TestExperiment::new().expect("experiment");
        let outcome = audit(exp.path(), "REPORT.md", &StallLimits::default(), Utc::now())
            .expect("audit");
        assert_eq!(outcome, AuditOutcome::NoState);
        assert!(!exp.path().join("REPORT.md").exists());
        assert!(exp.load_state().expect("load").is_none());
    }

    #[test]
    fn stalled_experiment_gets_report_and_completion() {
        let exp = TestExperiment::new().expect("experiment");
        let now = Utc::now();
        exp.save_state(&state_started(now, 3)).expect("save");

        let outcome =
            audit(exp.path(), "REPORT.md", &StallLimits::default(), now).expect("audit");

        assert!(matches!(
            outcome,
            AuditOutcome::Stalled {
                reason: StallReason::NoProgress { .. },
                report_written: true
            }
        ));
        let report = fs::read_to_string(exp.path().join("REPORT.md")).expect("report");
        assert!(report.starts_with("# Experiment Report (Watchdog Termination)"));
        assert!(report.contains("no progress for 3.0h"));

        let state = exp.load_state().expect("load").expect("state");
        assert!(state.complete);
        assert_eq!(state.iteration, 4);
        assert!(matches!(state.stop_reason, Some(StopReason::Stalled { .. })));
    }

    #[test]
    fn second_audit_is_a_no_op() {
        let exp = TestExperiment::new().expect("experiment");
        let now = Utc::now();
        exp.save_state(&state_started(now, 30)).expect("save");

        audit(exp.path(), "REPORT.md", &StallLimits::default(), now).expect("first");
        let report = fs::read_to_string(exp.path().join("REPORT.md")).expect("report");
        let outcome =
            audit(exp.path(), "REPORT.md", &StallLimits::default(), now).expect("second");

        assert_eq!(outcome, AuditOutcome::AlreadyComplete);
        assert_eq!(
            fs::read_to_string(exp.path().join("REPORT.md")).expect("report"),
            report
        );
    }

    #[test]
    fn existing_agent_report_is_preserved() {
        let exp = TestExperiment::new().expect("experiment");
        let now = Utc::now();
        exp.save_state(&state_started(now, 3)).expect("save");
        exp.write_file("REPORT.md", "agent's own report\n").expect("report");

        let outcome =
            audit(exp.path(), "REPORT.md", &StallLimits::default(), now).expect("audit");

        assert!(matches!(
            outcome,
            AuditOutcome::Stalled {
                report_written: false,
                ..
            }
        ));
        assert_eq!(
            fs::read_to_string(exp.path().join("REPORT.md")).expect("report"),
            "agent's own report\n"
        );
    }

    #[test]
    fn healthy_experiment_is_untouched() {
        let exp = TestExperiment::new().expect("experiment");
        let now = Utc::now();
        let mut state = state_started(now, 1);
        state.last_updated_at = now - Duration::minutes(10);
        exp.save_state(&state).expect("save");

        let outcome =
            audit(exp.path(), "REPORT.md", &StallLimits::default(), now).expect("audit");

        assert!(matches!(outcome, AuditOutcome::Healthy { iteration: 4, .. }));
        assert_eq!(exp.load_state().expect("load"), Some(state));
        assert!(!exp.path().join("REPORT.md").exists());
    }

    #[test]
    fn corrupt_state_is_skipped() {
        let exp = TestExperiment::new().expect("experiment");
        exp.write_file("status.json", "not json").expect("write");
        let outcome = audit(exp.path(), "REPORT.md", &StallLimits::default(), Utc::now())
            .expect("audit");
        assert_eq!(outcome, AuditOutcome::NoState);
    }
}
