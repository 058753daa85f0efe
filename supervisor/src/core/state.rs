//! The durable experiment record and its pure transitions.
//!
//! Persistence lives in `io::state_store`; this module only decides how the
//! record changes. Transitions enforce the record's invariants: `iteration`
//! never decreases and advances by exactly one per recorded attempt, and
//! `complete` never flips back to false.

use anyhow::{Result, ensure};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::{IterationRecord, StopReason};

/// Schema version written into every persisted record.
pub const STATE_VERSION: u32 = 1;

/// Persisted bookkeeping for one experiment directory (`status.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentState {
    pub version: u32,
    /// Number of completed attempts.
    pub iteration: u32,
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    /// Last attempt that emitted output or changed the workspace.
    #[serde(default)]
    pub last_progress_at: Option<DateTime<Utc>>,
    pub complete: bool,
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    #[serde(default)]
    pub last_exit_code: Option<i32>,
    #[serde(default)]
    pub consecutive_failures: u32,
    /// Agent session to resume on the next attempt.
    #[serde(default)]
    pub session_id: Option<String>,
}

impl ExperimentState {
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            version: STATE_VERSION,
            iteration: 0,
            started_at: now,
            last_updated_at: now,
            last_progress_at: None,
            complete: false,
            stop_reason: None,
            last_exit_code: None,
            consecutive_failures: 0,
            session_id: None,
        }
    }

    /// Index the next attempt will be recorded under.
    pub fn next_index(&self) -> u32 {
        self.iteration.saturating_add(1)
    }

    /// Fold a finished attempt into the record.
    ///
    /// Fails if the record was produced for any index other than `iteration + 1`,
    /// which would either skip or repeat an iteration.
    pub fn record_attempt(&mut self, record: &IterationRecord, now: DateTime<Utc>) -> Result<()> {
        ensure!(
            !self.complete,
            "cannot record attempt {} on a completed experiment",
            record.index
        );
        ensure!(
            record.index == self.next_index(),
            "attempt index {} does not follow iteration {}",
            record.index,
            self.iteration
        );
        self.iteration = record.index;
        self.last_exit_code = Some(record.exit_code());
        if record.is_success() {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }
        if record.made_progress() {
            self.last_progress_at = Some(now);
        }
        self.last_updated_at = now;
        Ok(())
    }

    /// Remember the agent session reported by the latest attempt.
    pub fn remember_session(&mut self, session_id: Option<String>) {
        if let Some(id) = session_id.filter(|id| !id.trim().is_empty()) {
            self.session_id = Some(id);
        }
    }

    /// Record a stop. Completing reasons set `complete`; a configuration error does not.
    pub fn stop(&mut self, reason: StopReason, now: DateTime<Utc>) {
        if reason.completes() {
            self.complete = true;
        }
        self.stop_reason = Some(reason);
        self.last_updated_at = now;
    }

    /// Drop a stale configuration-error reason left by a previous run.
    pub fn clear_pending_stop(&mut self) {
        if !self.complete
            && matches!(self.stop_reason, Some(StopReason::ConfigurationError { .. }))
        {
            self.stop_reason = None;
        }
    }

    /// Carry over a completion written by another process since this copy was loaded.
    ///
    /// Returns true if `on_disk` had completed the experiment.
    pub fn absorb_external_completion(&mut self, on_disk: &ExperimentState) -> bool {
        if on_disk.complete && !self.complete {
            self.complete = true;
            self.stop_reason = on_disk.stop_reason.clone();
            return true;
        }
        false
    }

    /// Timestamp the no-progress clock is measured from.
    ///
    /// Until some attempt makes progress this is `started_at`; attempts that
    /// change nothing only move `last_updated_at` and do not reset the clock.
    pub fn progress_clock(&self) -> DateTime<Utc> {
        self.last_progress_at.unwrap_or(self.started_at)
    }
}
