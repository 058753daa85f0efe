//! Durable storage for the experiment state record (`status.json`).
//!
//! Every write replaces the file atomically. Reads never fail on bad content:
//! a missing record starts a fresh experiment and a corrupt one is reported and
//! replaced by a fresh record, which only loses progress tracking.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::core::state::{ExperimentState, STATE_VERSION};
use crate::io::atomic::write_atomic;

/// How a loaded state came to be.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadStatus {
    Loaded,
    /// No record existed yet.
    Missing,
    /// The record was unreadable or had an unknown version; progress was reset.
    Recovered { problem: String },
}

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record as stored. `Ok(None)` if it does not exist.
    ///
    /// Parse failures are returned as errors; callers that must keep running use
    /// [`StateStore::load_or_fresh`].
    pub fn load(&self) -> Result<Option<ExperimentState>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("read state {}", self.path.display()));
            }
        };
        let state: ExperimentState = serde_json::from_str(&contents)
            .with_context(|| format!("parse state {}", self.path.display()))?;
        if state.version != STATE_VERSION {
            anyhow::bail!(
                "unsupported state version {} in {}",
                state.version,
                self.path.display()
            );
        }
        debug!(iteration = state.iteration, complete = state.complete, "state loaded");
        Ok(Some(state))
    }

    /// Load the record, falling back to a fresh one when it is missing or corrupt.
    pub fn load_or_fresh(&self, now: DateTime<Utc>) -> (ExperimentState, LoadStatus) {
        match self.load() {
            Ok(Some(state)) => (state, LoadStatus::Loaded),
            Ok(None) => {
                info!(path = %self.path.display(), "no state record, starting fresh");
                (ExperimentState::fresh(now), LoadStatus::Missing)
            }
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    err = %format!("{err:#}"),
                    "state record unreadable, progress tracking reset"
                );
                (
                    ExperimentState::fresh(now),
                    LoadStatus::Recovered {
                        problem: format!("{err:#}"),
                    },
                )
            }
        }
    }

    /// Atomically replace the record.
    pub fn save(&self, state: &ExperimentState) -> Result<()> {
        debug!(
            path = %self.path.display(),
            iteration = state.iteration,
            complete = state.complete,
            "writing state"
        );
        let mut buf = serde_json::to_string_pretty(state).context("serialize state")?;
        buf.push('\n');
        write_atomic(&self.path, buf.as_bytes())
            .with_context(|| format!("write state {}", self.path.display()))
    }

    /// Save `state` after folding in a completion another process wrote since it was loaded.
    ///
    /// The watchdog may mark the experiment complete while an attempt is in
    /// flight; that flag must survive the supervisor's next write.
    pub fn commit(&self, state: &mut ExperimentState) -> Result<()> {
        if let Ok(Some(on_disk)) = self.load()
            && state.absorb_external_completion(&on_disk)
        {
            info!(
                reason = ?state.stop_reason,
                "experiment was completed externally while running"
            );
        }
        self.save(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{StallReason, StopReason};

    fn store() -> (tempfile::TempDir, StateStore) {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(temp.path().join("status.json"));
        (temp, store)
    }

    #[test]
    fn save_then_load_preserves_fields() {
        let (_temp, store) = store();
        let mut state = ExperimentState::fresh(Utc::now());
        state.iteration = 7;
        state.session_id = Some("sess".to_string());
        state.stop(StopReason::GoalReached, Utc::now());

        store.save(&state).expect("save");
        assert_eq!(store.load().expect("load"), Some(state));
    }

    #[test]
    fn missing_record_loads_fresh() {
        let (_temp, store) = store();
        let now = Utc::now();
        let (state, status) = store.load_or_fresh(now);
        assert_eq!(status, LoadStatus::Missing);
        assert_eq!(state, ExperimentState::fresh(now));
    }

    #[test]
    fn corrupt_record_recovers_to_fresh_state() {
        let (_temp, store) = store();
        fs::write(store.path(), "{\"iteration\": 4, \"comp").expect("write garbage");
        let (state, status) = store.load_or_fresh(Utc::now());
        assert!(matches!(status, LoadStatus::Recovered { .. }));
        assert_eq!(state.iteration, 0);
        assert!(!state.complete);
    }

    #[test]
    fn unknown_version_is_treated_as_corrupt() {
        let (_temp, store) = store();
        let mut state = ExperimentState::fresh(Utc::now());
        state.version = 99;
        store.save(&state).expect("save");
        let err = store.load().unwrap_err();
        assert!(err.to_string().contains("unsupported state version 99"));
    }

    #[test]
    fn stray_temp_file_does_not_affect_load() {
        let (temp, store) = store();
        let mut state = ExperimentState::fresh(Utc::now());
        state.iteration = 2;
        store.save(&state).expect("save");
        // A writer that crashed before its rename leaves a partial temp file.
        fs::write(temp.path().join(".status.json.999.tmp"), "{\"iter").expect("write tmp");
        assert_eq!(store.load().expect("load").map(|s| s.iteration), Some(2));
    }

    #[test]
    fn commit_keeps_external_completion() {
        let (_temp, store) = store();
        let mut mine = ExperimentState::fresh(Utc::now());
        store.save(&mine).expect("save");

        let mut watchdog_copy = mine.clone();
        watchdog_copy.stop(
            StopReason::Stalled {
                reason: StallReason::TooManyIterations {
                    iteration: 21,
                    limit: 20,
                },
            },
            Utc::now(),
        );
        store.save(&watchdog_copy).expect("watchdog save");

        mine.iteration = 1;
        store.commit(&mut mine).expect("commit");
        let stored = store.load().expect("load").expect("present");
        assert!(stored.complete);
        assert_eq!(stored.iteration, 1);
        assert!(matches!(stored.stop_reason, Some(StopReason::Stalled { .. })));
    }
}
