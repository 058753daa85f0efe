//! Per-iteration output records under `logs/`.
//!
//! Each attempt leaves `iter_<n>_stdout.txt`, `iter_<n>_stderr.txt` and
//! `iter_<n>_meta.json`. Records are written once and never rewritten. If files
//! for an index already exist (the supervisor crashed after logging but before
//! saving state), they are moved to `logs/orphaned/<n>-<k>/` first.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::types::{FailureClass, IterationRecord, Termination};
use crate::io::paths::ExperimentPaths;

/// Summary written next to the captured streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationMeta {
    pub index: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub termination: Termination,
    pub exit_code: i32,
    #[serde(default)]
    pub failure: FailureClass,
    pub workspace_changed: bool,
    pub stdout_bytes: usize,
    pub stderr_bytes: usize,
}

impl IterationMeta {
    fn from_record(record: &IterationRecord) -> Self {
        let elapsed = chrono::Duration::milliseconds(
            i64::try_from(record.duration_ms).unwrap_or(i64::MAX),
        );
        Self {
            index: record.index,
            started_at: record.started_at,
            ended_at: record.started_at + elapsed,
            duration_ms: record.duration_ms,
            termination: record.termination.clone(),
            exit_code: record.exit_code(),
            failure: record.termination.failure_class(),
            workspace_changed: record.workspace_changed,
            stdout_bytes: record.stdout.len(),
            stderr_bytes: record.stderr.len(),
        }
    }
}

/// Paths written for one iteration.
#[derive(Debug, Clone)]
pub struct IterationFiles {
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub meta_path: PathBuf,
}

/// An iteration read back from disk.
#[derive(Debug, Clone)]
pub struct StoredIteration {
    pub meta: Option<IterationMeta>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct IterationLog {
    paths: ExperimentPaths,
}

impl IterationLog {
    pub fn new(paths: ExperimentPaths) -> Self {
        Self { paths }
    }

    fn files(&self, index: u32) -> IterationFiles {
        IterationFiles {
            stdout_path: self.paths.stdout_path(index),
            stderr_path: self.paths.stderr_path(index),
            meta_path: self.paths.meta_path(index),
        }
    }

    /// Persist `record`, archiving any earlier files for the same index.
    pub fn write(&self, record: &IterationRecord) -> Result<IterationFiles> {
        fs::create_dir_all(&self.paths.logs_dir)
            .with_context(|| format!("create logs dir {}", self.paths.logs_dir.display()))?;
        let files = self.files(record.index);
        self.archive_orphans(record.index, &files)?;

        // Meta last: its presence marks a complete record.
        fs::write(&files.stdout_path, &record.stdout)
            .with_context(|| format!("write {}", files.stdout_path.display()))?;
        fs::write(&files.stderr_path, &record.stderr)
            .with_context(|| format!("write {}", files.stderr_path.display()))?;
        let mut meta = serde_json::to_string_pretty(&IterationMeta::from_record(record))
            .context("serialize iteration meta")?;
        meta.push('\n');
        fs::write(&files.meta_path, meta)
            .with_context(|| format!("write {}", files.meta_path.display()))?;

        debug!(
            index = record.index,
            stdout_bytes = record.stdout.len(),
            stderr_bytes = record.stderr.len(),
            "iteration logs written"
        );
        Ok(files)
    }

    /// Read the record for `index`, or `None` if no streams were logged.
    pub fn read(&self, index: u32) -> Result<Option<StoredIteration>> {
        let files = self.files(index);
        let Some(stdout) = read_optional(&files.stdout_path)? else {
            return Ok(None);
        };
        let stderr = read_optional(&files.stderr_path)?.unwrap_or_default();
        let meta = match read_optional(&files.meta_path)? {
            Some(bytes) => match serde_json::from_slice(&bytes) {
                Ok(meta) => Some(meta),
                Err(err) => {
                    warn!(path = %files.meta_path.display(), err = %err, "unreadable iteration meta");
                    None
                }
            },
            None => None,
        };
        Ok(Some(StoredIteration {
            meta,
            stdout,
            stderr,
        }))
    }

    fn archive_orphans(&self, index: u32, files: &IterationFiles) -> Result<()> {
        let existing: Vec<&PathBuf> = [&files.stdout_path, &files.stderr_path, &files.meta_path]
            .into_iter()
            .filter(|path| path.exists())
            .collect();
        if existing.is_empty() {
            return Ok(());
        }

        let mut attempt = 1u32;
        let target_dir = loop {
            let candidate = self.paths.orphaned_dir.join(format!("{index}-{attempt}"));
            if !candidate.exists() {
                break candidate;
            }
            attempt += 1;
        };
        fs::create_dir_all(&target_dir)
            .with_context(|| format!("create orphan dir {}", target_dir.display()))?;
        for path in existing {
            let Some(name) = path.file_name() else {
                continue;
            };
            let dest = target_dir.join(name);
            fs::rename(path, &dest).with_context(|| {
                format!("archive {} to {}", path.display(), dest.display())
            })?;
        }
        warn!(
            index,
            dir = %target_dir.display(),
            "archived logs from an unrecorded earlier attempt"
        );
        Ok(())
    }
}

fn read_optional(path: &std::path::Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: u32, stdout: &[u8]) -> IterationRecord {
        IterationRecord {
            index,
            started_at: Utc::now(),
            duration_ms: 1500,
            termination: Termination::TimedOut,
            stdout: stdout.to_vec(),
            stderr: b"err".to_vec(),
            workspace_changed: true,
        }
    }

    #[test]
    fn writes_streams_and_meta() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = IterationLog::new(ExperimentPaths::new(temp.path()));

        let files = log.write(&record(2, b"\xffbinary")).expect("write");
        assert_eq!(fs::read(&files.stdout_path).expect("stdout"), b"\xffbinary");
        assert_eq!(fs::read(&files.stderr_path).expect("stderr"), b"err");

        let stored = log.read(2).expect("read").expect("present");
        let meta = stored.meta.expect("meta");
        assert_eq!(meta.index, 2);
        assert_eq!(meta.exit_code, 124);
        assert_eq!(meta.termination, Termination::TimedOut);
        assert_eq!(meta.failure, FailureClass::Process);
        assert_eq!(meta.ended_at - meta.started_at, chrono::Duration::milliseconds(1500));
    }

    #[test]
    fn meta_distinguishes_failure_classes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = IterationLog::new(ExperimentPaths::new(temp.path()));
        let mut failed = record(1, b"");
        failed.termination = Termination::Exited { code: 2 };
        log.write(&failed).expect("write");

        let raw = fs::read_to_string(ExperimentPaths::new(temp.path()).meta_path(1)).expect("meta");
        assert!(raw.contains("\"failure\": \"application\""));
    }

    #[test]
    fn read_missing_index_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = IterationLog::new(ExperimentPaths::new(temp.path()));
        assert!(log.read(1).expect("read").is_none());
    }

    #[test]
    fn rewriting_an_index_archives_the_earlier_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ExperimentPaths::new(temp.path());
        let log = IterationLog::new(paths.clone());

        log.write(&record(1, b"first")).expect("first write");
        log.write(&record(1, b"second")).expect("second write");
        log.write(&record(1, b"third")).expect("third write");

        let current = log.read(1).expect("read").expect("present");
        assert_eq!(current.stdout, b"third");
        assert_eq!(
            fs::read(paths.orphaned_dir.join("1-1").join("iter_1_stdout.txt")).expect("orphan 1"),
            b"first"
        );
        assert_eq!(
            fs::read(paths.orphaned_dir.join("1-2").join("iter_1_stdout.txt")).expect("orphan 2"),
            b"second"
        );
    }
}
