//! Canonical file layout of an experiment directory.

use std::path::{Path, PathBuf};

/// State record written by the supervisor and the watchdog.
pub const STATE_FILE: &str = "status.json";
/// Optional per-experiment configuration.
pub const CONFIG_FILE: &str = "supervisor.toml";
pub const LOGS_DIR: &str = "logs";
/// Run journal inside `logs/`.
pub const JOURNAL_FILE: &str = "supervisor.log";

/// All canonical paths for one experiment directory.
#[derive(Debug, Clone)]
pub struct ExperimentPaths {
    pub root: PathBuf,
    pub state_path: PathBuf,
    pub config_path: PathBuf,
    pub logs_dir: PathBuf,
    pub orphaned_dir: PathBuf,
    pub journal_path: PathBuf,
}

impl ExperimentPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let logs_dir = root.join(LOGS_DIR);
        Self {
            state_path: root.join(STATE_FILE),
            config_path: root.join(CONFIG_FILE),
            orphaned_dir: logs_dir.join("orphaned"),
            journal_path: logs_dir.join(JOURNAL_FILE),
            logs_dir,
            root,
        }
    }

    /// Location of the completion artifact named `name`.
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn stdout_path(&self, index: u32) -> PathBuf {
        self.logs_dir.join(format!("iter_{index}_stdout.txt"))
    }

    pub fn stderr_path(&self, index: u32) -> PathBuf {
        self.logs_dir.join(format!("iter_{index}_stderr.txt"))
    }

    pub fn meta_path(&self, index: u32) -> PathBuf {
        self.logs_dir.join(format!("iter_{index}_meta.json"))
    }

    /// Whether `path` is supervisor bookkeeping rather than experiment content.
    pub fn is_bookkeeping(&self, path: &Path) -> bool {
        path == self.state_path || path.starts_with(&self.logs_dir) || is_temp_file(path)
    }
}

/// Temp files left by atomic writes (`.{name}.{pid}.tmp`).
pub fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.') && name.ends_with(".tmp"))
}
