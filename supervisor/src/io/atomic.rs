//! Crash-atomic file replacement.
//!
//! Contents are written to a temp file in the target's directory, synced,
//! renamed over the target, and the directory is synced so the rename itself
//! survives a power loss. A reader sees either the previous file or the new
//! one, never a prefix. Temp names carry the writer's pid so the supervisor and
//! the watchdog never share one.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};

/// Atomically replace `path` with `contents`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;

    let tmp_path = temp_path_for(path)?;
    if let Err(err) = write_and_sync(&tmp_path, contents) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err).with_context(|| format!("replace {}", path.display()));
    }
    sync_dir(parent);
    debug!(path = %path.display(), bytes = contents.len(), "atomic write complete");
    Ok(())
}

fn temp_path_for(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("invalid file path {}", path.display()))?;
    Ok(path.with_file_name(format!(".{name}.{}.tmp", std::process::id())))
}

fn write_and_sync(path: &Path, contents: &[u8]) -> Result<()> {
    let mut file =
        File::create(path).with_context(|| format!("create temp file {}", path.display()))?;
    file.write_all(contents)
        .with_context(|| format!("write temp file {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("sync temp file {}", path.display()))
}

// Directory fsync failure is not fatal: the rename already happened.
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(err) = File::open(dir).and_then(|d| d.sync_all()) {
        warn!(dir = %dir.display(), err = %err, "directory sync failed");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
