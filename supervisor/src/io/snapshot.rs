//! Cheap fingerprint of the experiment directory.
//!
//! Hashes each file's relative path, size and modification time. File contents
//! are not read, so the fingerprint stays fast on large datasets. Supervisor
//! bookkeeping (`status.json`, `logs/`, temp files) is excluded.

use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::io::paths::ExperimentPaths;

/// Hex digest over the experiment directory's file listing.
pub fn workspace_fingerprint(paths: &ExperimentPaths) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut files = 0usize;
    let walker = WalkDir::new(&paths.root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.path() != paths.logs_dir);

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            // Files may disappear while the agent is still cleaning up.
            Err(err) => {
                warn!(err = %err, "skipping unreadable entry in fingerprint");
                continue;
            }
        };
        if !entry.file_type().is_file() || paths.is_bookkeeping(entry.path()) {
            continue;
        }
        let meta = entry
            .metadata()
            .with_context(|| format!("stat {}", entry.path().display()))?;
        let rel = entry
            .path()
            .strip_prefix(&paths.root)
            .unwrap_or(entry.path());
        let mtime_ns = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_nanos());

        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update([0]);
        hasher.update(meta.len().to_le_bytes());
        hasher.update(mtime_ns.to_le_bytes());
        files += 1;
    }

    let digest = hex::encode(hasher.finalize());
    debug!(files, digest = %&digest[..12], "workspace fingerprint");
    Ok(digest)
}
