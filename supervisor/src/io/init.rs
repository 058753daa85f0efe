//! Scaffolding for a new experiment directory.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};

use super::config::{SupervisorConfig, write_config};
use super::paths::ExperimentPaths;

/// Options for `init_experiment`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Overwrite an existing `supervisor.toml`.
    pub force: bool,
}

/// Create `root` and `logs/`, and write the default `supervisor.toml`.
///
/// Never touches `status.json`, iteration logs or the completion artifact.
pub fn init_experiment(root: &Path, options: &InitOptions) -> Result<ExperimentPaths> {
    let paths = ExperimentPaths::new(root);
    if root.exists() && !root.is_dir() {
        return Err(anyhow!("{} exists but is not a directory", root.display()));
    }
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "{} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }
    fs::create_dir_all(&paths.logs_dir)
        .with_context(|| format!("create directory {}", paths.logs_dir.display()))?;
    write_config(&paths.config_path, &SupervisorConfig::default())?;
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;

    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("exp");

        let paths = init_experiment(&root, &InitOptions { force: false }).expect("init");

        assert!(paths.logs_dir.is_dir());
        assert_eq!(
            load_config(&paths.config_path).expect("config"),
            SupervisorConfig::default()
        );
        assert!(!paths.state_path.exists());
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let temp = tempfile::tempdir().expect("tempdir");
        init_experiment(temp.path(), &InitOptions { force: false }).expect("first");
        let err = init_experiment(temp.path(), &InitOptions { force: false }).unwrap_err();
        assert!(err.to_string().contains("--force"));
        init_experiment(temp.path(), &InitOptions { force: true }).expect("forced");
    }
}
