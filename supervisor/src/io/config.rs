//! Experiment configuration stored in `supervisor.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::evaluator::EvaluationPolicy;
use crate::core::stall::StallLimits;
use crate::io::atomic::write_atomic;

/// Supervisor configuration (TOML).
///
/// Meant to be edited by humans. Every field is optional and falls back to
/// the defaults below; CLI flags override individual fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Stop with "iteration budget exhausted" once this many attempts are recorded.
    pub max_iterations: u32,

    /// Hard wall-clock budget per iteration, retries included. Zero makes every
    /// attempt time out immediately.
    pub iteration_timeout_secs: u64,

    /// Stop with "persistent failure" after this many failed attempts in a row.
    pub max_consecutive_failures: u32,

    pub pause_between_iterations_ms: u64,

    /// File whose appearance in the experiment directory means the goal was reached.
    pub completion_artifact: String,

    /// Files that must exist before the first attempt (e.g. `IDEA.md`).
    pub required_files: Vec<String>,

    pub agent: AgentConfig,
    pub watchdog: WatchdogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Tool permissions passed to the agent untouched.
    pub allowed_tools: Vec<String>,
    pub allowed_tools_flag: String,
    /// Flag that precedes the prompt. Empty passes the prompt as a trailing argument.
    pub prompt_flag: String,
    /// Flag that precedes a session id. Empty disables session resumption.
    pub resume_flag: String,
    /// Optional minijinja template replacing the built-in prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
    pub retry: RetryConfig,
}

/// Retry policy for transient agent failures (e.g. rate limiting).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// Regexes matched against stderr of a failed attempt.
    pub patterns: Vec<String>,
    pub max_retries: u32,
    pub delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatchdogConfig {
    pub max_elapsed_hours: f64,
    pub max_iterations: u32,
    pub no_progress_hours: f64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            iteration_timeout_secs: 600,
            max_consecutive_failures: 3,
            pause_between_iterations_ms: 3000,
            completion_artifact: "REPORT.md".to_string(),
            required_files: Vec::new(),
            agent: AgentConfig::default(),
            watchdog: WatchdogConfig::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: vec!["--output-format".to_string(), "json".to_string()],
            allowed_tools: ["Edit", "Write", "WebFetch", "Bash(ls:*)"]
                .into_iter()
                .map(String::from)
                .collect(),
            allowed_tools_flag: "--allowedTools".to_string(),
            prompt_flag: "-p".to_string(),
            resume_flag: "--resume".to_string(),
            prompt_template: None,
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            patterns: vec!["(?i)rate limit".to_string()],
            max_retries: 2,
            delay_secs: 30,
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        let limits = StallLimits::default();
        Self {
            max_elapsed_hours: limits.max_elapsed_hours,
            max_iterations: limits.max_iterations,
            no_progress_hours: limits.no_progress_hours,
        }
    }
}

impl SupervisorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.max_consecutive_failures == 0 {
            return Err(anyhow!("max_consecutive_failures must be > 0"));
        }
        let artifact = self.completion_artifact.trim();
        if artifact.is_empty() || artifact.contains(['/', '\\']) {
            return Err(anyhow!(
                "completion_artifact must be a plain file name, got {:?}",
                self.completion_artifact
            ));
        }
        if self.agent.program.trim().is_empty() {
            return Err(anyhow!("agent.program must be non-empty"));
        }
        self.agent.retry.compile_patterns()?;
        self.watchdog.validate()?;
        Ok(())
    }

    pub fn evaluation_policy(&self) -> EvaluationPolicy {
        EvaluationPolicy {
            max_iterations: self.max_iterations,
            max_consecutive_failures: self.max_consecutive_failures,
        }
    }
}

impl RetryConfig {
    pub fn compile_patterns(&self) -> Result<Vec<Regex>> {
        self.patterns
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("invalid agent.retry pattern {p:?}")))
            .collect()
    }
}

impl WatchdogConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_elapsed_hours.is_nan() || self.max_elapsed_hours <= 0.0 {
            return Err(anyhow!("watchdog.max_elapsed_hours must be > 0"));
        }
        if self.no_progress_hours.is_nan() || self.no_progress_hours <= 0.0 {
            return Err(anyhow!("watchdog.no_progress_hours must be > 0"));
        }
        Ok(())
    }

    pub fn limits(&self) -> StallLimits {
        StallLimits {
            max_elapsed_hours: self.max_elapsed_hours,
            max_iterations: self.max_iterations,
            no_progress_hours: self.no_progress_hours,
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SupervisorConfig::default()`.
pub fn load_config(path: &Path) -> Result<SupervisorConfig> {
    if !path.exists() {
        let cfg = SupervisorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SupervisorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk.
pub fn write_config(path: &Path, cfg: &SupervisorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes()).with_context(|| format!("write config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, SupervisorConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("supervisor.toml");
        let cfg = SupervisorConfig {
            required_files: vec!["IDEA.md".to_string()],
            ..SupervisorConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("supervisor.toml");
        fs::write(
            &path,
            "max_iterations = 4\n\n[agent]\nallowed_tools = [\"Edit\", \"Bash(uv:*)\"]\n\n[watchdog]\nmax_iterations = 8\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.max_iterations, 4);
        assert_eq!(cfg.agent.allowed_tools, vec!["Edit", "Bash(uv:*)"]);
        assert_eq!(cfg.agent.program, "claude");
        assert_eq!(cfg.watchdog.max_iterations, 8);
        assert_eq!(cfg.watchdog.max_elapsed_hours, 24.0);
    }

    #[test]
    fn rejects_invalid_values() {
        let cfg = SupervisorConfig {
            max_iterations: 0,
            ..SupervisorConfig::default()
        };
        assert!(cfg.validate().is_err());

        let mut cfg = SupervisorConfig::default();
        cfg.completion_artifact = "out/REPORT.md".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = SupervisorConfig::default();
        cfg.agent.retry.patterns = vec!["(unclosed".to_string()];
        let err = cfg.validate().unwrap_err();
        assert!(format!("{err:#}").contains("invalid agent.retry pattern"));

        let mut cfg = SupervisorConfig::default();
        cfg.watchdog.no_progress_hours = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("supervisor.toml");
        fs::write(&path, "max_iterations = \"many\"\n").expect("write");
        assert!(load_config(&path).is_err());
    }
}
