//! Tracing setup for the supervisor binary.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: diagnostics filtered by `RUST_LOG` (default
//!   `info`), written to stderr and, for commands that operate on an
//!   experiment, appended to `logs/supervisor.log`.
//!
//! - **Iteration logging (`io/iteration_log`)**: the agent's captured output in
//!   `logs/iter_<n>_*`. Always written, unaffected by `RUST_LOG`.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// When `journal` is set, events are also appended to that file without ANSI
/// colors.
///
/// # Example
/// ```bash
/// RUST_LOG=supervisor=debug supervisor run ./experiment
/// ```
pub fn init(journal: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let journal_layer = match journal {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create log dir {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open journal {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .with(journal_layer)
        .try_init()
        .context("install tracing subscriber")
}
