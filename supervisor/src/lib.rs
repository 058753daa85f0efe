//! Crash-safe supervisor for long-running, multi-iteration agent experiments.
//!
//! Each iteration runs an external agent as a subprocess under a hard time
//! budget, records its output, and decides whether to continue. Progress is
//! kept in an atomically replaced state record so a restarted supervisor
//! resumes where it left off. An independent watchdog audits the same record
//! and forces completion when an experiment stalls.
//!
//! - **[`core`]**: Pure, deterministic logic (state transitions, evaluation,
//!   stall detection). No I/O.
//! - **[`io`]**: Side-effecting operations (files, processes, config).
//!
//! Orchestration modules ([`looping`], [`step`], [`invoker`], [`watchdog`])
//! coordinate core logic with I/O to implement CLI commands.

pub mod core;
pub mod exit_codes;
pub mod invoker;
pub mod io;
pub mod logging;
pub mod looping;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod watchdog;
