//! I/O helpers for supervisor commands.

pub mod atomic;
pub mod config;
pub mod executor;
pub mod init;
pub mod iteration_log;
pub mod paths;
pub mod process;
pub mod prompt;
pub mod snapshot;
pub mod state_store;
