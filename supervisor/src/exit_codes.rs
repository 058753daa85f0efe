//! Stable exit codes for supervisor CLI commands.

/// Goal reached, experiment healthy, or nothing left to do.
pub const OK: i32 = 0;
/// Fatal error: missing directory, unreadable config, failed state or log write.
pub const FATAL: i32 = 1;
/// The loop stopped without reaching the goal (budget exhausted, persistent failure, stall).
pub const STOPPED: i32 = 2;
/// The loop refused to start because of a configuration problem.
pub const CONFIG_ERROR: i32 = 3;
/// `supervisor watchdog` declared the experiment stalled.
pub const STALLED: i32 = 4;
