//! Deterministic, pure logic shared by the supervisor.
//!
//! Core modules are free of I/O side effects. They operate on in-memory
//! records and return deterministic outputs suitable for tests.

pub mod budget;
pub mod evaluator;
pub mod report;
pub mod stall;
pub mod state;
pub mod types;
