//! # enclavelibc-harness
//!
//! Stress and conformance tooling for enclavelibc.
//!
//! Drives the core primitives across real OS threads through the in-process
//! supervisor, checks their invariants while they run, and emits JSON
//! reports plus JSONL traces.

pub mod stress;
pub mod structured_log;

pub use stress::{Scenario, ScenarioReport, StressConfig, SuiteReport, run_scenario, run_suite};

use enclavelibc_core::ThreadError;

/// Harness error types.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("thread primitive failed: {0}")]
    Thread(#[from] ThreadError),
    #[error("worker thread panicked in {0}")]
    WorkerPanicked(&'static str),
    #[error("invalid stress configuration: {0}")]
    InvalidConfig(String),
}
