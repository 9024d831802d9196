//! Error types shared by the matching, scoring and sweep modules.
//!
//! Pipeline invocation failures live in [`crate::pipeline::external::PipelineError`];
//! they are the only recoverable class and never surface through this enum
//! except in aggregated form inside [`RepeatabilityError::SweepExhausted`].

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepeatabilityError {
    /// Invalid or missing replicate group or sample reference.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Shape mismatch between derived tables, duplicate keys, malformed input tables.
    #[error("Data error: {0}")]
    Data(String),

    /// Every grid point of a sweep failed in the external pipeline.
    #[error("Sweep exhausted: all {attempted} configuration(s) failed ({})", .failures.join("; "))]
    SweepExhausted {
        attempted: usize,
        failures: Vec<String>,
    },

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Thread pool error: {0}")]
    ThreadPoolError(#[from] rayon::ThreadPoolBuildError),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RepeatabilityError>;
