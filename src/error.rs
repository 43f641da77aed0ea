//! Error Module
//!
//! Typed errors for the places where callers need to tell failure kinds
//! apart. Everything else flows through `anyhow`.

use std::path::PathBuf;
use thiserror::Error;

/// Failures while loading an alignment file.
#[derive(Debug, Error)]
pub enum AlignmentError {
    #[error("alignment file not found: {path}")]
    NotFound { path: PathBuf },
    #[error("failed to read alignment file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{line}: '{value}' is not a valid time value")]
    InvalidNumber {
        path: PathBuf,
        line: usize,
        value: String,
    },
}
