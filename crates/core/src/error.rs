//! Error kinds that stop a pipeline run.
//!
//! Everything recoverable (malformed trace lines, ambiguous functions, branch
//! sanity mismatches, missing sources at report time) is logged instead and
//! never surfaces as an `Err`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoverageError {
    /// A required configuration key is missing or malformed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An external analysis tool could not be spawned or exited non-zero.
    #[error("Toolchain error ({tool}): {message}")]
    Toolchain { tool: String, message: String },

    /// The trace globs configured for a binary matched nothing.
    #[error("No trace files found for {0}")]
    TraceLoad(String),

    #[error("Binary not found at {0}")]
    MissingBinary(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write the tracefile: {0}")]
    Output(#[source] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoverageError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    pub fn toolchain(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Toolchain { tool: tool.into(), message: message.into() }
    }
}

/// Convenience result type for pipeline operations.
pub type CoverageResult<T> = Result<T, CoverageError>;
