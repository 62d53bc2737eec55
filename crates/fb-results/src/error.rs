//! Error types for extraction and the journal.

use fb_core::ErrorKind;
use fb_runner::RunnerError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    /// The run ended in a state that yields no results.
    #[error(transparent)]
    Run(#[from] RunnerError),

    #[error("Output '{output}': {path} not found")]
    Missing { output: String, path: PathBuf },

    #[error("Output '{output}': cannot parse {path}: {reason}")]
    Parse {
        output: String,
        path: PathBuf,
        reason: String,
    },

    #[error("Extracted {actual} values, expected {expected}")]
    Shape { expected: usize, actual: usize },
}

pub type ExtractResult<T> = Result<T, ExtractError>;

impl ExtractError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractError::Run(e) => e.kind(),
            ExtractError::Missing { .. } => ErrorKind::OutputMissing,
            ExtractError::Parse { .. } | ExtractError::Shape { .. } => ErrorKind::ParseError,
        }
    }
}

pub type ResultsResult<T> = Result<T, ResultsError>;

#[derive(Error, Debug)]
pub enum ResultsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Evaluation not found: {model}/{key}")]
    RecordNotFound { model: String, key: String },

    #[error("Invalid journal path component: {0:?}")]
    InvalidPath(String),
}

impl ResultsError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}
