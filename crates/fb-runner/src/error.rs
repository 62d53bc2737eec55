//! Error types for solver runs.

use fb_core::ErrorKind;
use std::time::Duration;
use thiserror::Error;

/// A solver run that did not end in success, with its diagnostics.
#[derive(Error, Debug, Clone)]
pub enum RunnerError {
    #[error("Solver step '{step}' could not be launched: {reason}")]
    LaunchFailed {
        step: String,
        reason: String,
        log: String,
    },

    #[error("Solver step '{step}' exited with {status}")]
    NonZeroExit {
        step: String,
        status: String,
        log: String,
    },

    #[error("Solver run exceeded its {timeout:?} deadline during step '{step}'")]
    TimedOut {
        step: String,
        timeout: Duration,
        log: String,
    },

    #[error("Solver run was cancelled during step '{step}'")]
    Cancelled { step: String, log: String },
}

pub type RunnerResult<T> = Result<T, RunnerError>;

impl RunnerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RunnerError::LaunchFailed { .. } => ErrorKind::LaunchFailed,
            RunnerError::NonZeroExit { .. } => ErrorKind::NonZeroExit,
            RunnerError::TimedOut { .. } => ErrorKind::TimedOut,
            RunnerError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Captured solver output, for the caller's diagnosis.
    pub fn log(&self) -> &str {
        match self {
            RunnerError::LaunchFailed { log, .. }
            | RunnerError::NonZeroExit { log, .. }
            | RunnerError::TimedOut { log, .. }
            | RunnerError::Cancelled { log, .. } => log,
        }
    }
}
