use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Non-finite numeric value for {what}: {value}")]
    NonFinite { what: String, value: f64 },

    #[error("Value out of bounds for {what}: {value} not in [{min}, {max}]")]
    OutOfBounds {
        what: String,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// Classification of every failure a request can end in.
///
/// The variant names are part of the wire format: they are serialized
/// verbatim into the `kind` field of protocol error responses and journal
/// records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Bad input shape, bounds or request config. No side effects.
    SchemaMismatch,
    /// The request named a model the deployment does not serve.
    UnknownModel,
    /// An expected template file or dictionary entry is missing.
    TemplateCorrupt,
    /// The deployment itself is unusable (startup checks).
    DeploymentInvalid,
    /// A solver step could not be spawned.
    LaunchFailed,
    /// The solver run exceeded its wall-clock deadline.
    TimedOut,
    /// A solver step exited with a nonzero status.
    NonZeroExit,
    /// A declared output artifact does not exist.
    OutputMissing,
    /// An output artifact exists but does not have the expected format.
    ParseError,
    /// The request could not be admitted within the queue-wait bound.
    Overloaded,
    /// The request was cancelled (server shutdown) before it finished.
    Cancelled,
    /// Workspace or journal I/O failure unrelated to the request payload.
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::SchemaMismatch => "SchemaMismatch",
            ErrorKind::UnknownModel => "UnknownModel",
            ErrorKind::TemplateCorrupt => "TemplateCorrupt",
            ErrorKind::DeploymentInvalid => "DeploymentInvalid",
            ErrorKind::LaunchFailed => "LaunchFailed",
            ErrorKind::TimedOut => "TimedOut",
            ErrorKind::NonZeroExit => "NonZeroExit",
            ErrorKind::OutputMissing => "OutputMissing",
            ErrorKind::ParseError => "ParseError",
            ErrorKind::Overloaded => "Overloaded",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Internal => "Internal",
        }
    }

    /// Solver-level failures carry captured logs for diagnosis.
    pub fn is_solver_failure(self) -> bool {
        matches!(
            self,
            ErrorKind::LaunchFailed | ErrorKind::TimedOut | ErrorKind::NonZeroExit
        )
    }

    /// Only an overloaded server is worth retrying from the client side.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Overloaded)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_variant_name() {
        assert_eq!(ErrorKind::NonZeroExit.to_string(), "NonZeroExit");
        assert_eq!(ErrorKind::SchemaMismatch.as_str(), "SchemaMismatch");
    }

    #[test]
    fn only_overloaded_is_retryable() {
        assert!(ErrorKind::Overloaded.is_retryable());
        assert!(!ErrorKind::TimedOut.is_retryable());
        assert!(!ErrorKind::NonZeroExit.is_retryable());
    }

    #[test]
    fn solver_failures() {
        assert!(ErrorKind::LaunchFailed.is_solver_failure());
        assert!(ErrorKind::TimedOut.is_solver_failure());
        assert!(!ErrorKind::OutputMissing.is_solver_failure());
    }
}
