//! Error types for the evaluation service.

use std::path::PathBuf;
use std::time::Duration;

use fb_core::ErrorKind;

/// Service error wrapping the per-stage errors of the lower crates, each
/// mapped to one protocol-level [`ErrorKind`].
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Case(#[from] fb_case::CaseError),

    #[error(transparent)]
    Runner(#[from] fb_runner::RunnerError),

    #[error(transparent)]
    Extract(#[from] fb_results::ExtractError),

    #[error(transparent)]
    Deploy(#[from] fb_deploy::DeployError),

    #[error("Startup check failed for {subject}: {reason}")]
    DeploymentCheck { subject: String, reason: String },

    #[error("No workspace became free within {waited:?}")]
    Overloaded { waited: Duration },

    #[error("Evaluation cancelled before the solver started")]
    Cancelled,

    #[error("Workspace error at {path}: {source}")]
    Workspace {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Journal error: {0}")]
    Journal(#[from] fb_results::ResultsError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for fb-server operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::UnknownModel(_) => ErrorKind::UnknownModel,
            ServiceError::InvalidRequest(_) => ErrorKind::SchemaMismatch,
            ServiceError::Case(e) => e.kind(),
            ServiceError::Runner(e) => e.kind(),
            ServiceError::Extract(e) => e.kind(),
            ServiceError::Deploy(e) => e.kind(),
            ServiceError::DeploymentCheck { .. } => ErrorKind::DeploymentInvalid,
            ServiceError::Overloaded { .. } => ErrorKind::Overloaded,
            ServiceError::Cancelled => ErrorKind::Cancelled,
            ServiceError::Workspace { .. }
            | ServiceError::Journal(_)
            | ServiceError::Internal(_)
            | ServiceError::Io(_) => ErrorKind::Internal,
        }
    }

    /// Captured solver output for solver-side failures.
    pub fn log(&self) -> Option<&str> {
        let log = match self {
            ServiceError::Runner(e) => e.log(),
            ServiceError::Extract(fb_results::ExtractError::Run(e)) => e.log(),
            _ => return None,
        };
        (!log.is_empty()).then_some(log)
    }

    pub(crate) fn workspace(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ServiceError::Workspace {
            path: path.into(),
            source,
        }
    }
}

impl From<tokio::task::JoinError> for ServiceError {
    fn from(err: tokio::task::JoinError) -> Self {
        ServiceError::Internal(format!("blocking task failed: {err}"))
    }
}
