//! Error types for case instantiation.

use crate::foam_dict::DictError;
use fb_core::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaseError {
    #[error("Expected {expected} input values, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Invalid config '{name}': {reason}")]
    InvalidConfig { name: String, reason: String },

    #[error("Parameter vector does not match the template signature: {what}")]
    SignatureMismatch { what: String },

    #[error("Case template directory not found: {path}")]
    MissingTemplate { path: PathBuf },

    #[error("Template file '{file}' is missing")]
    MissingFile { file: String },

    #[error("Template file '{file}' has no entry '{path}'")]
    MissingKey { file: String, path: String },

    #[error("Template file '{file}' does not contain placeholder '{token}'")]
    MissingPlaceholder { file: String, token: String },

    #[error("Template file '{file}' is not a readable dictionary: {source}")]
    Dictionary { file: String, source: DictError },

    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
}

pub type CaseResult<T> = Result<T, CaseError>;

impl CaseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CaseError::ArityMismatch { .. }
            | CaseError::InvalidParameter { .. }
            | CaseError::InvalidConfig { .. }
            | CaseError::SignatureMismatch { .. } => ErrorKind::SchemaMismatch,
            CaseError::MissingTemplate { .. }
            | CaseError::MissingFile { .. }
            | CaseError::MissingKey { .. }
            | CaseError::MissingPlaceholder { .. }
            | CaseError::Dictionary { .. } => ErrorKind::TemplateCorrupt,
            CaseError::Io { .. } => ErrorKind::Internal,
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        CaseError::Io {
            context: context.into(),
            source,
        }
    }
}
