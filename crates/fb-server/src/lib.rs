//! Evaluation service for foambridge.
//!
//! Ties the lower crates together behind one entry point used by both the
//! HTTP protocol and the CLI: a request is validated, admitted to a
//! workspace, instantiated, solved and extracted, and its workspace is
//! released on every path.

pub mod checks;
pub mod error;
pub mod eval_service;
pub mod progress;
pub mod protocol;
pub mod workspace;

pub use checks::check_deployment;
pub use error::{ServiceError, ServiceResult};
pub use eval_service::{EvalConfig, EvalRequest, EvalResponse, ModelDescription, ModelServer};
pub use progress::{EvalProgressEvent, EvalStage};
pub use protocol::{PROTOCOL_VERSION, router, serve, serve_with_shutdown};
pub use workspace::{Workspace, WorkspaceManager};
