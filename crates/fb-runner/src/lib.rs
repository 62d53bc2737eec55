//! fb-runner: drives the external solver against a case directory.
//!
//! Each configured step (mesh conversion, the solver itself, ...) runs as
//! the leader of its own process group with stdout and stderr redirected to
//! `log.<step>` in the case. All steps share one wall-clock deadline; on
//! expiry or cancellation the whole group is terminated, and a drop guard
//! does the same if the owning future is abandoned.

pub mod error;
pub mod process;
pub mod program;
pub mod run;
pub mod types;

pub use error::{RunnerError, RunnerResult};
pub use process::ProcessGroup;
pub use program::{ProgramError, resolve_program};
pub use run::{RunLimits, run};
pub use types::{RunStatus, SolverRun, StepRecord};
