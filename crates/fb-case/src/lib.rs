//! fb-case: case templates, parameter binding and per-request instances.
//!
//! A request's input vector is bound to the model's declared inputs
//! ([`ParameterVector`]), then [`instantiate`] copies the read-only
//! [`CaseTemplate`] into the request's workspace and writes each value into
//! its configured dictionary entry. Solver options travel separately as a
//! [`CaseConfig`] resolved against the model's declared config parameters.

pub mod config;
pub mod error;
pub mod foam_dict;
pub mod instantiate;
pub mod params;
pub mod substitute;
pub mod template;

pub use config::CaseConfig;
pub use error::{CaseError, CaseResult};
pub use instantiate::{AppliedSubstitution, CASE_DIR, CaseInstance, instantiate};
pub use params::ParameterVector;
pub use template::CaseTemplate;
