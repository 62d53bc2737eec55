//! fb-results: quantities of interest and the evaluation journal.
//!
//! Contains:
//! - extract (QoI extraction from tables, logs and field files)
//! - field (scalar field file entries)
//! - hash (content keys for evaluations)
//! - store (the on-disk journal)
//! - types (journal records)

pub mod error;
pub mod extract;
pub mod field;
pub mod hash;
pub mod store;
pub mod types;

pub use error::{ExtractError, ExtractResult, ResultsError, ResultsResult};
pub use extract::{QoiResult, aggregate, extract, resolve_time_path, should_extract};
pub use field::FieldValues;
pub use hash::compute_eval_key;
pub use store::EvalStore;
pub use types::*;
