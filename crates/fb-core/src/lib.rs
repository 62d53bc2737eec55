//! fb-core: shared foundation for foambridge.
//!
//! Contains:
//! - error (the request-level error taxonomy shared by every crate)
//! - ids (evaluation and workspace identifiers)
//! - numeric (finiteness and bounds checks, dictionary number rendering)

pub mod error;
pub mod ids;
pub mod numeric;

pub use error::{CoreError, CoreResult, ErrorKind};
pub use ids::*;
pub use numeric::*;
