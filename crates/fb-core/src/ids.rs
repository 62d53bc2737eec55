use core::fmt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one evaluate call, from admission to response.
///
/// Also names the workspace directory allocated for the call, so a
/// leftover directory can always be traced back to its request in the logs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvalId(Uuid);

impl EvalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Directory name used for this evaluation's workspace.
    pub fn workspace_dir_name(&self) -> String {
        format!("{}{}", WORKSPACE_DIR_PREFIX, self.0.simple())
    }
}

impl Default for EvalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EvalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EvalId({})", self.0.simple())
    }
}

impl fmt::Display for EvalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Prefix shared by every workspace directory under the workspace root.
pub const WORKSPACE_DIR_PREFIX: &str = "eval-";
