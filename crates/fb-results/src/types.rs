//! Journal record types.

use fb_core::ErrorKind;
use serde::{Deserialize, Serialize};

pub type EvalKey = String;

/// One finished evaluation as written to the journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalRecord {
    pub key: EvalKey,
    pub model: String,
    pub eval_id: String,
    /// RFC 3339.
    pub timestamp: String,
    pub inputs: Vec<f64>,
    #[serde(default)]
    pub config: serde_json::Value,
    pub outcome: EvalOutcome,
    #[serde(default)]
    pub timings: EvalTimings,
}

impl EvalRecord {
    pub fn outputs(&self) -> Option<&[f64]> {
        match &self.outcome {
            EvalOutcome::Succeeded { outputs, .. } => Some(outputs),
            EvalOutcome::Failed { .. } => None,
        }
    }

    /// Succeeded from a complete run, so safe to hand out again.
    pub fn is_reusable(&self) -> bool {
        matches!(self.outcome, EvalOutcome::Succeeded { partial: false, .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status")]
pub enum EvalOutcome {
    Succeeded {
        outputs: Vec<f64>,
        #[serde(default)]
        partial: bool,
    },
    Failed {
        kind: ErrorKind,
        message: String,
    },
}

/// Wall-clock seconds spent per stage.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct EvalTimings {
    pub queue_s: f64,
    pub instantiate_s: f64,
    pub solve_s: f64,
    pub extract_s: f64,
    pub total_s: f64,
}
