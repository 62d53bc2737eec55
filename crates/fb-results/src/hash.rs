//! Content keys for evaluations.

use fb_deploy::ModelDef;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// SHA-256 over the model definition, the input vector and the request
/// config. Equal keys mean the solver would see identical cases.
pub fn compute_eval_key<C: Serialize>(model: &ModelDef, inputs: &[f64], config: &C) -> String {
    let mut hasher = Sha256::new();

    let model_json = serde_json::to_string(model).unwrap_or_default();
    hasher.update(model_json.as_bytes());
    hasher.update([0u8]);

    for v in inputs {
        hasher.update(v.to_bits().to_le_bytes());
    }
    hasher.update([0u8]);

    let config_json = serde_json::to_string(config).unwrap_or_default();
    hasher.update(config_json.as_bytes());

    format!("{:x}", hasher.finalize())
}
