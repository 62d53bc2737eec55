//! fb-deploy: deployment file format and validation.
//!
//! A deployment declares the workspace pool, the optional evaluation
//! journal and every model the server exposes: its case template, the
//! parameter-to-dictionary substitution table, the solver steps and the
//! output extraction rules.

pub mod schema;
pub mod validate;

pub use schema::*;
pub use validate::{
    RESERVED_CONFIG_KEYS, ValidationError, template_placeholders, validate_deployment,
};

use std::path::{Path, PathBuf};

pub const LATEST_VERSION: u32 = 1;

pub type DeployResult<T> = Result<T, DeployError>;

#[derive(thiserror::Error, Debug)]
pub enum DeployError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Failed to read deployment file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DeployError {
    pub fn kind(&self) -> fb_core::ErrorKind {
        fb_core::ErrorKind::DeploymentInvalid
    }
}

/// Load a deployment file, choosing the format from its extension.
///
/// `.json` files are read as JSON; anything else as YAML.
pub fn load(path: &Path) -> DeployResult<Deployment> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => load_json(path),
        _ => load_yaml(path),
    }
}

/// Load, resolve and validate a deployment YAML file.
///
/// Relative `template`, `workspace.root` and `journal.dir` paths are
/// resolved against the directory containing the file.
pub fn load_yaml(path: &Path) -> DeployResult<Deployment> {
    let content = std::fs::read_to_string(path).map_err(|source| DeployError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut deployment: Deployment = serde_yaml::from_str(&content)?;
    if let Some(base) = path.parent() {
        resolve_paths(&mut deployment, base);
    }
    validate_deployment(&deployment)?;
    Ok(deployment)
}

pub fn load_json(path: &Path) -> DeployResult<Deployment> {
    let content = std::fs::read_to_string(path).map_err(|source| DeployError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut deployment: Deployment = serde_json::from_str(&content)?;
    if let Some(base) = path.parent() {
        resolve_paths(&mut deployment, base);
    }
    validate_deployment(&deployment)?;
    Ok(deployment)
}

/// Make every filesystem path of the deployment absolute relative to `base`.
pub fn resolve_paths(deployment: &mut Deployment, base: &Path) {
    let resolve = |p: &mut PathBuf| {
        if p.is_relative() {
            *p = base.join(&*p);
        }
    };
    resolve(&mut deployment.workspace.root);
    if let Some(journal) = deployment.journal.as_mut() {
        resolve(&mut journal.dir);
    }
    for model in &mut deployment.models {
        resolve(&mut model.template);
    }
}
