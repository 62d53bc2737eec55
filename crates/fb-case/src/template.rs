//! Read-only access to a model's case template.

use crate::error::{CaseError, CaseResult};
use crate::substitute;
use fb_deploy::{ConfigParamDef, InputDef, ModelDef, SubstitutionDef};
use std::path::{Path, PathBuf};

/// The deployment's baseline case plus the table of substitution points.
///
/// Shared by every request of a model; nothing here ever writes below
/// `root`.
#[derive(Debug, Clone)]
pub struct CaseTemplate {
    root: PathBuf,
    inputs: Vec<InputDef>,
    substitutions: Vec<SubstitutionDef>,
    config: Vec<ConfigParamDef>,
}

impl CaseTemplate {
    pub fn open(model: &ModelDef) -> CaseResult<Self> {
        Self::from_parts(
            model.template.clone(),
            model.inputs.clone(),
            model.substitutions.clone(),
        )
        .map(|template| template.with_config(model.config.clone()))
    }

    pub fn from_parts(
        root: PathBuf,
        inputs: Vec<InputDef>,
        substitutions: Vec<SubstitutionDef>,
    ) -> CaseResult<Self> {
        if !root.is_dir() {
            return Err(CaseError::MissingTemplate { path: root });
        }
        Ok(Self {
            root,
            inputs,
            substitutions,
            config: Vec::new(),
        })
    }

    /// Declare the solver options written into instances of this template.
    pub fn with_config(mut self, config: Vec<ConfigParamDef>) -> Self {
        self.config = config;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn inputs(&self) -> &[InputDef] {
        &self.inputs
    }

    pub fn substitutions(&self) -> &[SubstitutionDef] {
        &self.substitutions
    }

    pub fn config(&self) -> &[ConfigParamDef] {
        &self.config
    }

    /// Read a template file as text.
    pub fn read_file(&self, file: &str) -> CaseResult<String> {
        let path = self.root.join(file);
        if !path.is_file() {
            return Err(CaseError::MissingFile {
                file: file.to_string(),
            });
        }
        std::fs::read_to_string(&path)
            .map_err(|e| CaseError::io(format!("reading template file '{file}'"), e))
    }

    /// Check that every substitution point and config target resolves in
    /// the template.
    pub fn verify(&self) -> CaseResult<()> {
        for substitution in &self.substitutions {
            let text = self.read_file(&substitution.file)?;
            substitute::locate(&substitution.file, &text, &substitution.locator)?;
        }
        for target in self.config.iter().flat_map(|param| &param.targets) {
            let text = self.read_file(&target.file)?;
            substitute::locate(&target.file, &text, &target.locator)?;
        }
        Ok(())
    }
}
