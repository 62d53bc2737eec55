//! Deployment validation logic.

use crate::schema::{
    ConfigKind, ConfigParamDef, Deployment, FormatDef, InputDef, LocatorDef, ModelDef, OutputDef,
    OutputSource, SolverDef, SubstitutionDef,
};
use std::collections::HashSet;
use std::path::{Component, Path};

#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error("Duplicate ID: {id} in {context}")]
    DuplicateId { id: String, context: String },

    #[error("Missing reference: {id} in {context}")]
    MissingReference { id: String, context: String },

    #[error("Invalid value: {field} = {value} ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Unsupported version: {version}")]
    UnsupportedVersion { version: u32 },
}

pub fn validate_deployment(deployment: &Deployment) -> Result<(), ValidationError> {
    if deployment.version == 0 || deployment.version > crate::LATEST_VERSION {
        return Err(ValidationError::UnsupportedVersion {
            version: deployment.version,
        });
    }

    if deployment.workspace.max_concurrent == 0 {
        return Err(invalid(
            "workspace.max_concurrent",
            "0",
            "at least one concurrent evaluation is required",
        ));
    }
    if let Some(wait) = deployment.workspace.queue_wait_s
        && !(wait.is_finite() && wait >= 0.0)
    {
        return Err(invalid(
            "workspace.queue_wait_s",
            wait,
            "must be a finite, non-negative number of seconds",
        ));
    }

    if deployment.models.is_empty() {
        return Err(invalid(
            "models",
            "[]",
            "a deployment must serve at least one model",
        ));
    }

    let mut model_names = HashSet::new();
    for model in &deployment.models {
        if !model_names.insert(&model.name) {
            return Err(ValidationError::DuplicateId {
                id: model.name.clone(),
                context: "models".to_string(),
            });
        }
        validate_model(model)?;
    }

    Ok(())
}

fn validate_model(model: &ModelDef) -> Result<(), ValidationError> {
    if model.name.trim().is_empty() {
        return Err(invalid("model.name", "''", "must not be empty"));
    }
    let safe_name = model
        .name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && !model.name.starts_with('.');
    if !safe_name {
        return Err(invalid(
            "model.name",
            &model.name,
            "model names become journal directories: use [A-Za-z0-9_.-], not starting with '.'",
        ));
    }
    if model.inputs.is_empty() {
        return Err(invalid(
            &format!("model '{}' inputs", model.name),
            "[]",
            "at least one input is required",
        ));
    }
    if model.outputs.is_empty() {
        return Err(invalid(
            &format!("model '{}' outputs", model.name),
            "[]",
            "at least one output is required",
        ));
    }

    let mut input_names = HashSet::new();
    for input in &model.inputs {
        if !input_names.insert(&input.name) {
            return Err(ValidationError::DuplicateId {
                id: input.name.clone(),
                context: format!("model '{}' inputs", model.name),
            });
        }
        validate_input(input, &model.name)?;
    }

    for substitution in &model.substitutions {
        validate_substitution(substitution, model)?;
    }

    let mut config_names = HashSet::new();
    for param in &model.config {
        if !config_names.insert(&param.name) {
            return Err(ValidationError::DuplicateId {
                id: param.name.clone(),
                context: format!("model '{}' config", model.name),
            });
        }
        validate_config_param(param, &model.name)?;
    }

    validate_solver(&model.solver, &model.name)?;

    let mut output_names = HashSet::new();
    for output in &model.outputs {
        if !output_names.insert(&output.name) {
            return Err(ValidationError::DuplicateId {
                id: output.name.clone(),
                context: format!("model '{}' outputs", model.name),
            });
        }
        validate_output(output, &model.name)?;
    }

    Ok(())
}

fn validate_input(input: &InputDef, model: &str) -> Result<(), ValidationError> {
    let field = format!("model '{}' input '{}'", model, input.name);
    if input.size != 1 && input.size != 3 {
        return Err(invalid(
            &format!("{field} size"),
            input.size,
            "inputs are scalars (1) or vectors (3)",
        ));
    }
    for (label, bound) in [("min", input.min), ("max", input.max)] {
        if let Some(b) = bound
            && !b.is_finite()
        {
            return Err(invalid(&format!("{field} {label}"), b, "must be finite"));
        }
    }
    if let (Some(min), Some(max)) = (input.min, input.max)
        && min > max
    {
        return Err(invalid(
            &format!("{field} bounds"),
            format!("[{min}, {max}]"),
            "min must not exceed max",
        ));
    }
    Ok(())
}

fn validate_substitution(
    substitution: &SubstitutionDef,
    model: &ModelDef,
) -> Result<(), ValidationError> {
    let context = format!("model '{}' substitutions", model.name);
    let input = model
        .input(&substitution.input)
        .ok_or_else(|| ValidationError::MissingReference {
            id: substitution.input.clone(),
            context: context.clone(),
        })?;

    validate_relative_path(&substitution.file, &format!("{context} file"))?;

    validate_locator(&substitution.locator, &format!("{context} locator"))?;

    let format_field = format!("{context} format for '{}'", input.name);
    match &substitution.format {
        FormatDef::Scalar | FormatDef::UniformScalar if input.size != 1 => Err(invalid(
            &format_field,
            input.size,
            "scalar formats need a size-1 input",
        )),
        FormatDef::Vector if input.size != 3 => Err(invalid(
            &format_field,
            input.size,
            "vector format needs a size-3 input",
        )),
        FormatDef::UniformVector { direction } => match (input.size, direction) {
            (1, Some(d)) if d.iter().all(|c| c.is_finite()) => Ok(()),
            (1, _) => Err(invalid(
                &format_field,
                input.size,
                "a scalar input needs a finite direction to form a vector",
            )),
            (3, None) => Ok(()),
            _ => Err(invalid(
                &format_field,
                input.size,
                "direction only applies to scalar inputs",
            )),
        },
        FormatDef::Template { text } => {
            let placeholders = template_placeholders(text);
            if placeholders.is_empty() {
                return Err(invalid(&format_field, text, "template has no {i} placeholder"));
            }
            if let Some(bad) = placeholders.iter().find(|&&i| i >= input.size) {
                return Err(invalid(
                    &format_field,
                    text,
                    &format!("placeholder {{{bad}}} exceeds input size {}", input.size),
                ));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Request config keys handled by the server itself.
pub const RESERVED_CONFIG_KEYS: &[&str] = &["timeout_s"];

fn validate_config_param(param: &ConfigParamDef, model: &str) -> Result<(), ValidationError> {
    let context = format!("model '{model}' config '{}'", param.name);
    if param.name.is_empty() || RESERVED_CONFIG_KEYS.contains(&param.name.as_str()) {
        return Err(invalid(
            &format!("model '{model}' config name"),
            &param.name,
            "config names must be non-empty and not reserved",
        ));
    }
    if !param.choices.is_empty() && param.kind != ConfigKind::Word {
        return Err(invalid(
            &format!("{context} choices"),
            param.choices.join(", "),
            "choices only apply to Word options",
        ));
    }
    if let (Some(min), Some(max)) = (param.min, param.max)
        && min > max
    {
        return Err(invalid(
            &format!("{context} bounds"),
            format!("[{min}, {max}]"),
            "min must not exceed max",
        ));
    }
    param
        .coerce(&param.default)
        .map_err(|reason| invalid(&format!("{context} default"), &param.default, &reason))?;

    if param.targets.is_empty() {
        return Err(invalid(
            &format!("{context} targets"),
            "[]",
            "an option must be written somewhere in the case",
        ));
    }
    for target in &param.targets {
        validate_relative_path(&target.file, &format!("{context} file"))?;
        validate_locator(&target.locator, &format!("{context} locator"))?;
    }
    Ok(())
}

fn validate_locator(locator: &LocatorDef, field: &str) -> Result<(), ValidationError> {
    match locator {
        LocatorDef::KeyPath { path } => {
            if path.is_empty() || path.split('.').any(|segment| segment.is_empty()) {
                return Err(invalid(field, path, "key path segments must be non-empty"));
            }
        }
        LocatorDef::Placeholder { token } => {
            if token.is_empty() {
                return Err(invalid(field, "''", "placeholder token must not be empty"));
            }
        }
    }
    Ok(())
}

/// Indices of the `{i}` placeholders in a template string.
pub fn template_placeholders(text: &str) -> Vec<usize> {
    let mut found = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                if let Ok(index) = after[..close].parse::<usize>() {
                    found.push(index);
                }
                rest = &after[close + 1..];
            }
            None => break,
        }
    }
    found
}

fn validate_solver(solver: &SolverDef, model: &str) -> Result<(), ValidationError> {
    let context = format!("model '{model}' solver");
    if solver.steps.is_empty() {
        return Err(invalid(
            &format!("{context} steps"),
            "[]",
            "at least one step is required",
        ));
    }
    if !(solver.timeout_s.is_finite() && solver.timeout_s > 0.0) {
        return Err(invalid(
            &format!("{context} timeout_s"),
            solver.timeout_s,
            "must be a positive number of seconds",
        ));
    }
    if !(solver.kill_grace_s.is_finite() && solver.kill_grace_s >= 0.0) {
        return Err(invalid(
            &format!("{context} kill_grace_s"),
            solver.kill_grace_s,
            "must be a non-negative number of seconds",
        ));
    }

    let mut step_names = HashSet::new();
    for step in &solver.steps {
        if !step_names.insert(&step.name) {
            return Err(ValidationError::DuplicateId {
                id: step.name.clone(),
                context: format!("{context} steps"),
            });
        }
        let valid_name = !step.name.is_empty()
            && step
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid_name {
            return Err(invalid(
                &format!("{context} step name"),
                &step.name,
                "step names become log file names: use [A-Za-z0-9_-]",
            ));
        }
        if step.program.trim().is_empty() {
            return Err(invalid(
                &format!("{context} step '{}' program", step.name),
                "''",
                "must not be empty",
            ));
        }
    }
    Ok(())
}

fn validate_output(output: &OutputDef, model: &str) -> Result<(), ValidationError> {
    let context = format!("model '{model}' output '{}'", output.name);
    validate_relative_path(output.source.file(), &format!("{context} file"))?;
    match &output.source {
        OutputSource::Table { columns, .. } if columns.is_empty() => Err(invalid(
            &format!("{context} columns"),
            "[]",
            "at least one column is required",
        )),
        OutputSource::Scrape { key, .. } if key.is_empty() => Err(invalid(
            &format!("{context} key"),
            "''",
            "scrape key must not be empty",
        )),
        OutputSource::Field { entry, .. } if entry.is_empty() => Err(invalid(
            &format!("{context} entry"),
            "''",
            "field entry must not be empty",
        )),
        _ => Ok(()),
    }
}

fn validate_relative_path(path: &str, field: &str) -> Result<(), ValidationError> {
    let p = Path::new(path);
    let escapes = p
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if path.is_empty() || escapes {
        return Err(invalid(
            field,
            path,
            "must be a relative path inside the case directory",
        ));
    }
    Ok(())
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
