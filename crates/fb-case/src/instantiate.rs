//! Materializing a per-request case instance.

use crate::config::CaseConfig;
use crate::error::{CaseError, CaseResult};
use crate::params::ParameterVector;
use crate::substitute;
use crate::template::CaseTemplate;
use fb_deploy::LocatorDef;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the case directory inside a workspace.
pub const CASE_DIR: &str = "case";

const MAX_COPY_DEPTH: usize = 64;

/// One substitution as it was written into the instance.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedSubstitution {
    /// Name of the input or config parameter the text came from.
    pub input: String,
    pub file: String,
    pub locator: String,
    pub text: String,
}

/// An exclusively owned, runnable copy of the template.
#[derive(Debug, Clone)]
pub struct CaseInstance {
    root: PathBuf,
    applied: Vec<AppliedSubstitution>,
}

impl CaseInstance {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn applied(&self) -> &[AppliedSubstitution] {
        &self.applied
    }
}

/// Copy `template` into `workspace_dir/case` and write the parameter values
/// into their substitution points and the config values into their targets.
/// Options missing from `config` take their declared default.
///
/// Every check (signature, template files, locators) runs before the first
/// write, so a failed call leaves `workspace_dir` untouched. `workspace_dir`
/// must already exist and `case` must not: directories are only ever
/// created one level at a time, so a workspace deleted mid-copy is not
/// brought back.
pub fn instantiate(
    template: &CaseTemplate,
    parameters: &ParameterVector,
    config: &CaseConfig,
    workspace_dir: &Path,
) -> CaseResult<CaseInstance> {
    check_signature(template, parameters)?;

    let (rendered, applied) = render_files(template, parameters, config)?;

    let root = workspace_dir.join(CASE_DIR);
    copy_tree(template.root(), &root, 0)?;
    for (file, text) in &rendered {
        fs::write(root.join(file), text)
            .map_err(|e| CaseError::io(format!("writing case file '{file}'"), e))?;
    }

    tracing::debug!(
        case = %root.display(),
        substitutions = applied.len(),
        "case instantiated"
    );

    Ok(CaseInstance { root, applied })
}

fn check_signature(template: &CaseTemplate, parameters: &ParameterVector) -> CaseResult<()> {
    let expected: usize = template.inputs().iter().map(|i| i.size).sum();
    if parameters.len() != expected {
        return Err(CaseError::ArityMismatch {
            expected,
            actual: parameters.len(),
        });
    }
    if !parameters.matches(template.inputs()) {
        return Err(CaseError::SignatureMismatch {
            what: format!(
                "expected inputs [{}], got [{}]",
                template
                    .inputs()
                    .iter()
                    .map(|i| i.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                parameters.names().collect::<Vec<_>>().join(", ")
            ),
        });
    }
    Ok(())
}

type RenderedFiles = BTreeMap<String, String>;

fn render_files(
    template: &CaseTemplate,
    parameters: &ParameterVector,
    config: &CaseConfig,
) -> CaseResult<(RenderedFiles, Vec<AppliedSubstitution>)> {
    let mut files: RenderedFiles = BTreeMap::new();
    let mut applied = Vec::with_capacity(template.substitutions().len());

    for substitution in template.substitutions() {
        let values = parameters.get(&substitution.input).ok_or_else(|| {
            CaseError::SignatureMismatch {
                what: format!("no value for input '{}'", substitution.input),
            }
        })?;
        let rendered = substitute::render(&substitution.format, values);
        applied.push(write_into(
            &mut files,
            template,
            &substitution.input,
            &substitution.file,
            &substitution.locator,
            rendered,
        )?);
    }

    for param in template.config() {
        let rendered = config.get(&param.name).unwrap_or(&param.default).render();
        for target in &param.targets {
            applied.push(write_into(
                &mut files,
                template,
                &param.name,
                &target.file,
                &target.locator,
                rendered.clone(),
            )?);
        }
    }

    Ok((files, applied))
}

fn write_into(
    files: &mut RenderedFiles,
    template: &CaseTemplate,
    input: &str,
    file: &str,
    locator: &LocatorDef,
    rendered: String,
) -> CaseResult<AppliedSubstitution> {
    let text = match files.remove(file) {
        Some(text) => text,
        None => template.read_file(file)?,
    };
    let updated = substitute::apply(file, &text, locator, &rendered)?;
    files.insert(file.to_string(), updated);
    Ok(AppliedSubstitution {
        input: input.to_string(),
        file: file.to_string(),
        locator: substitute::describe(locator),
        text: rendered,
    })
}

/// Deep copy: regular files are copied byte for byte, symlinks are followed
/// and materialized so no instance file aliases the template.
fn copy_tree(src: &Path, dst: &Path, depth: usize) -> CaseResult<()> {
    if depth > MAX_COPY_DEPTH {
        return Err(CaseError::io(
            format!("copying {}", src.display()),
            std::io::Error::other("directory nesting too deep (symlink loop?)"),
        ));
    }
    fs::create_dir(dst)
        .map_err(|e| CaseError::io(format!("creating {}", dst.display()), e))?;

    let entries =
        fs::read_dir(src).map_err(|e| CaseError::io(format!("listing {}", src.display()), e))?;
    for entry in entries {
        let entry = entry.map_err(|e| CaseError::io(format!("listing {}", src.display()), e))?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let meta = fs::metadata(&from)
            .map_err(|e| CaseError::io(format!("inspecting {}", from.display()), e))?;
        if meta.is_dir() {
            copy_tree(&from, &to, depth + 1)?;
        } else {
            fs::copy(&from, &to)
                .map_err(|e| CaseError::io(format!("copying {}", from.display()), e))?;
        }
    }
    Ok(())
}
