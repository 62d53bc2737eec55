//! Rendering parameter values into dictionary text.

use crate::error::{CaseError, CaseResult};
use crate::foam_dict;
use fb_core::{Real, format_dict_number};
use fb_deploy::{FormatDef, LocatorDef};

/// Render `values` (one or three components) according to `format`.
///
/// The format has already been checked against the input size by
/// deployment validation; a shorter slice renders missing components as 0.
pub fn render(format: &FormatDef, values: &[Real]) -> String {
    let at = |i: usize| values.get(i).copied().unwrap_or(0.0);
    match format {
        FormatDef::Scalar => format_dict_number(at(0)),
        FormatDef::UniformScalar => format!("uniform {}", format_dict_number(at(0))),
        FormatDef::Vector => vector([at(0), at(1), at(2)]),
        FormatDef::UniformVector { direction } => {
            let components = match direction {
                Some(d) => [at(0) * d[0], at(0) * d[1], at(0) * d[2]],
                None => [at(0), at(1), at(2)],
            };
            format!("uniform {}", vector(components))
        }
        FormatDef::Template { text } => {
            let mut out = text.clone();
            for (i, &v) in values.iter().enumerate() {
                out = out.replace(&format!("{{{i}}}"), &format_dict_number(v));
            }
            out
        }
    }
}

fn vector(c: [Real; 3]) -> String {
    format!(
        "({} {} {})",
        format_dict_number(c[0]),
        format_dict_number(c[1]),
        format_dict_number(c[2])
    )
}

/// Apply one rendered substitution to the text of `file`.
pub fn apply(file: &str, text: &str, locator: &LocatorDef, rendered: &str) -> CaseResult<String> {
    match locator {
        LocatorDef::KeyPath { path } => foam_dict::replace_entry(text, path, rendered)
            .map_err(|source| CaseError::Dictionary {
                file: file.to_string(),
                source,
            })?
            .ok_or_else(|| CaseError::MissingKey {
                file: file.to_string(),
                path: path.clone(),
            }),
        LocatorDef::Placeholder { token } => {
            if !text.contains(token.as_str()) {
                return Err(CaseError::MissingPlaceholder {
                    file: file.to_string(),
                    token: token.clone(),
                });
            }
            Ok(text.replace(token.as_str(), rendered))
        }
    }
}

/// Check that `locator` resolves in `text` without changing anything.
pub fn locate(file: &str, text: &str, locator: &LocatorDef) -> CaseResult<()> {
    match locator {
        LocatorDef::KeyPath { path } => {
            let found = foam_dict::find_entry(text, path).map_err(|source| {
                CaseError::Dictionary {
                    file: file.to_string(),
                    source,
                }
            })?;
            found.map(|_| ()).ok_or_else(|| CaseError::MissingKey {
                file: file.to_string(),
                path: path.clone(),
            })
        }
        LocatorDef::Placeholder { token } => {
            if text.contains(token.as_str()) {
                Ok(())
            } else {
                Err(CaseError::MissingPlaceholder {
                    file: file.to_string(),
                    token: token.clone(),
                })
            }
        }
    }
}

pub fn describe(locator: &LocatorDef) -> String {
    match locator {
        LocatorDef::KeyPath { path } => path.clone(),
        LocatorDef::Placeholder { token } => token.clone(),
    }
}
