//! Quantity-of-interest extraction.

use std::path::{Component, Path, PathBuf};

use fb_deploy::{Aggregate, OutputDef, OutputSource};
use fb_runner::{RunStatus, SolverRun};

use crate::error::{ExtractError, ExtractResult};
use crate::field;

/// Path component replaced by the numerically largest time directory.
pub const LATEST_TIME: &str = "{latestTime}";

/// Extracted output vector.
#[derive(Debug, Clone, PartialEq)]
pub struct QoiResult {
    pub values: Vec<f64>,
    /// Taken from a run that exited nonzero.
    pub partial: bool,
}

/// Whether a run's artifacts may be read at all.
pub fn should_extract(run: &SolverRun, accept_partial: bool) -> bool {
    match run.status {
        RunStatus::Success => true,
        RunStatus::NonZeroExit { .. } => accept_partial,
        _ => false,
    }
}

/// Extract every declared output from `case_dir`, in declaration order.
pub fn extract(
    case_dir: &Path,
    outputs: &[OutputDef],
    run: &SolverRun,
    accept_partial: bool,
) -> ExtractResult<QoiResult> {
    if !should_extract(run, accept_partial) {
        run.check()?;
    }
    let partial = !run.is_success();
    if partial {
        tracing::warn!(status = ?run.status, "extracting from a failed run");
    }

    let expected: usize = outputs.iter().map(OutputDef::size).sum();
    let mut values = Vec::with_capacity(expected);
    for output in outputs {
        let extracted = extract_output(case_dir, output)?;
        tracing::debug!(output = %output.name, values = ?extracted, "extracted output");
        values.extend(extracted);
    }

    if values.len() != expected {
        return Err(ExtractError::Shape {
            expected,
            actual: values.len(),
        });
    }
    Ok(QoiResult { values, partial })
}

fn extract_output(case_dir: &Path, output: &OutputDef) -> ExtractResult<Vec<f64>> {
    let path = resolve_time_path(case_dir, output.source.file()).ok_or_else(|| {
        ExtractError::Missing {
            output: output.name.clone(),
            path: case_dir.join(output.source.file()),
        }
    })?;
    let text = std::fs::read_to_string(&path).map_err(|_| ExtractError::Missing {
        output: output.name.clone(),
        path: path.clone(),
    })?;
    let parse_error = |reason: String| ExtractError::Parse {
        output: output.name.clone(),
        path: path.clone(),
        reason,
    };

    match &output.source {
        OutputSource::Table {
            columns, aggregate: agg, ..
        } => {
            let rows = parse_table(&text).map_err(parse_error)?;
            columns
                .iter()
                .map(|&col| {
                    let series = rows
                        .iter()
                        .map(|(line, row)| {
                            row.get(col).copied().ok_or_else(|| {
                                format!("line {line} has {} columns, column {col} requested", row.len())
                            })
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    aggregate(*agg, &series).ok_or_else(|| "table has no data rows".to_string())
                })
                .collect::<Result<Vec<_>, _>>()
                .map_err(parse_error)
        }
        OutputSource::Scrape {
            key, aggregate: agg, ..
        } => {
            let series = scrape(&text, key).map_err(parse_error)?;
            let v = aggregate(*agg, &series)
                .ok_or_else(|| parse_error(format!("no line containing '{key}' carries a number")))?;
            Ok(vec![v])
        }
        OutputSource::Field {
            entry, aggregate: agg, ..
        } => {
            let values = field::read_scalar_entry(&text, entry).map_err(parse_error)?;
            let v = values
                .aggregate(*agg)
                .ok_or_else(|| parse_error(format!("entry '{entry}' is an empty list")))?;
            if !v.is_finite() {
                return Err(parse_error(format!("{agg:?} of entry '{entry}' is not finite")));
            }
            Ok(vec![v])
        }
    }
}

/// Resolve `file` under `case_dir`, replacing each `{latestTime}` component
/// with the numerically largest time directory found at that level.
/// `None` when no time directory exists.
pub fn resolve_time_path(case_dir: &Path, file: &str) -> Option<PathBuf> {
    let mut path = case_dir.to_path_buf();
    for component in Path::new(file).components() {
        match component {
            Component::Normal(part) if part == LATEST_TIME => {
                path = latest_time_dir(&path)?;
            }
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(path)
}

fn latest_time_dir(dir: &Path) -> Option<PathBuf> {
    std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
        .filter_map(|e| {
            let time: f64 = e.file_name().to_str()?.parse().ok()?;
            time.is_finite().then(|| (time, e.path()))
        })
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, path)| path)
}

/// Numeric rows of a whitespace table with their 1-based line numbers.
/// `#` comment lines and blank lines are skipped; parentheses (vector
/// columns in force files) count as whitespace.
fn parse_table(text: &str) -> Result<Vec<(usize, Vec<f64>)>, String> {
    let mut rows = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let row = line
            .split(|c: char| c.is_whitespace() || c == '(' || c == ')')
            .filter(|t| !t.is_empty())
            .map(|t| match t.parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(v),
                Ok(_) => Err(format!("line {}: non-finite value '{t}'", idx + 1)),
                Err(_) => Err(format!("line {}: '{t}' is not a number", idx + 1)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        rows.push((idx + 1, row));
    }
    Ok(rows)
}

/// First number after `key` on every line containing it. Lines where no
/// number follows are skipped.
fn scrape(text: &str, key: &str) -> Result<Vec<f64>, String> {
    let mut values = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let Some(pos) = line.find(key) else {
            continue;
        };
        let rest = line[pos + key.len()..]
            .trim_start_matches(|c: char| c.is_whitespace() || c == '=' || c == ':');
        let token: String = rest
            .chars()
            .take_while(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
            .collect();
        if token.is_empty() {
            continue;
        }
        match token.parse::<f64>() {
            Ok(v) if v.is_finite() => values.push(v),
            _ => return Err(format!("line {}: '{token}' after '{key}' is not a number", idx + 1)),
        }
    }
    Ok(values)
}

/// Reduce a series; `None` for an empty one.
pub fn aggregate(agg: Aggregate, series: &[f64]) -> Option<f64> {
    let first = *series.first()?;
    Some(match agg {
        Aggregate::First => first,
        Aggregate::Last => *series.last()?,
        Aggregate::Sum => series.iter().sum(),
        Aggregate::Mean => series.iter().sum::<f64>() / series.len() as f64,
        Aggregate::Min => series.iter().copied().fold(first, f64::min),
        Aggregate::Max => series.iter().copied().fold(first, f64::max),
    })
}
