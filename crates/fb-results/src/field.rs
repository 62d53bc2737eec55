//! Scalar field file entries.
//!
//! Handles the two ASCII layouts a solver writes for `volScalarField`
//! entries:
//!
//! ```text
//! internalField   uniform 0.5;
//! internalField   nonuniform List<scalar> 3(0.1 0.2 0.3);
//! ```
//!
//! including the multi-line list form and the compact `n{value}` form.
//! The element count of the compact form comes from the solver's file and
//! is never materialized.

use fb_case::foam_dict;
use fb_deploy::Aggregate;

use crate::extract::aggregate;

/// Values of one scalar field entry.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValues {
    /// `count` copies of `value`.
    Uniform { value: f64, count: usize },
    List(Vec<f64>),
}

impl FieldValues {
    pub fn len(&self) -> usize {
        match self {
            FieldValues::Uniform { count, .. } => *count,
            FieldValues::List(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reduce the values; `None` when there are none.
    pub fn aggregate(&self, how: Aggregate) -> Option<f64> {
        match self {
            FieldValues::Uniform { count: 0, .. } => None,
            FieldValues::Uniform { value, count } => Some(match how {
                Aggregate::Sum => value * *count as f64,
                _ => *value,
            }),
            FieldValues::List(values) => aggregate(how, values),
        }
    }
}

/// Values of the entry at `entry` (dotted path) in a field file.
pub fn read_scalar_entry(text: &str, entry: &str) -> Result<FieldValues, String> {
    let value = foam_dict::entry_value(text, entry)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("no entry '{entry}'"))?;
    parse_scalar_value(value)
}

/// Parse the value text of a scalar field entry.
pub fn parse_scalar_value(value: &str) -> Result<FieldValues, String> {
    let value = value.trim();
    if let Some(rest) = strip_word(value, "uniform") {
        let rest = rest.trim();
        if rest.starts_with('(') {
            return Err("vector-valued field, expected a scalar".to_string());
        }
        return Ok(FieldValues::Uniform {
            value: parse_number(rest)?,
            count: 1,
        });
    }
    if let Some(rest) = strip_word(value, "nonuniform") {
        return parse_list(rest.trim_start());
    }
    Err(format!("expected 'uniform' or 'nonuniform', found '{}'", preview(value)))
}

fn parse_list(text: &str) -> Result<FieldValues, String> {
    let body = match text.strip_prefix("List<") {
        Some(rest) => {
            let Some(rest) = rest.strip_prefix("scalar>") else {
                return Err(format!("unsupported list type in '{}'", preview(text)));
            };
            rest.trim_start()
        }
        None => text,
    };

    let digits = body.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return Err("list has no element count".to_string());
    }
    let count: usize = body[..digits]
        .parse()
        .map_err(|_| format!("bad element count '{}'", &body[..digits]))?;
    let rest = body[digits..].trim_start();

    if let Some(inner) = rest.strip_prefix('{') {
        let Some(close) = inner.find('}') else {
            return Err("unterminated '{' in uniform list".to_string());
        };
        let value = parse_number(inner[..close].trim())?;
        return Ok(FieldValues::Uniform { value, count });
    }

    let Some(inner) = rest.strip_prefix('(') else {
        return Err("binary or malformed list; only ASCII lists are read".to_string());
    };
    let Some(close) = inner.rfind(')') else {
        return Err("unterminated '(' in list".to_string());
    };
    let values = inner[..close]
        .split_whitespace()
        .map(parse_number)
        .collect::<Result<Vec<_>, _>>()?;
    if values.len() != count {
        return Err(format!("list declares {count} values but holds {}", values.len()));
    }
    Ok(FieldValues::List(values))
}

fn strip_word<'a>(text: &'a str, word: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(word)?;
    match rest.chars().next() {
        None => Some(rest),
        Some(c) if c.is_whitespace() => Some(rest),
        _ => None,
    }
}

fn parse_number(token: &str) -> Result<f64, String> {
    let v: f64 = token
        .parse()
        .map_err(|_| format!("'{}' is not a number", preview(token)))?;
    if !v.is_finite() {
        return Err(format!("non-finite value '{token}'"));
    }
    Ok(v)
}

fn preview(text: &str) -> &str {
    match text.char_indices().nth(40) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}
