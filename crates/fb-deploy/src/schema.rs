//! Deployment schema definitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deployment {
    pub version: u32,
    #[serde(default)]
    pub server: ServerDef,
    pub workspace: WorkspaceDef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal: Option<JournalDef>,
    #[serde(default)]
    pub models: Vec<ModelDef>,
}

impl Deployment {
    pub fn model(&self, name: &str) -> Option<&ModelDef> {
        self.models.iter().find(|m| m.name == name)
    }

    pub fn model_names(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerDef {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerDef {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:4242".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceDef {
    pub root: PathBuf,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Upper bound on the time a request may wait for a slot. Absent means
    /// wait indefinitely; zero means reject as soon as every slot is taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_wait_s: Option<f64>,
}

fn default_max_concurrent() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalDef {
    pub dir: PathBuf,
    #[serde(default)]
    pub reuse_results: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelDef {
    pub name: String,
    pub template: PathBuf,
    pub inputs: Vec<InputDef>,
    #[serde(default)]
    pub substitutions: Vec<SubstitutionDef>,
    /// Per-request solver options (mesh resolution, tolerances, schemes).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config: Vec<ConfigParamDef>,
    pub solver: SolverDef,
    pub outputs: Vec<OutputDef>,
    #[serde(default)]
    pub accept_partial_results: bool,
}

impl ModelDef {
    /// Total number of scalars in an input vector for this model.
    pub fn input_arity(&self) -> usize {
        self.inputs.iter().map(|i| i.size).sum()
    }

    /// Total number of scalars in an output vector for this model.
    pub fn output_arity(&self) -> usize {
        self.outputs.iter().map(|o| o.size()).sum()
    }

    pub fn input_sizes(&self) -> Vec<usize> {
        self.inputs.iter().map(|i| i.size).collect()
    }

    pub fn output_sizes(&self) -> Vec<usize> {
        self.outputs.iter().map(|o| o.size()).collect()
    }

    pub fn input(&self, name: &str) -> Option<&InputDef> {
        self.inputs.iter().find(|i| i.name == name)
    }

    pub fn config_param(&self, name: &str) -> Option<&ConfigParamDef> {
        self.config.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputDef {
    pub name: String,
    #[serde(default = "default_input_size")]
    pub size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

fn default_input_size() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubstitutionDef {
    pub input: String,
    /// Path of the dictionary file, relative to the case root.
    pub file: String,
    pub locator: LocatorDef,
    pub format: FormatDef,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum LocatorDef {
    /// Dotted dictionary path, e.g. `boundaryField.inlet.value`.
    KeyPath { path: String },
    /// Literal token replaced wherever it occurs.
    Placeholder { token: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum FormatDef {
    Scalar,
    UniformScalar,
    Vector,
    UniformVector {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        direction: Option<[f64; 3]>,
    },
    Template {
        text: String,
    },
}

/// A named solver option a request may set through its `config` map.
///
/// Unlike inputs, options are not part of the parameter vector: they select
/// fidelity or numerics (`N: 64`, `pctype: ILU`) and fall back to `default`
/// when a request leaves them out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigParamDef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ConfigKind,
    pub default: ConfigValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Allowed values of a `Word` option; empty allows any word.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
    /// Where the value is written into the case.
    pub targets: Vec<ConfigTargetDef>,
}

impl ConfigParamDef {
    /// Check `value` against this option's type, bounds and choices.
    ///
    /// Integers are accepted for `Number` options and widened.
    pub fn coerce(&self, value: &ConfigValue) -> Result<ConfigValue, String> {
        let value = match (self.kind, value) {
            (ConfigKind::Bool, ConfigValue::Bool(b)) => ConfigValue::Bool(*b),
            (ConfigKind::Integer, ConfigValue::Integer(i)) => ConfigValue::Integer(*i),
            (ConfigKind::Number, ConfigValue::Integer(i)) => ConfigValue::Number(*i as f64),
            (ConfigKind::Number, ConfigValue::Number(v)) if v.is_finite() => ConfigValue::Number(*v),
            (ConfigKind::Number, ConfigValue::Number(v)) => {
                return Err(format!("{v} is not a finite number"));
            }
            (ConfigKind::Word, ConfigValue::Word(w)) => {
                if !is_dictionary_word(w) {
                    return Err(format!("'{w}' is not a single dictionary word"));
                }
                if !self.choices.is_empty() && !self.choices.iter().any(|c| c == w) {
                    return Err(format!("'{w}' is not one of [{}]", self.choices.join(", ")));
                }
                ConfigValue::Word(w.clone())
            }
            (kind, other) => return Err(format!("expected {kind:?}, got {other}")),
        };

        if let Some(v) = value.as_f64() {
            let lo = self.min.unwrap_or(f64::NEG_INFINITY);
            let hi = self.max.unwrap_or(f64::INFINITY);
            if v < lo || v > hi {
                return Err(format!("{value} not in [{lo}, {hi}]"));
            }
        }
        Ok(value)
    }
}

/// Words are written into dictionaries verbatim, so they may not carry
/// dictionary syntax.
fn is_dictionary_word(word: &str) -> bool {
    !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | '+'))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConfigKind {
    Bool,
    Integer,
    Number,
    Word,
}

/// A config value as written in YAML/JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Integer(i64),
    Number(f64),
    Word(String),
}

impl ConfigValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Integer(i) => Some(*i as f64),
            ConfigValue::Number(v) => Some(*v),
            ConfigValue::Bool(_) | ConfigValue::Word(_) => None,
        }
    }

    /// Text written into the case dictionary.
    pub fn render(&self) -> String {
        match self {
            ConfigValue::Bool(b) => b.to_string(),
            ConfigValue::Integer(i) => i.to_string(),
            ConfigValue::Number(v) => fb_core::format_dict_number(*v),
            ConfigValue::Word(w) => w.clone(),
        }
    }
}

impl std::fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigValue::Word(w) => write!(f, "'{w}'"),
            other => f.write_str(&other.render()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigTargetDef {
    /// Path of the dictionary file, relative to the case root.
    pub file: String,
    pub locator: LocatorDef,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SolverDef {
    pub steps: Vec<StepDef>,
    pub timeout_s: f64,
    #[serde(default = "default_kill_grace")]
    pub kill_grace_s: f64,
    #[serde(default = "default_log_tail")]
    pub log_tail_bytes: usize,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_kill_grace() -> f64 {
    2.0
}

fn default_log_tail() -> usize {
    16 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepDef {
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputDef {
    pub name: String,
    pub source: OutputSource,
}

impl OutputDef {
    /// Number of scalars this output contributes to the QoI vector.
    pub fn size(&self) -> usize {
        match &self.source {
            OutputSource::Table { columns, .. } => columns.len(),
            OutputSource::Scrape { .. } | OutputSource::Field { .. } => 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum OutputSource {
    /// Whitespace-separated numeric table; `columns` are 0-based.
    Table {
        file: String,
        columns: Vec<usize>,
        #[serde(default)]
        aggregate: Aggregate,
    },
    /// First number following `key` on every line that contains it.
    Scrape {
        file: String,
        key: String,
        #[serde(default)]
        aggregate: Aggregate,
    },
    /// Scalar field file entry (`uniform` or `nonuniform List<scalar>`).
    Field {
        file: String,
        #[serde(default = "default_field_entry")]
        entry: String,
        #[serde(default)]
        aggregate: Aggregate,
    },
}

impl OutputSource {
    pub fn file(&self) -> &str {
        match self {
            OutputSource::Table { file, .. }
            | OutputSource::Scrape { file, .. }
            | OutputSource::Field { file, .. } => file,
        }
    }
}

fn default_field_entry() -> String {
    "internalField".to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Aggregate {
    #[default]
    Last,
    First,
    Mean,
    Min,
    Max,
    Sum,
}
