//! Binding of a flat input vector onto a model's declared inputs.

use crate::error::{CaseError, CaseResult};
use fb_core::{Real, ensure_finite, ensure_within};
use fb_deploy::InputDef;
use std::ops::Range;

/// Named, validated view over a request's input vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterVector {
    values: Vec<Real>,
    slots: Vec<Slot>,
}

#[derive(Debug, Clone, PartialEq)]
struct Slot {
    name: String,
    range: Range<usize>,
}

impl ParameterVector {
    /// Validate `values` against the declared inputs: total arity, finiteness
    /// and per-component bounds. Nothing outside the arguments is touched.
    pub fn bind(inputs: &[InputDef], values: &[Real]) -> CaseResult<Self> {
        let expected: usize = inputs.iter().map(|i| i.size).sum();
        if values.len() != expected {
            return Err(CaseError::ArityMismatch {
                expected,
                actual: values.len(),
            });
        }

        let mut slots = Vec::with_capacity(inputs.len());
        let mut offset = 0;
        for input in inputs {
            let range = offset..offset + input.size;
            for (component, &v) in values[range.clone()].iter().enumerate() {
                let what = if input.size == 1 {
                    input.name.clone()
                } else {
                    format!("{}[{}]", input.name, component)
                };
                ensure_finite(v, &what)
                    .and_then(|v| ensure_within(v, input.min, input.max, &what))
                    .map_err(|e| CaseError::InvalidParameter {
                        name: input.name.clone(),
                        reason: e.to_string(),
                    })?;
            }
            slots.push(Slot {
                name: input.name.clone(),
                range: range.clone(),
            });
            offset = range.end;
        }

        Ok(Self {
            values: values.to_vec(),
            slots,
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Real] {
        &self.values
    }

    /// Values of the named input (one for scalars, three for vectors).
    pub fn get(&self, name: &str) -> Option<&[Real]> {
        self.slots
            .iter()
            .find(|s| s.name == name)
            .map(|s| &self.values[s.range.clone()])
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|s| s.name.as_str())
    }

    /// True when this vector was bound against exactly these inputs (same
    /// names, order and sizes).
    pub fn matches(&self, inputs: &[InputDef]) -> bool {
        self.slots.len() == inputs.len()
            && self
                .slots
                .iter()
                .zip(inputs)
                .all(|(s, i)| s.name == i.name && s.range.len() == i.size)
    }
}
