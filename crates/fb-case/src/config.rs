//! Resolution of a request's solver options against a model's declared
//! config parameters.

use crate::error::{CaseError, CaseResult};
use fb_deploy::{ConfigParamDef, ConfigValue};
use std::collections::BTreeMap;

/// The effective value of every declared option for one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaseConfig {
    values: BTreeMap<String, ConfigValue>,
}

impl CaseConfig {
    /// Check each requested option against its declaration and fill the
    /// rest from defaults. Unknown names are rejected.
    pub fn resolve(
        defs: &[ConfigParamDef],
        requested: &BTreeMap<String, ConfigValue>,
    ) -> CaseResult<Self> {
        if let Some(unknown) = requested
            .keys()
            .find(|name| !defs.iter().any(|d| &d.name == *name))
        {
            return Err(CaseError::InvalidConfig {
                name: unknown.clone(),
                reason: "not a config parameter of this model".to_string(),
            });
        }

        let mut values = BTreeMap::new();
        for def in defs {
            let raw = requested.get(&def.name).unwrap_or(&def.default);
            let value = def.coerce(raw).map_err(|reason| CaseError::InvalidConfig {
                name: def.name.clone(),
                reason,
            })?;
            values.insert(def.name.clone(), value);
        }
        Ok(Self { values })
    }

    pub fn get(&self, name: &str) -> Option<&ConfigValue> {
        self.values.get(name)
    }

    pub fn values(&self) -> &BTreeMap<String, ConfigValue> {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
