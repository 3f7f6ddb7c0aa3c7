//! Hierarchical, range-checked tunables for lock behaviors and modes.
//!
//! The tree has one root holding named subsections. Every behavior or mode
//! that owns tunables registers exactly one subsection keyed by its own name
//! (`locked`, `find_sum`, `optimal_mode`, `calibrate`) at startup. After
//! registration, lookups of that key always succeed.

use crate::error::{FocusLockError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A scalar parameter value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
}

impl ParameterValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            ParameterValue::Int(v) => *v as f64,
            ParameterValue::Float(v) => *v,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Int(v) => write!(f, "{}", v),
            ParameterValue::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Declared type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterKind {
    Int,
    Float,
}

/// One typed tunable with an optional inclusive range
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    pub name: String,
    pub description: String,
    pub kind: ParameterKind,
    value: ParameterValue,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Parameter {
    pub fn int(name: &str, description: &str, value: i64) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            kind: ParameterKind::Int,
            value: ParameterValue::Int(value),
            min: None,
            max: None,
        }
    }

    pub fn float(name: &str, description: &str, value: f64) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            kind: ParameterKind::Float,
            value: ParameterValue::Float(value),
            min: None,
            max: None,
        }
    }

    pub fn range_int(name: &str, description: &str, value: i64, min: i64, max: i64) -> Self {
        Self {
            min: Some(min as f64),
            max: Some(max as f64),
            ..Self::int(name, description, value)
        }
    }

    pub fn range_float(name: &str, description: &str, value: f64, min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
            ..Self::float(name, description, value)
        }
    }

    /// Bound the value from below only
    pub fn with_min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn value(&self) -> ParameterValue {
        self.value
    }

    /// Coerce and range-check a candidate value against this declaration
    fn check(&self, value: ParameterValue) -> std::result::Result<ParameterValue, String> {
        let value = match (self.kind, value) {
            (ParameterKind::Int, ParameterValue::Int(v)) => ParameterValue::Int(v),
            (ParameterKind::Int, ParameterValue::Float(v)) => {
                return Err(format!("expected an integer, got {}", v));
            }
            (ParameterKind::Float, v) => ParameterValue::Float(v.as_f64()),
        };

        let raw = value.as_f64();
        if !raw.is_finite() {
            return Err(format!("value {} is not finite", raw));
        }
        if let Some(min) = self.min {
            if raw < min {
                return Err(format!("value {} is below minimum {}", raw, min));
            }
        }
        if let Some(max) = self.max {
            if raw > max {
                return Err(format!("value {} is above maximum {}", raw, max));
            }
        }

        Ok(value)
    }
}

/// A named group of parameters owned by one behavior or mode
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParameterSection {
    name: String,
    parameters: BTreeMap<String, Parameter>,
}

impl ParameterSection {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare a parameter. The default value must satisfy its own range.
    pub fn add(&mut self, parameter: Parameter) -> Result<&mut Self> {
        if self.parameters.contains_key(&parameter.name) {
            return Err(FocusLockError::parameter(
                self.name.as_str(),
                parameter.name.as_str(),
                "parameter registered twice",
            ));
        }
        parameter
            .check(parameter.value)
            .map_err(|details| FocusLockError::Parameter {
                section: self.name.clone(),
                name: parameter.name.clone(),
                details,
            })?;
        self.parameters.insert(parameter.name.clone(), parameter);
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Result<&Parameter> {
        self.parameters.get(name).ok_or_else(|| {
            FocusLockError::parameter(self.name.as_str(), name, "no such parameter")
        })
    }

    pub fn get_f64(&self, name: &str) -> Result<f64> {
        Ok(self.get(name)?.value.as_f64())
    }

    pub fn get_i64(&self, name: &str) -> Result<i64> {
        match self.get(name)?.value {
            ParameterValue::Int(v) => Ok(v),
            ParameterValue::Float(_) => Err(FocusLockError::parameter(
                self.name.as_str(),
                name,
                "parameter is not an integer",
            )),
        }
    }

    pub fn get_usize(&self, name: &str) -> Result<usize> {
        let value = self.get_i64(name)?;
        usize::try_from(value).map_err(|_| {
            FocusLockError::parameter(self.name.as_str(), name, "parameter is negative")
        })
    }

    pub fn set(&mut self, name: &str, value: ParameterValue) -> Result<()> {
        let section = self.name.clone();
        let parameter = self.parameters.get_mut(name).ok_or_else(|| {
            FocusLockError::parameter(section.as_str(), name, "no such parameter")
        })?;
        parameter.value = parameter
            .check(value)
            .map_err(|details| FocusLockError::Parameter {
                section,
                name: name.to_string(),
                details,
            })?;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.values()
    }
}

/// Root of the parameter tree
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LockParameters {
    sections: BTreeMap<String, ParameterSection>,
}

/// Per-section overrides as read from the `[parameters.*]` config tables
pub type ParameterOverrides = BTreeMap<String, BTreeMap<String, ParameterValue>>;

impl LockParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subsection. Each key may only be registered once.
    pub fn add_subsection(&mut self, name: &str) -> Result<&mut ParameterSection> {
        if self.sections.contains_key(name) {
            return Err(FocusLockError::parameter(
                name,
                "*",
                "subsection registered twice",
            ));
        }
        Ok(self
            .sections
            .entry(name.to_string())
            .or_insert_with(|| ParameterSection::new(name)))
    }

    pub fn section(&self, name: &str) -> Result<&ParameterSection> {
        self.sections
            .get(name)
            .ok_or_else(|| FocusLockError::parameter(name, "*", "no such subsection"))
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    pub fn set(&mut self, section: &str, name: &str, value: ParameterValue) -> Result<()> {
        self.sections
            .get_mut(section)
            .ok_or_else(|| FocusLockError::parameter(section, name, "no such subsection"))?
            .set(name, value)
    }

    /// Write configured overrides onto the registered tree. Unknown sections
    /// or parameters are rejected rather than silently ignored.
    pub fn apply_overrides(&mut self, overrides: &ParameterOverrides) -> Result<()> {
        for (section, values) in overrides {
            for (name, value) in values {
                self.set(section, name, *value)?;
            }
        }
        Ok(())
    }

    pub fn sections(&self) -> impl Iterator<Item = &ParameterSection> {
        self.sections.values()
    }

    /// Check a replacement tree against this registered one. The snapshot
    /// must carry exactly the registered sections and parameters, each of the
    /// registered kind and within the registered range.
    pub fn validate_snapshot(&self, snapshot: &LockParameters) -> Result<()> {
        for (name, section) in &self.sections {
            let candidate = snapshot.sections.get(name).ok_or_else(|| {
                FocusLockError::parameter(name.as_str(), "*", "missing from new parameters")
            })?;

            for (key, declared) in &section.parameters {
                let parameter = candidate.parameters.get(key).ok_or_else(|| {
                    FocusLockError::parameter(name.as_str(), key.as_str(), "missing from new parameters")
                })?;
                if parameter.kind != declared.kind {
                    return Err(FocusLockError::Parameter {
                        section: name.clone(),
                        name: key.clone(),
                        details: format!("expected {:?}, got {:?}", declared.kind, parameter.kind),
                    });
                }
                declared
                    .check(parameter.value)
                    .map_err(|details| FocusLockError::Parameter {
                        section: name.clone(),
                        name: key.clone(),
                        details,
                    })?;
            }

            if let Some(key) = candidate
                .parameters
                .keys()
                .find(|key| !section.parameters.contains_key(*key))
            {
                return Err(FocusLockError::parameter(name.as_str(), key.as_str(), "no such parameter"));
            }
        }

        if let Some(name) = snapshot
            .sections
            .keys()
            .find(|name| !self.sections.contains_key(*name))
        {
            return Err(FocusLockError::parameter(name.as_str(), "*", "no such subsection"));
        }
        Ok(())
    }
}
