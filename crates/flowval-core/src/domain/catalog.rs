//! Tool catalog: descriptors and typed parameter constraints.
//!
//! Parameter schemas are a closed set of constraint kinds rather than free-form
//! JSON Schema fragments. Each kind validates a JSON value on its own.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::error::{CatalogError, FlowvalError, Result};
use crate::domain::workflow::ParamValue;

/// Constraint attached to a single tool parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamConstraint {
    /// Free string, or one of `allowed` when present.
    String {
        #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
        allowed: Option<Vec<String>>,
    },
    /// Any JSON number within the optional bounds.
    Number {
        #[serde(skip_serializing_if = "Option::is_none")]
        minimum: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        maximum: Option<f64>,
    },
    /// Integral number within the optional bounds.
    Integer {
        #[serde(skip_serializing_if = "Option::is_none")]
        minimum: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        maximum: Option<i64>,
    },
    Boolean,
    StringArray,
    Object,
}

/// A value that failed its parameter constraint.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConstraintViolation {
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("{value:?} is not one of {allowed:?}")]
    NotAllowed { value: String, allowed: Vec<String> },

    #[error("{value} is below minimum {minimum}")]
    BelowMinimum { value: f64, minimum: f64 },

    #[error("{value} is above maximum {maximum}")]
    AboveMaximum { value: f64, maximum: f64 },
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn check_bounds(
    value: f64,
    minimum: Option<f64>,
    maximum: Option<f64>,
) -> std::result::Result<(), ConstraintViolation> {
    if let Some(minimum) = minimum {
        if value < minimum {
            return Err(ConstraintViolation::BelowMinimum { value, minimum });
        }
    }
    if let Some(maximum) = maximum {
        if value > maximum {
            return Err(ConstraintViolation::AboveMaximum { value, maximum });
        }
    }
    Ok(())
}

impl ParamConstraint {
    /// Short name used in messages and prompts.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::String { .. } => "string",
            Self::Number { .. } => "number",
            Self::Integer { .. } => "integer",
            Self::Boolean => "boolean",
            Self::StringArray => "array<string>",
            Self::Object => "object",
        }
    }

    /// Validate a literal JSON value against this constraint.
    pub fn validate(&self, value: &Value) -> std::result::Result<(), ConstraintViolation> {
        let mismatch = || ConstraintViolation::TypeMismatch {
            expected: self.kind_name(),
            found: json_kind(value),
        };

        match self {
            Self::String { allowed } => {
                let s = value.as_str().ok_or_else(mismatch)?;
                match allowed {
                    Some(allowed) if !allowed.iter().any(|a| a == s) => {
                        Err(ConstraintViolation::NotAllowed {
                            value: s.to_string(),
                            allowed: allowed.clone(),
                        })
                    }
                    _ => Ok(()),
                }
            }
            Self::Number { minimum, maximum } => {
                let n = value.as_f64().ok_or_else(mismatch)?;
                check_bounds(n, *minimum, *maximum)
            }
            Self::Integer { minimum, maximum } => {
                let n = match value.as_i64() {
                    Some(i) => i as f64,
                    None => match value.as_f64() {
                        Some(f) if f.fract() == 0.0 => f,
                        _ => return Err(mismatch()),
                    },
                };
                check_bounds(n, minimum.map(|m| m as f64), maximum.map(|m| m as f64))
            }
            Self::Boolean => value.as_bool().map(|_| ()).ok_or_else(mismatch),
            Self::StringArray => {
                let items = value.as_array().ok_or_else(mismatch)?;
                if items.iter().all(Value::is_string) {
                    Ok(())
                } else {
                    Err(mismatch())
                }
            }
            Self::Object => value.as_object().map(|_| ()).ok_or_else(mismatch),
        }
    }

    fn bounds(&self) -> Option<(f64, f64)> {
        match self {
            Self::Number {
                minimum: Some(lo),
                maximum: Some(hi),
            } => Some((*lo, *hi)),
            Self::Integer {
                minimum: Some(lo),
                maximum: Some(hi),
            } => Some((*lo as f64, *hi as f64)),
            _ => None,
        }
    }
}

/// Schema entry for one tool parameter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParameterSpec {
    #[serde(flatten)]
    pub constraint: ParamConstraint,

    #[serde(default)]
    pub required: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParameterSpec {
    pub fn required(constraint: ParamConstraint) -> Self {
        Self {
            constraint,
            required: true,
            default: None,
            description: None,
        }
    }

    pub fn optional(constraint: ParamConstraint) -> Self {
        Self {
            constraint,
            required: false,
            default: None,
            description: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// A problem found when checking step parameters against a tool schema.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterProblem {
    Missing { parameter: String },
    Invalid { parameter: String, reason: String },
}

/// Immutable description of a tool an agent may call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Grouping label used by category-based strategies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, alias = "parameter_schema")]
    pub parameters: BTreeMap<String, ParameterSpec>,

    /// Output references the tool declares it produces.
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            category: None,
            parameters: BTreeMap::new(),
            outputs: Vec::new(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        self.parameters.insert(name.into(), spec);
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.outputs.push(output.into());
        self
    }

    fn validate(&self) -> std::result::Result<(), CatalogError> {
        if self.name.trim().is_empty() {
            return Err(CatalogError::EmptyToolName);
        }
        for (parameter, spec) in &self.parameters {
            if let Some((minimum, maximum)) = spec.constraint.bounds() {
                if minimum > maximum {
                    return Err(CatalogError::InvertedBounds {
                        tool: self.name.clone(),
                        parameter: parameter.clone(),
                        minimum,
                        maximum,
                    });
                }
            }
            if let Some(default) = &spec.default {
                spec.constraint
                    .validate(default)
                    .map_err(|v| CatalogError::InvalidDefault {
                        tool: self.name.clone(),
                        parameter: parameter.clone(),
                        reason: v.to_string(),
                    })?;
            }
        }
        Ok(())
    }

    /// Check a step's parameters against this tool's schema.
    ///
    /// References are not type-checked; a required parameter with a schema
    /// default counts as supplied. Parameters the schema does not declare
    /// are accepted.
    pub fn check_parameters(&self, params: &BTreeMap<String, ParamValue>) -> Vec<ParameterProblem> {
        let mut problems = Vec::new();
        for (name, spec) in &self.parameters {
            match params.get(name) {
                None if spec.required && spec.default.is_none() => {
                    problems.push(ParameterProblem::Missing {
                        parameter: name.clone(),
                    });
                }
                Some(ParamValue::Literal(value)) => {
                    if let Err(v) = spec.constraint.validate(value) {
                        problems.push(ParameterProblem::Invalid {
                            parameter: name.clone(),
                            reason: v.to_string(),
                        });
                    }
                }
                _ => {}
            }
        }
        problems
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    Wrapped { tools: Vec<ToolDescriptor> },
    Bare(Vec<ToolDescriptor>),
}

/// Ordered, duplicate-free set of tool descriptors.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolCatalog {
    tools: Vec<ToolDescriptor>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl ToolCatalog {
    /// Build a catalog, rejecting empty or duplicate names and invalid schemas.
    pub fn new(tools: Vec<ToolDescriptor>) -> std::result::Result<Self, CatalogError> {
        let mut index = HashMap::with_capacity(tools.len());
        for (pos, tool) in tools.iter().enumerate() {
            tool.validate()?;
            if index.insert(tool.name.clone(), pos).is_some() {
                return Err(CatalogError::DuplicateTool {
                    name: tool.name.clone(),
                });
            }
        }
        Ok(Self { tools, index })
    }

    /// Parse a catalog from `{"tools": [...]}` or a bare JSON array.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let tools = match serde_json::from_str::<CatalogFile>(raw)? {
            CatalogFile::Wrapped { tools } | CatalogFile::Bare(tools) => tools,
        };
        Ok(Self::new(tools)?)
    }

    /// Load a catalog file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            FlowvalError::Config(format!("read catalog {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&pos| &self.tools[pos])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|t| t.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
