use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Built-in rule set covering the three stock sources. Used when no
/// SCHEMA_RULES_PATH is configured.
const DEFAULT_RULES: &str = include_str!("../rules/default_rules.json");

/// Enumeration of errors raised while loading or querying the schema
/// registry. Rule-loading failures are fatal configuration errors; the run
/// must abort before any record is processed.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("no validation rules registered for table {0}")]
    UnknownTable(String),
    #[error("failed to read validation rules: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse validation rules: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The expected type of a field, as declared in the rule file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Integer,
    Float,
    Boolean,
    String,
    Timestamp,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::String => "string",
            FieldType::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

/// One field's contract: expected type, nullability, optional inclusive
/// numeric range, optional enumerated allowed values.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldRule {
    pub field: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default = "nullable_default")]
    pub nullable: bool,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub allowed: Option<Vec<serde_json::Value>>,
}

fn nullable_default() -> bool {
    true
}

/// Rules for one logical table. Declaration order is preserved: violations
/// are reported in this order, and rejection reasons depend on it.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct TableRules {
    pub fields: Vec<FieldRule>,
}

/// The declarative rule set, loaded once at startup and immutable for the
/// remainder of the run. Adding a field or a table is a rule-file change,
/// not a code change.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct SchemaRegistry {
    tables: HashMap<String, TableRules>,
}

impl SchemaRegistry {
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, SchemaError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn builtin() -> Result<Self, SchemaError> {
        Self::from_json(DEFAULT_RULES)
    }

    /// Load from the configured path, or fall back to the built-in rules.
    pub fn load(path: Option<&str>) -> Result<Self, SchemaError> {
        match path {
            Some(path) => Self::from_file(Path::new(path)),
            None => Self::builtin(),
        }
    }

    pub fn rules_for(&self, table: &str) -> Result<&TableRules, SchemaError> {
        self.tables
            .get(table)
            .ok_or_else(|| SchemaError::UnknownTable(table.to_owned()))
    }
}
