//! Declarative field configuration loaded from JSON.
//!
//! A [`FieldConfig`] describes what to pull out of a page: the tool/function
//! the model is asked to call, the object it returns, and an ordered set of
//! typed fields.

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::ConfigError;

/// The closed set of field types the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// Free text.
    String,
    /// A JSON number.
    Number,
}

impl FieldType {
    /// Parses a type name, failing fast on anything outside the closed set.
    pub fn parse(field: &str, ty: &str) -> Result<Self, ConfigError> {
        match ty {
            "string" => Ok(Self::String),
            "number" => Ok(Self::Number),
            other => Err(ConfigError::UnknownType {
                field: field.to_string(),
                ty: other.to_string(),
            }),
        }
    }

    /// The JSON-schema type keyword for this field type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One field entry as written in the configuration file.
///
/// The type is kept as a raw string here so that unknown types surface as a
/// [`ConfigError`] from [`FieldConfig::field_specs`] instead of an opaque
/// deserialization failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FieldDefinition {
    /// Field type: `string` or `number`.
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: String,
    /// What the field means, used in prompts.
    #[serde(default)]
    pub description: String,
    /// Whether a value must be present for the result to be complete.
    #[serde(default)]
    pub required: bool,
    /// Optional sample values quoted in the field guidance.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
}

fn default_field_type() -> String {
    "string".to_string()
}

const fn default_is_array() -> bool {
    true
}

/// Caller-supplied description of what to extract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FieldConfig {
    /// Name of the tool the model is asked to call.
    pub function_name: String,
    /// Key under which the extracted object (or array) is returned.
    pub object_name: String,
    /// Human description of the extracted object, e.g. "project details".
    #[serde(default)]
    pub object_description: String,
    /// Description of the tool itself.
    #[serde(default)]
    pub function_description: String,
    /// `true` for an array of objects, `false` for a single object.
    #[serde(default = "default_is_array")]
    pub is_array: bool,
    /// Field definitions in declaration order.
    #[serde(default)]
    pub fields: IndexMap<String, FieldDefinition>,
}

/// A validated, immutable field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Unique key.
    pub name: String,
    /// Value type.
    pub field_type: FieldType,
    /// Free-text meaning of the field.
    pub description: String,
    /// Whether the field must be present.
    pub required: bool,
    /// Sample values, possibly empty.
    pub examples: Vec<String>,
}

impl FieldConfig {
    /// Parses a configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Validates the field table and returns it as typed [`FieldSpec`]s.
    ///
    /// Field names must be non-empty; uniqueness is guaranteed by the map but
    /// names are compared after trimming so `"a"` and `" a "` collide.
    pub fn field_specs(&self) -> Result<Vec<FieldSpec>, ConfigError> {
        let mut specs: Vec<FieldSpec> = Vec::with_capacity(self.fields.len());
        for (name, def) in &self.fields {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                return Err(ConfigError::EmptyFieldName);
            }
            if specs.iter().any(|s| s.name == trimmed) {
                return Err(ConfigError::DuplicateField(trimmed.to_string()));
            }
            specs.push(FieldSpec {
                name: trimmed.to_string(),
                field_type: FieldType::parse(trimmed, &def.field_type)?,
                description: def.description.clone(),
                required: def.required,
                examples: def.examples.clone(),
            });
        }
        Ok(specs)
    }

    /// Returns the JSON Schema describing the configuration file format.
    #[must_use]
    pub fn json_schema() -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(Self)).unwrap_or_default()
    }
}
