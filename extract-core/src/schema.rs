//! Request schema derived from a [`FieldConfig`].
//!
//! The schema is what the model sees as its single callable tool: a function
//! whose only parameter is the object (or array of objects) being extracted.

use indexmap::IndexMap;
use rig::completion::ToolDefinition;
use serde_json::{json, Map, Value};
use std::fmt::{self, Write};
use std::sync::Arc;

use crate::config::{FieldConfig, FieldSpec, FieldType};
use crate::error::ConfigError;

/// Read-only schema built once per processing request.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionSchema {
    function_name: String,
    object_name: String,
    object_description: String,
    is_array: bool,
    fields: Vec<FieldSpec>,
    types: IndexMap<String, FieldType>,
    required: Vec<String>,
    description: String,
    parameters: Value,
    validator: CompiledParameters,
}

/// The parameters schema compiled once at build time.
///
/// Derived from `parameters`, so it takes no part in equality.
#[derive(Clone)]
struct CompiledParameters(Arc<jsonschema::Validator>);

impl PartialEq for CompiledParameters {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl fmt::Debug for CompiledParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CompiledParameters")
    }
}

impl ExtractionSchema {
    /// Builds the schema, validating the configuration on the way.
    ///
    /// Building twice from the same configuration yields equal schemas.
    pub fn build(config: &FieldConfig) -> Result<Self, ConfigError> {
        if config.function_name.trim().is_empty() {
            return Err(ConfigError::MissingKey("function_name"));
        }
        if config.object_name.trim().is_empty() {
            return Err(ConfigError::MissingKey("object_name"));
        }

        let fields = config.field_specs()?;
        let types: IndexMap<String, FieldType> = fields
            .iter()
            .map(|f| (f.name.clone(), f.field_type))
            .collect();
        let required: Vec<String> = fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.clone())
            .collect();

        let description = describe(config, &fields);
        let parameters = parameters_schema(config, &types, &required);

        let validator = jsonschema::Validator::new(&parameters)
            .map_err(|e| ConfigError::Schema(e.to_string()))?;

        Ok(Self {
            function_name: config.function_name.clone(),
            object_name: config.object_name.clone(),
            object_description: config.object_description.clone(),
            is_array: config.is_array,
            fields,
            types,
            required,
            description,
            parameters,
            validator: CompiledParameters(Arc::new(validator)),
        })
    }

    /// Name of the tool the model must call.
    #[must_use]
    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    /// Key wrapping the extracted object in tool arguments and final output.
    #[must_use]
    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    /// Human description of the extracted object.
    #[must_use]
    pub fn object_description(&self) -> &str {
        &self.object_description
    }

    /// Whether the tool returns an array of objects.
    #[must_use]
    pub const fn is_array(&self) -> bool {
        self.is_array
    }

    /// Field specs in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Ordered `name -> type` mapping.
    #[must_use]
    pub const fn types(&self) -> &IndexMap<String, FieldType> {
        &self.types
    }

    /// Names of required fields, in declaration order.
    #[must_use]
    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// Whether `name` is one of the configured fields.
    #[must_use]
    pub fn is_field(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Combined description enumerating every field.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// JSON schema of the tool parameters.
    #[must_use]
    pub const fn parameters(&self) -> &Value {
        &self.parameters
    }

    /// Per-field guidance lines for prompts.
    ///
    /// Unlike [`description`](Self::description), this marks required fields
    /// and quotes examples.
    #[must_use]
    pub fn field_guidance(&self) -> String {
        let mut out = String::new();
        for field in &self.fields {
            let _ = write!(out, "- {} ({}): {}", field.name, field.field_type, field.description);
            if field.required {
                out.push_str(" (required)");
            }
            if !field.examples.is_empty() {
                let _ = write!(out, " (examples: {})", field.examples.join(", "));
            }
            out.push('\n');
        }
        out
    }

    /// The schema as a rig tool definition.
    #[must_use]
    pub fn tool_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.function_name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }

    /// Lists JSON-schema violations of a raw tool payload.
    ///
    /// Violations are diagnostics only; scoring is done by the
    /// [`QualityValidator`](crate::validation::QualityValidator).
    #[must_use]
    pub fn schema_violations(&self, raw: &Value) -> Vec<String> {
        self.validator
            .0
            .iter_errors(raw)
            .map(|error| format!("At path '{}': {}", error.instance_path, error))
            .collect()
    }
}

fn describe(config: &FieldConfig, fields: &[FieldSpec]) -> String {
    let mut description = config.function_description.clone();
    if fields.is_empty() {
        return description;
    }
    if config.is_array {
        description.push_str(". Each object must include:\n");
    } else {
        description.push_str(". The object must include:\n");
    }
    let lines: Vec<String> = fields
        .iter()
        .map(|f| format!("- {}: {}", f.name, f.description))
        .collect();
    description.push_str(&lines.join("\n"));
    description
}

fn parameters_schema(
    config: &FieldConfig,
    types: &IndexMap<String, FieldType>,
    required: &[String],
) -> Value {
    let properties: Map<String, Value> = types
        .iter()
        .map(|(name, ty)| (name.clone(), json!({ "type": ty.as_str() })))
        .collect();

    let object_schema = json!({
        "type": "object",
        "properties": properties,
        "required": required,
    });

    let object_schema = if config.is_array {
        json!({ "type": "array", "items": object_schema })
    } else {
        object_schema
    };

    let mut root = Map::new();
    root.insert(config.object_name.clone(), object_schema);

    json!({
        "type": "object",
        "properties": root,
        "required": [config.object_name],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(is_array: bool) -> FieldConfig {
        FieldConfig::from_json(&format!(
            r#"{{
                "function_name": "extract_project",
                "object_name": "project",
                "object_description": "project details",
                "function_description": "Extract the project",
                "is_array": {is_array},
                "fields": {{
                    "company_name": {{"type": "string", "description": "Company name", "required": true}},
                    "profit": {{"type": "number", "description": "Profit percent", "examples": ["18", "24"]}}
                }}
            }}"#
        ))
        .unwrap()
    }

    #[test]
    fn test_build_single_object() {
        let schema = ExtractionSchema::build(&config(false)).unwrap();
        assert_eq!(schema.required(), ["company_name"]);
        assert_eq!(schema.types()["profit"], FieldType::Number);
        assert_eq!(
            schema.parameters()["properties"]["project"]["type"],
            "object"
        );
        assert_eq!(schema.parameters()["required"][0], "project");
        assert!(schema
            .description()
            .starts_with("Extract the project. The object must include:\n"));
        assert!(schema.description().contains("- profit: Profit percent"));
    }

    #[test]
    fn test_build_array_shape() {
        let schema = ExtractionSchema::build(&config(true)).unwrap();
        let project = &schema.parameters()["properties"]["project"];
        assert_eq!(project["type"], "array");
        assert_eq!(project["items"]["properties"]["company_name"]["type"], "string");
        assert!(schema.description().contains("Each object must include"));
    }

    #[test]
    fn test_build_is_referentially_stable() {
        let cfg = config(false);
        assert_eq!(
            ExtractionSchema::build(&cfg).unwrap(),
            ExtractionSchema::build(&cfg).unwrap()
        );
    }

    #[test]
    fn test_missing_function_name() {
        let mut cfg = config(false);
        cfg.function_name = " ".to_string();
        assert!(matches!(
            ExtractionSchema::build(&cfg),
            Err(ConfigError::MissingKey("function_name"))
        ));
    }

    #[test]
    fn test_field_guidance_marks_required_and_examples() {
        let schema = ExtractionSchema::build(&config(false)).unwrap();
        let guidance = schema.field_guidance();
        assert!(guidance.contains("- company_name (string): Company name (required)"));
        assert!(guidance.contains("(examples: 18, 24)"));
    }

    #[test]
    fn test_tool_definition_mirrors_schema() {
        let schema = ExtractionSchema::build(&config(false)).unwrap();
        let tool = schema.tool_definition();
        assert_eq!(tool.name, "extract_project");
        assert_eq!(&tool.parameters, schema.parameters());
    }

    #[test]
    fn test_schema_violations_reports_missing_required() {
        let schema = ExtractionSchema::build(&config(false)).unwrap();
        let violations = schema.schema_violations(&json!({"project": {"profit": 12}}));
        assert!(violations.iter().any(|v| v.contains("company_name")));
        assert!(schema
            .schema_violations(&json!({"project": {"company_name": "Acme"}}))
            .is_empty());
    }

    #[test]
    fn test_cloned_schema_shares_compiled_validator() {
        let schema = ExtractionSchema::build(&config(false)).unwrap();
        let copy = schema.clone();
        assert!(Arc::ptr_eq(&schema.validator.0, &copy.validator.0));
        assert_eq!(
            copy.schema_violations(&json!({"project": {"profit": 12}})),
            schema.schema_violations(&json!({"project": {"profit": 12}}))
        );
    }
}
