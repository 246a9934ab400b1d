//! Heuristic quality scoring of normalized results.

use serde::Serialize;
use serde_json::Value;

use crate::config::{FieldSpec, FieldType};
use crate::markers::contains_error_marker;
use crate::normalize::NormalizedResult;
use crate::schema::ExtractionSchema;

const SCORE_FULL: f64 = 1.0;
const SCORE_SHORT_TEXT: f64 = 0.7;
const SCORE_WRONG_TYPE: f64 = 0.5;
const SCORE_BLANK_TEXT: f64 = 0.3;
const ERROR_MARKER_PENALTY: f64 = 0.3;
/// Strings longer than this (after trimming) count as substantive.
const SHORT_TEXT_LEN: usize = 3;

/// Thresholds deciding whether a scored result is valid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationThresholds {
    /// Minimum aggregate confidence (default: 0.6).
    pub min_confidence: f64,
    /// Maximum number of issues tolerated (default: 2).
    pub max_issues: usize,
}

impl Default for ValidationThresholds {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            max_issues: 2,
        }
    }
}

impl ValidationThresholds {
    /// Set the minimum aggregate confidence.
    #[must_use]
    pub const fn with_min_confidence(mut self, min: f64) -> Self {
        self.min_confidence = min;
        self
    }

    /// Set the maximum number of tolerated issues.
    #[must_use]
    pub const fn with_max_issues(mut self, max: usize) -> Self {
        self.max_issues = max;
        self
    }
}

/// Result of scoring one normalized result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationOutcome {
    /// Whether the thresholds were met.
    pub is_valid: bool,
    /// Aggregate score in `[0, 1]`.
    pub confidence: f64,
    /// Detected issues, in field order.
    pub issues: Vec<String>,
}

impl ValidationOutcome {
    pub(crate) fn invalid(issues: Vec<String>) -> Self {
        Self {
            is_valid: false,
            confidence: 0.0,
            issues,
        }
    }
}

/// Scores results field by field against the schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityValidator {
    thresholds: ValidationThresholds,
}

impl QualityValidator {
    /// Creates a validator with the given thresholds.
    #[must_use]
    pub const fn new(thresholds: ValidationThresholds) -> Self {
        Self { thresholds }
    }

    /// The thresholds in use.
    #[must_use]
    pub const fn thresholds(&self) -> ValidationThresholds {
        self.thresholds
    }

    /// Scores a single record.
    ///
    /// Confidence is the mean per-field score over all configured fields, so
    /// absent optional fields pull it down without raising an issue. A schema
    /// without fields is never valid.
    ///
    /// A field answered with an object (stored under `field.sub` paths) is
    /// present with the wrong type. JSON booleans are not numbers here and
    /// score as a wrong type in `number` fields.
    #[must_use]
    pub fn validate(&self, result: &NormalizedResult, schema: &ExtractionSchema) -> ValidationOutcome {
        let fields = schema.fields();
        if fields.is_empty() {
            return ValidationOutcome::invalid(Vec::new());
        }

        let mut issues = Vec::new();
        let total: f64 = fields
            .iter()
            .map(|field| match result.get(&field.name) {
                None if result.has_nested(&field.name) => wrong_type(field, &mut issues),
                value => score_field(field, value, &mut issues),
            })
            .sum();

        let confidence = total / fields.len() as f64;
        ValidationOutcome {
            is_valid: confidence >= self.thresholds.min_confidence
                && issues.len() <= self.thresholds.max_issues,
            confidence,
            issues,
        }
    }

    /// Scores every record of one attempt.
    ///
    /// Confidence is the mean over records; the attempt is valid only when
    /// each record is. Issues are prefixed with the record index when there is
    /// more than one record.
    #[must_use]
    pub fn validate_records(
        &self,
        records: &[NormalizedResult],
        schema: &ExtractionSchema,
    ) -> ValidationOutcome {
        match records {
            [] => ValidationOutcome::invalid(vec!["No data extracted".to_string()]),
            [single] => self.validate(single, schema),
            many => {
                let mut issues = Vec::new();
                let mut total = 0.0;
                let mut all_valid = true;
                for (index, record) in many.iter().enumerate() {
                    let outcome = self.validate(record, schema);
                    total += outcome.confidence;
                    all_valid &= outcome.is_valid;
                    issues.extend(
                        outcome
                            .issues
                            .into_iter()
                            .map(|issue| format!("[record {index}] {issue}")),
                    );
                }
                let confidence = total / many.len() as f64;
                ValidationOutcome {
                    is_valid: all_valid && confidence >= self.thresholds.min_confidence,
                    confidence,
                    issues,
                }
            }
        }
    }
}

/// Missing, null, empty string and empty array all count as absent.
pub(crate) fn is_absent(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

fn score_field(field: &FieldSpec, value: Option<&Value>, issues: &mut Vec<String>) -> f64 {
    let name = &field.name;

    if field.required && is_absent(value) {
        issues.push(format!("Required field '{name}' is missing"));
        return 0.0;
    }

    let Some(value) = value.filter(|v| !v.is_null()) else {
        return 0.0;
    };

    let mut score = match (field.field_type, value) {
        (FieldType::Number, Value::Number(_)) => SCORE_FULL,
        (FieldType::Number, _) => wrong_type(field, issues),
        (FieldType::String, Value::String(text)) => match text.trim().chars().count() {
            0 => {
                issues.push(format!("Field '{name}' is empty or whitespace"));
                SCORE_BLANK_TEXT
            }
            len if len <= SHORT_TEXT_LEN => {
                issues.push(format!("Field '{name}' seems too short"));
                SCORE_SHORT_TEXT
            }
            _ => SCORE_FULL,
        },
        (FieldType::String, _) => wrong_type(field, issues),
    };

    if let Value::String(text) = value {
        if contains_error_marker(text) {
            issues.push(format!("Field '{name}' contains error text: {text}"));
            score *= ERROR_MARKER_PENALTY;
        }
    }

    score
}

fn wrong_type(field: &FieldSpec, issues: &mut Vec<String>) -> f64 {
    issues.push(format!("Field '{}' should be a {}", field.name, field.field_type));
    SCORE_WRONG_TYPE
}
