//! Prompt variants used across extraction rounds.
//!
//! Each round may phrase the request differently so that independent rounds
//! fail in different ways, which is what makes reconciliation useful.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::fmt::Write;

use crate::normalize::NormalizedResult;
use crate::schema::ExtractionSchema;

/// System preamble sent with every extraction request.
pub const EXTRACTION_PREAMBLE: &str = "You are a Web Data Extraction Agent.";

/// System preamble sent with verification requests.
pub const VERIFICATION_PREAMBLE: &str = "You check extracted data against the page it came from.";

/// How an extraction request is phrased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptVariant {
    /// Plain extraction with field guidance.
    #[default]
    Standard,
    /// Emphasises scanning the whole document and capturing full text.
    Completeness,
    /// A checklist-driven, methodical pass.
    Thorough,
    /// Standard request with extra weight on required fields.
    Emphasis,
}

impl PromptVariant {
    /// Short label for logs and events.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Completeness => "completeness",
            Self::Thorough => "thorough",
            Self::Emphasis => "emphasis",
        }
    }
}

impl fmt::Display for PromptVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Builds the full instruction for one attempt.
#[must_use]
pub fn build_prompt(schema: &ExtractionSchema, variant: PromptVariant, content: &str) -> String {
    let object = if schema.object_description().is_empty() {
        schema.object_name()
    } else {
        schema.object_description()
    };
    let function = schema.function_name();

    let mut prompt = match variant {
        PromptVariant::Standard | PromptVariant::Emphasis => format!(
            "Extract the {object} from the content below using the `{function}` function.\n\n\
             INSTRUCTIONS:\n\
             - Extract all available information for each field\n\
             - Use exact text from the content when possible\n\
             - If a field is not found, set it to null\n\
             - Preserve the formatting and units of numerical values\n"
        ),
        PromptVariant::Completeness => format!(
            "Carefully extract the {object} using `{function}`. Focus on completeness and accuracy.\n\n\
             EXTRACTION STRATEGY:\n\
             - Scan the entire content systematically\n\
             - Look at both visible text and data attributes\n\
             - Capture the full text of text fields, not abbreviations\n\
             - Preserve the formatting and units of numerical values\n\
             - Double-check each field before answering\n"
        ),
        PromptVariant::Thorough => format!(
            "Perform a thorough extraction of the {object} using `{function}`.\n\n\
             QUALITY CHECKLIST:\n\
             - All required fields are extracted\n\
             - Text fields are complete and untruncated\n\
             - Numbers keep their units and formatting\n\
             - No placeholder or generic values\n\
             - Every value appears in the content\n"
        ),
    };

    if variant == PromptVariant::Emphasis && !schema.required().is_empty() {
        let _ = writeln!(
            prompt,
            "- Pay special attention to extracting these required fields completely: {}",
            schema.required().join(", ")
        );
    }

    let _ = write!(
        prompt,
        "\nFIELDS:\n{}\nOnly answer by calling the function.\n\nCONTENT:\n{content}",
        schema.field_guidance()
    );
    prompt
}

/// Builds the request asking the model to check an attempt against the page.
///
/// The expected answer is a single line `VALID|<confidence>|<reason>` or
/// `INVALID|<confidence>|<reason>`.
#[must_use]
pub fn build_verification_prompt(
    schema: &ExtractionSchema,
    records: &[NormalizedResult],
    content: &str,
) -> String {
    let data = match records {
        [single] if !schema.is_array() => Value::Object(single.to_nested()),
        many => Value::Array(
            many.iter()
                .map(|record| Value::Object(record.to_nested()))
                .collect(),
        ),
    };
    let extracted = json!({ schema.object_name(): data });
    let required = if schema.required().is_empty() {
        "none".to_string()
    } else {
        schema.required().join(", ")
    };

    format!(
        "Check whether the extracted data below is accurate for the content.\n\n\
         EXTRACTED DATA:\n{extracted:#}\n\n\
         REQUIRED FIELDS: {required}\n\n\
         Check that:\n\
         1. Every value appears in the content and is correct\n\
         2. Required fields are present\n\
         3. The values are consistent with each other\n\n\
         Answer with one line: VALID or INVALID, a confidence between 0.0 and 1.0, \
         and a brief reason, separated by `|`. Example: VALID|0.9|all fields match\n\n\
         CONTENT:\n{content}"
    )
}
