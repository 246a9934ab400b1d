//! [`ExtractionModel`] over any rig-core completion model.
//!
//! The schema is offered as the only tool and the first tool call carries the
//! payload. Models that answer in text instead are accepted when the text is a
//! JSON object, bare or inside a code fence.

// Patterns are literals; compilation cannot fail at runtime.
#![allow(clippy::expect_used)]

use async_trait::async_trait;
use regex::Regex;
use rig::completion::message::AssistantContent;
use rig::completion::CompletionModel;
use serde_json::Value;
use std::sync::LazyLock;

use crate::error::ModelError;
use crate::extractor::ExtractionModel;
use crate::normalize::RawResult;
use crate::prompt::{EXTRACTION_PREAMBLE, VERIFICATION_PREAMBLE};
use crate::schema::ExtractionSchema;

static RE_JSON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*(.*?)\s*```").expect("valid regex"));
static RE_ANY_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```\s*(.*?)\s*```").expect("valid regex"));

/// Adapter from a rig completion model to [`ExtractionModel`].
#[derive(Clone)]
pub struct RigModel<M> {
    model: M,
    preamble: String,
}

impl<M: CompletionModel> RigModel<M> {
    /// Wraps a completion model with the default extraction preamble.
    #[must_use]
    pub fn new(model: M) -> Self {
        Self {
            model,
            preamble: EXTRACTION_PREAMBLE.to_string(),
        }
    }

    /// Replaces the system preamble.
    #[must_use]
    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = preamble.into();
        self
    }
}

#[async_trait]
impl<M> ExtractionModel for RigModel<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    async fn generate(
        &self,
        prompt: &str,
        schema: &ExtractionSchema,
    ) -> Result<Option<RawResult>, ModelError> {
        let response = self
            .model
            .completion_request(prompt)
            .preamble(self.preamble.clone())
            .tool(schema.tool_definition())
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, tool = schema.function_name(), "Completion request failed");
                ModelError::Provider(e.to_string())
            })?;

        payload_from_reply(response.choice.iter(), schema.function_name())
    }

    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let response = self
            .model
            .completion_request(prompt)
            .preamble(VERIFICATION_PREAMBLE.to_string())
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Verification request failed");
                ModelError::Provider(e.to_string())
            })?;

        let text = text_from_reply(response.choice.iter());
        if text.trim().is_empty() {
            return Err(ModelError::MalformedReply("no text in reply".to_string()));
        }
        Ok(text)
    }
}

/// Joins the text parts of a reply, ignoring tool calls.
fn text_from_reply<'c>(contents: impl IntoIterator<Item = &'c AssistantContent>) -> String {
    contents
        .into_iter()
        .filter_map(|content| match content {
            AssistantContent::Text(text) => Some(text.text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Picks the structured payload out of a model reply.
///
/// A tool call wins over text. Tool arguments delivered as a JSON string are
/// decoded.
fn payload_from_reply<'c>(
    contents: impl IntoIterator<Item = &'c AssistantContent>,
    tool: &str,
) -> Result<Option<Value>, ModelError> {
    let mut text_payload = None;

    for content in contents {
        match content {
            AssistantContent::ToolCall(call) => {
                if call.function.name != tool {
                    tracing::debug!(called = %call.function.name, expected = tool, "Model called an unexpected tool");
                }
                let arguments = match &call.function.arguments {
                    Value::String(encoded) => serde_json::from_str(encoded).map_err(|e| {
                        ModelError::MalformedReply(format!("tool arguments are not JSON: {e}"))
                    })?,
                    other => other.clone(),
                };
                tracing::debug!(tool = %call.function.name, "Model returned tool call");
                return Ok(Some(arguments));
            }
            AssistantContent::Text(text) if text_payload.is_none() => {
                text_payload = parse_json_reply(&text.text);
            }
            _ => {}
        }
    }

    if text_payload.is_some() {
        tracing::debug!("No tool call, using JSON from text reply");
    }
    Ok(text_payload)
}

/// Parses a JSON object from a text reply, unwrapping a ```json (or bare ```)
/// fence if present.
#[must_use]
pub fn parse_json_reply(text: &str) -> Option<Value> {
    let body = if text.contains("```json") {
        RE_JSON_FENCE.captures(text)?.get(1)?.as_str()
    } else if text.contains("```") {
        RE_ANY_FENCE.captures(text)?.get(1)?.as_str()
    } else {
        text
    };

    serde_json::from_str::<Value>(body.trim())
        .ok()
        .filter(Value::is_object)
}
