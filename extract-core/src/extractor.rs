//! A single extraction attempt against the external model.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ModelError;
use crate::events::AttemptFailure;
use crate::normalize::RawResult;
use crate::prompt::{build_prompt, PromptVariant};
use crate::schema::ExtractionSchema;

/// The external structured-output model.
///
/// One call, at most one structured payload back. Implementations must be safe
/// to share between concurrently running rounds.
#[async_trait]
pub trait ExtractionModel: Send + Sync {
    /// Sends `prompt` with `schema` as the only callable tool.
    ///
    /// `Ok(None)` means the model answered without a structured payload.
    async fn generate(
        &self,
        prompt: &str,
        schema: &ExtractionSchema,
    ) -> Result<Option<RawResult>, ModelError>;

    /// Sends `prompt` without tools and returns the text reply.
    ///
    /// Used for verification requests. Models that only support tool calls
    /// keep the default, which reports the call as unsupported.
    async fn complete(&self, prompt: &str) -> Result<String, ModelError> {
        let _ = prompt;
        Err(ModelError::Unsupported("free-text completion"))
    }
}

/// Issues single extraction attempts. Never retries and never fails: every
/// problem becomes an empty attempt.
#[derive(Clone)]
pub struct Extractor {
    model: Arc<dyn ExtractionModel>,
    timeout: Option<Duration>,
}

impl Extractor {
    /// Creates an extractor without a time budget.
    #[must_use]
    pub fn new(model: Arc<dyn ExtractionModel>) -> Self {
        Self {
            model,
            timeout: None,
        }
    }

    /// Sets a per-attempt time budget; slower attempts count as empty.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs one attempt, returning the raw payload or `None`.
    pub async fn attempt(
        &self,
        content: &str,
        schema: &ExtractionSchema,
        variant: PromptVariant,
    ) -> Option<RawResult> {
        let prompt = build_prompt(schema, variant, content);
        self.call(&prompt, schema).await.ok()
    }

    /// Runs one attempt with an already-built prompt, keeping the failure reason.
    pub(crate) async fn call(
        &self,
        prompt: &str,
        schema: &ExtractionSchema,
    ) -> Result<RawResult, AttemptFailure> {
        let call = self.model.generate(prompt, schema);
        let reply = match self.timeout {
            Some(budget) => tokio::time::timeout(budget, call)
                .await
                .map_err(|_| AttemptFailure::Timeout)?,
            None => call.await,
        };

        match reply {
            Ok(Some(raw)) if !raw.is_null() => Ok(raw),
            Ok(_) => Err(AttemptFailure::NoPayload),
            Err(e) => Err(AttemptFailure::Model(e.to_string())),
        }
    }
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldConfig;
    use crate::testing::{ScriptedModel, ScriptedReply};
    use serde_json::json;

    fn schema() -> ExtractionSchema {
        let config = FieldConfig::from_json(
            r#"{"function_name": "f", "object_name": "project", "is_array": false,
                "fields": {"company_name": {"type": "string"}}}"#,
        )
        .unwrap();
        ExtractionSchema::build(&config).unwrap()
    }

    #[tokio::test]
    async fn test_attempt_returns_payload() {
        let model = Arc::new(ScriptedModel::new([ScriptedReply::payload(
            json!({"project": {"company_name": "Acme"}}),
        )]));
        let extractor = Extractor::new(model.clone());
        let raw = extractor
            .attempt("<p>Acme</p>", &schema(), PromptVariant::Standard)
            .await;
        assert_eq!(raw, Some(json!({"project": {"company_name": "Acme"}})));
        assert_eq!(model.calls(), 1);
        assert!(model.prompts()[0].contains("<p>Acme</p>"));
    }

    #[tokio::test]
    async fn test_model_error_maps_to_none() {
        let model = Arc::new(ScriptedModel::new([ScriptedReply::error("quota exceeded")]));
        let extractor = Extractor::new(model);
        let failure = extractor.call("prompt", &schema()).await.unwrap_err();
        assert_eq!(
            failure,
            AttemptFailure::Model("Provider error: quota exceeded".to_string())
        );
    }

    #[tokio::test]
    async fn test_empty_reply_maps_to_none() {
        let model = Arc::new(ScriptedModel::new([ScriptedReply::Empty]));
        let extractor = Extractor::new(model);
        assert!(extractor
            .attempt("x", &schema(), PromptVariant::Thorough)
            .await
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_maps_to_none() {
        let model = Arc::new(
            ScriptedModel::new([ScriptedReply::payload(json!({"company_name": "Acme"}))])
                .with_delay(Duration::from_secs(10)),
        );
        let extractor = Extractor::new(model).with_timeout(Some(Duration::from_secs(1)));
        let failure = extractor.call("prompt", &schema()).await.unwrap_err();
        assert_eq!(failure, AttemptFailure::Timeout);
    }
}
