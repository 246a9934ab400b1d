//! Hosted model selection.

use anyhow::{anyhow, Context};
use clap::ValueEnum;
use crowdfund_extract::extractor::ExtractionModel;
use crowdfund_extract::provider::RigModel;
use rig::client::CompletionClient;
use rig::providers::{gemini, openai};
use std::sync::Arc;

/// Hosted model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    /// Google Gemini (`GEMINI_API_KEY`).
    Gemini,
    /// OpenAI (`OPENAI_API_KEY`).
    Openai,
}

impl Provider {
    /// Environment variable holding the API key.
    pub const fn key_var(self) -> &'static str {
        match self {
            Self::Gemini => "GEMINI_API_KEY",
            Self::Openai => "OPENAI_API_KEY",
        }
    }

    /// Model used when none is given.
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::Gemini => "gemini-2.0-flash-lite",
            Self::Openai => "gpt-4o-mini",
        }
    }

    /// Builds the extraction model. Without an explicit key the provider's
    /// environment variable is read.
    pub fn build(
        self,
        model: Option<&str>,
        api_key: Option<String>,
    ) -> anyhow::Result<Arc<dyn ExtractionModel>> {
        let var = self.key_var();
        let key = match api_key {
            Some(key) => key,
            None => std::env::var(var).with_context(|| format!("{var} is not set"))?,
        };
        let name = model.unwrap_or_else(|| self.default_model());
        tracing::info!(provider = ?self, model = name, "Using hosted model");

        Ok(match self {
            Self::Gemini => {
                let client = gemini::Client::new(key.as_str())
                    .map_err(|e| anyhow!("failed to create Gemini client: {e}"))?;
                Arc::new(RigModel::new(client.completion_model(name)))
            }
            Self::Openai => {
                let client: openai::Client = openai::Client::new(key.as_str())
                    .map_err(|e| anyhow!("failed to create OpenAI client: {e}"))?;
                Arc::new(RigModel::new(client.completion_model(name)))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_vars() {
        assert_eq!(Provider::Gemini.key_var(), "GEMINI_API_KEY");
        assert_eq!(Provider::Openai.key_var(), "OPENAI_API_KEY");
    }

    #[test]
    fn test_default_models() {
        assert_eq!(Provider::Gemini.default_model(), "gemini-2.0-flash-lite");
        assert!(!Provider::Openai.default_model().is_empty());
    }
}
