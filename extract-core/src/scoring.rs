//! How an attempt is scored inside a round.
//!
//! [`QualityValidator`] scores field by field without another model call.
//! [`LlmVerifier`] asks the model whether the attempt matches the page, which
//! catches values that are well-formed but wrong.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::extractor::ExtractionModel;
use crate::normalize::NormalizedResult;
use crate::prompt::build_verification_prompt;
use crate::schema::ExtractionSchema;
use crate::validation::{QualityValidator, ValidationOutcome};

/// Confidence used when a verdict names no readable confidence.
pub const UNREADABLE_CONFIDENCE: f64 = 0.5;

/// Scores the records of one attempt.
#[async_trait]
pub trait AttemptScorer: Send + Sync {
    /// `content` is the text the attempt was extracted from.
    async fn score(
        &self,
        content: &str,
        records: &[NormalizedResult],
        schema: &ExtractionSchema,
    ) -> ValidationOutcome;
}

#[async_trait]
impl AttemptScorer for QualityValidator {
    async fn score(
        &self,
        _content: &str,
        records: &[NormalizedResult],
        schema: &ExtractionSchema,
    ) -> ValidationOutcome {
        self.validate_records(records, schema)
    }
}

/// Scoring selected by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptScoring {
    /// Field-level heuristic.
    #[default]
    Heuristic,
    /// A second model call judges every attempt.
    Verifier,
}

/// A parsed `VALID|0.85|reason` answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// Whether the model accepted the data.
    pub is_valid: bool,
    /// Stated confidence, clamped to `[0, 1]`.
    pub confidence: f64,
    /// Free-text reason, when given.
    pub reason: Option<String>,
}

impl Verdict {
    /// Parses `VALID|<confidence>|<reason>` (or `INVALID|...`).
    ///
    /// Anything other than `VALID` in the first part rejects. A confidence that
    /// does not parse becomes [`UNREADABLE_CONFIDENCE`]. Replies without a `|`
    /// are not verdicts.
    #[must_use]
    pub fn parse(reply: &str) -> Option<Self> {
        let mut parts = reply.trim().splitn(3, '|');
        let verdict = parts.next()?;
        let confidence = parts.next()?;

        let confidence = confidence
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|c| c.is_finite())
            .map_or(UNREADABLE_CONFIDENCE, |c| c.clamp(0.0, 1.0));
        let reason = parts
            .next()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);

        Some(Self {
            is_valid: verdict.trim().eq_ignore_ascii_case("VALID"),
            confidence,
            reason,
        })
    }

    fn into_outcome(self) -> ValidationOutcome {
        let issues = if self.is_valid {
            Vec::new()
        } else {
            vec![self
                .reason
                .unwrap_or_else(|| "Verifier rejected the extraction".to_string())]
        };
        ValidationOutcome {
            is_valid: self.is_valid,
            confidence: self.confidence,
            issues,
        }
    }
}

/// Scores attempts by asking the model to check them against the content.
///
/// A failed, timed out or unreadable verification scores 0.0 and invalid.
#[derive(Clone)]
pub struct LlmVerifier {
    model: Arc<dyn ExtractionModel>,
    timeout: Option<Duration>,
}

impl LlmVerifier {
    /// Creates a verifier without a time budget.
    #[must_use]
    pub fn new(model: Arc<dyn ExtractionModel>) -> Self {
        Self {
            model,
            timeout: None,
        }
    }

    /// Sets a time budget per verification call.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl std::fmt::Debug for LlmVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmVerifier")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AttemptScorer for LlmVerifier {
    async fn score(
        &self,
        content: &str,
        records: &[NormalizedResult],
        schema: &ExtractionSchema,
    ) -> ValidationOutcome {
        if records.is_empty() {
            return ValidationOutcome::invalid(vec!["No data extracted".to_string()]);
        }

        let prompt = build_verification_prompt(schema, records, content);
        let call = self.model.complete(&prompt);
        let reply = match self.timeout {
            Some(budget) => match tokio::time::timeout(budget, call).await {
                Ok(reply) => reply,
                Err(_) => {
                    return ValidationOutcome::invalid(vec!["Verification timed out".to_string()]);
                }
            },
            None => call.await,
        };

        let text = match reply {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "Verification call failed");
                return ValidationOutcome::invalid(vec![format!("Verification failed: {e}")]);
            }
        };

        match Verdict::parse(&text) {
            Some(verdict) => verdict.into_outcome(),
            None => {
                tracing::debug!(reply = %text, "Unreadable verification reply");
                ValidationOutcome::invalid(vec!["Unreadable verification reply".to_string()])
            }
        }
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
                "fields": {"company_name": {"type": "string", "required": true}}}"#,
        )
        .unwrap();
        ExtractionSchema::build(&config).unwrap()
    }

    fn records() -> Vec<NormalizedResult> {
        vec![NormalizedResult::from_raw(&json!({"company_name": "Acme Ventures"}))]
    }

    #[test]
    fn test_parse_valid_verdict() {
        let verdict = Verdict::parse("VALID|0.85|all fields match the page").unwrap();
        assert!(verdict.is_valid);
        assert!((verdict.confidence - 0.85).abs() < 1e-9);
        assert_eq!(verdict.reason.as_deref(), Some("all fields match the page"));
    }

    #[test]
    fn test_parse_invalid_verdict_without_reason() {
        let verdict = Verdict::parse(" invalid | 0.2 ").unwrap();
        assert!(!verdict.is_valid);
        assert!((verdict.confidence - 0.2).abs() < 1e-9);
        assert_eq!(verdict.reason, None);
    }

    #[test]
    fn test_parse_unreadable_confidence_falls_back() {
        let verdict = Verdict::parse("VALID|high|looks right").unwrap();
        assert!(verdict.is_valid);
        assert!((verdict.confidence - UNREADABLE_CONFIDENCE).abs() < 1e-9);
    }

    #[test]
    fn test_parse_clamps_and_keeps_pipes_in_reason() {
        let verdict = Verdict::parse("VALID|1.7|profit is 18%|yearly").unwrap();
        assert!((verdict.confidence - 1.0).abs() < 1e-9);
        assert_eq!(verdict.reason.as_deref(), Some("profit is 18%|yearly"));
    }

    #[test]
    fn test_parse_rejects_prose() {
        assert_eq!(Verdict::parse("The data looks valid."), None);
    }

    #[tokio::test]
    async fn test_verifier_scores_from_reply() {
        let model = Arc::new(ScriptedModel::new([ScriptedReply::text(
            "INVALID|0.4|company name is truncated",
        )]));
        let verifier = LlmVerifier::new(model.clone());
        let outcome = verifier.score("<p>Acme Ventures Ltd</p>", &records(), &schema()).await;

        assert!(!outcome.is_valid);
        assert!((outcome.confidence - 0.4).abs() < 1e-9);
        assert_eq!(outcome.issues, ["company name is truncated"]);
        assert!(model.prompts()[0].contains("Acme Ventures Ltd"));
    }

    #[tokio::test]
    async fn test_verifier_failure_scores_zero() {
        let model = Arc::new(ScriptedModel::new([
            ScriptedReply::error("quota exceeded"),
            ScriptedReply::text("no verdict here"),
        ]));
        let verifier = LlmVerifier::new(model);
        let schema = schema();

        let failed = verifier.score("page", &records(), &schema).await;
        assert!(!failed.is_valid);
        assert!(failed.confidence.abs() < f64::EPSILON);
        assert!(failed.issues[0].contains("quota exceeded"));

        let unreadable = verifier.score("page", &records(), &schema).await;
        assert_eq!(unreadable.issues, ["Unreadable verification reply"]);
    }

    #[tokio::test]
    async fn test_verifier_skips_model_without_records() {
        let model = Arc::new(ScriptedModel::routed(|_| ScriptedReply::text("VALID|1.0|")));
        let outcome = LlmVerifier::new(model.clone())
            .score("page", &[], &schema())
            .await;
        assert!(!outcome.is_valid);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verifier_timeout() {
        let model = Arc::new(
            ScriptedModel::new([ScriptedReply::text("VALID|0.9|ok")])
                .with_delay(Duration::from_secs(30)),
        );
        let outcome = LlmVerifier::new(model)
            .with_timeout(Some(Duration::from_secs(5)))
            .score("page", &records(), &schema())
            .await;
        assert_eq!(outcome.issues, ["Verification timed out"]);
    }

    #[tokio::test]
    async fn test_heuristic_scorer_matches_validator() {
        let validator = QualityValidator::default();
        let schema = schema();
        let scored = validator.score("ignored", &records(), &schema).await;
        assert_eq!(scored, validator.validate_records(&records(), &schema));
    }
}
