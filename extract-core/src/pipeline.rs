//! The multi-round extraction pipeline.
//!
//! One call to [`ExtractionPipeline::run`] builds the schema, runs every
//! configured round through the retry loop, drops weak candidates and
//! reconciles the rest into `{object_name: ...}`.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::clean::clean_html;
use crate::config::FieldConfig;
use crate::error::{AttemptRecord, ExtractionError};
use crate::events::{ExtractionObserver, NoopObserver, PipelineEvent};
use crate::extractor::{ExtractionModel, Extractor};
use crate::metrics::ExtractionMetrics;
use crate::orchestrator::{Candidate, RetryPolicy, RoundOutcome, RoundRunner};
use crate::prompt::PromptVariant;
use crate::reconcile::{MergePolicy, PreferLonger, ReconcileStrategy, Reconciler};
use crate::schema::ExtractionSchema;
use crate::scoring::{AttemptScoring, LlmVerifier};
use crate::validation::{QualityValidator, ValidationThresholds};

/// Which version of the content a round sees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentSource {
    /// Content after [`clean_html`].
    #[default]
    Cleaned,
    /// Content exactly as supplied.
    Original,
}

/// One round: a prompt variant over a content source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundPlan {
    /// Prompt variant.
    pub variant: PromptVariant,
    /// Content the round extracts from.
    pub source: ContentSource,
}

impl RoundPlan {
    /// A round over cleaned content.
    #[must_use]
    pub const fn cleaned(variant: PromptVariant) -> Self {
        Self {
            variant,
            source: ContentSource::Cleaned,
        }
    }

    /// A round over the original content.
    #[must_use]
    pub const fn original(variant: PromptVariant) -> Self {
        Self {
            variant,
            source: ContentSource::Original,
        }
    }
}

/// Pipeline settings.
///
/// [`PipelineConfig::expert`] is the default. [`PipelineConfig::advanced`]
/// votes over three rounds on the original content.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Validity thresholds for scored attempts.
    pub thresholds: ValidationThresholds,
    /// How attempts are scored.
    pub scoring: AttemptScoring,
    /// Attempt bound and early exit per round.
    pub retry: RetryPolicy,
    /// Rounds, in index order.
    pub rounds: Vec<RoundPlan>,
    /// How candidates are combined.
    pub strategy: ReconcileStrategy,
    /// String preference used by the confidence merge.
    pub merge_policy: Arc<dyn MergePolicy>,
    /// Run rounds concurrently instead of one after another.
    pub concurrent_rounds: bool,
    /// Time budget per attempt. Slower attempts count as empty.
    pub attempt_timeout: Option<Duration>,
    /// Candidates must score strictly above this to be reconciled.
    pub min_candidate_confidence: Option<f64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::expert()
    }
}

impl PipelineConfig {
    /// Confidence merge over cleaned and original content with two attempts
    /// per round.
    #[must_use]
    pub fn expert() -> Self {
        Self {
            thresholds: ValidationThresholds::default(),
            scoring: AttemptScoring::Heuristic,
            retry: RetryPolicy::default()
                .with_max_attempts(2)
                .with_early_exit_confidence(0.9),
            rounds: vec![
                RoundPlan::cleaned(PromptVariant::Standard),
                RoundPlan::original(PromptVariant::Completeness),
                RoundPlan::cleaned(PromptVariant::Thorough),
            ],
            strategy: ReconcileStrategy::ConfidenceMerge,
            merge_policy: Arc::new(PreferLonger),
            concurrent_rounds: false,
            attempt_timeout: None,
            min_candidate_confidence: Some(0.3),
        }
    }

    /// Voting over three rounds on the original content with three attempts
    /// per round. Combine with
    /// [`with_scoring(AttemptScoring::Verifier)`](Self::with_scoring) to have
    /// the model check each attempt against the page.
    #[must_use]
    pub fn advanced() -> Self {
        Self {
            thresholds: ValidationThresholds::default(),
            scoring: AttemptScoring::Heuristic,
            retry: RetryPolicy::default()
                .with_max_attempts(3)
                .with_early_exit_confidence(0.8),
            rounds: vec![
                RoundPlan::original(PromptVariant::Standard),
                RoundPlan::original(PromptVariant::Standard),
                RoundPlan::original(PromptVariant::Emphasis),
            ],
            strategy: ReconcileStrategy::Vote,
            merge_policy: Arc::new(PreferLonger),
            concurrent_rounds: false,
            attempt_timeout: None,
            min_candidate_confidence: None,
        }
    }

    /// Set the validation thresholds.
    #[must_use]
    pub const fn with_thresholds(mut self, thresholds: ValidationThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Set how attempts are scored. [`AttemptScoring::Verifier`] costs one
    /// extra model call per usable attempt.
    #[must_use]
    pub const fn with_scoring(mut self, scoring: AttemptScoring) -> Self {
        self.scoring = scoring;
        self
    }

    /// Set the maximum number of attempts per round.
    #[must_use]
    pub const fn with_max_attempts(mut self, max: usize) -> Self {
        self.retry.max_attempts = max;
        self
    }

    /// Set the early-exit confidence.
    #[must_use]
    pub const fn with_early_exit_confidence(mut self, confidence: f64) -> Self {
        self.retry.early_exit_confidence = confidence;
        self
    }

    /// Replace the round plans.
    #[must_use]
    pub fn with_rounds(mut self, rounds: Vec<RoundPlan>) -> Self {
        self.rounds = rounds;
        self
    }

    /// Resize the round list, repeating the current plans in order.
    #[must_use]
    pub fn with_round_count(mut self, count: usize) -> Self {
        if self.rounds.is_empty() {
            self.rounds = vec![RoundPlan::cleaned(PromptVariant::Standard)];
        }
        self.rounds = self.rounds.iter().copied().cycle().take(count).collect();
        self
    }

    /// Set the reconciliation strategy.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: ReconcileStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the merge policy.
    #[must_use]
    pub fn with_merge_policy(mut self, policy: impl MergePolicy + 'static) -> Self {
        self.merge_policy = Arc::new(policy);
        self
    }

    /// Run rounds concurrently.
    #[must_use]
    pub const fn with_concurrent_rounds(mut self, concurrent: bool) -> Self {
        self.concurrent_rounds = concurrent;
        self
    }

    /// Set the per-attempt time budget.
    #[must_use]
    pub const fn with_attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Set the candidate confidence floor.
    #[must_use]
    pub const fn with_min_candidate_confidence(mut self, floor: Option<f64>) -> Self {
        self.min_candidate_confidence = floor;
        self
    }

    fn check(&self) -> Result<(), ExtractionError> {
        if self.rounds.is_empty() {
            return Err(ExtractionError::Settings(
                "at least one round is required".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ExtractionError::Settings(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    /// `{object_name: record}` or `{object_name: [records]}`; `None` when no
    /// round produced a usable candidate.
    pub output: Option<Value>,
    /// Candidates that entered reconciliation, in round order.
    pub candidates: Vec<Candidate>,
    /// Mean confidence of `candidates`.
    pub average_confidence: Option<f64>,
    /// Attempt history per round, in round order.
    pub history: Vec<Vec<AttemptRecord>>,
    /// Counters summed over all rounds.
    pub metrics: ExtractionMetrics,
}

/// Multi-round extraction over a shared model.
pub struct ExtractionPipeline {
    model: Arc<dyn ExtractionModel>,
    config: PipelineConfig,
    observer: Arc<dyn ExtractionObserver>,
}

impl ExtractionPipeline {
    /// Creates a pipeline with the default settings and no observer.
    #[must_use]
    pub fn new(model: Arc<dyn ExtractionModel>) -> Self {
        Self {
            model,
            config: PipelineConfig::default(),
            observer: Arc::new(NoopObserver),
        }
    }

    /// Replaces the settings.
    #[must_use]
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the event observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ExtractionObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// The settings in use.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Extracts `fields` from `content`.
    ///
    /// A run in which every round fails is not an error: the report carries
    /// `output: None`.
    ///
    /// # Errors
    ///
    /// Returns `ExtractionError::Config` if the field configuration is invalid
    /// and `ExtractionError::Settings` if the pipeline settings are unusable.
    pub async fn run(
        &self,
        content: &str,
        fields: &FieldConfig,
    ) -> Result<PipelineReport, ExtractionError> {
        self.config.check()?;
        let schema = ExtractionSchema::build(fields)?;
        let start = Instant::now();
        let observer = self.observer.as_ref();

        let cleaned = self
            .config
            .rounds
            .iter()
            .any(|plan| plan.source == ContentSource::Cleaned)
            .then(|| {
                let cleaned = clean_html(content);
                observer.on_event(&PipelineEvent::ContentCleaned {
                    original_chars: content.chars().count(),
                    cleaned_chars: cleaned.chars().count(),
                });
                cleaned
            });

        let extractor =
            Extractor::new(Arc::clone(&self.model)).with_timeout(self.config.attempt_timeout);
        let verifier = (self.config.scoring == AttemptScoring::Verifier).then(|| {
            LlmVerifier::new(Arc::clone(&self.model)).with_timeout(self.config.attempt_timeout)
        });
        let mut runner = RoundRunner::new(
            &extractor,
            QualityValidator::new(self.config.thresholds),
            self.config.retry,
            observer,
        );
        if let Some(verifier) = &verifier {
            runner = runner.with_scorer(verifier);
        }

        let rounds = self.config.rounds.iter().enumerate().map(|(round, plan)| {
            let text = match plan.source {
                ContentSource::Cleaned => cleaned.as_deref().unwrap_or(content),
                ContentSource::Original => content,
            };
            let runner = &runner;
            let schema = &schema;
            async move {
                observer.on_event(&PipelineEvent::RoundStarted {
                    round,
                    variant: plan.variant,
                });
                runner
                    .run_round_detailed(text, schema, plan.variant, round)
                    .await
            }
        });

        let outcomes: Vec<RoundOutcome> = if self.config.concurrent_rounds {
            join_all(rounds).await
        } else {
            let mut outcomes = Vec::with_capacity(self.config.rounds.len());
            for round in rounds {
                outcomes.push(round.await);
            }
            outcomes
        };

        let mut metrics = ExtractionMetrics::default();
        let mut history = Vec::with_capacity(outcomes.len());
        let mut candidates = Vec::new();
        for outcome in outcomes {
            metrics.absorb(&outcome.metrics);
            history.push(outcome.history);
            let Some(candidate) = outcome.candidate else {
                continue;
            };
            match self.config.min_candidate_confidence {
                Some(floor) if candidate.confidence <= floor => {
                    observer.on_event(&PipelineEvent::CandidateDiscarded {
                        round: candidate.round,
                        confidence: candidate.confidence,
                    });
                }
                _ => candidates.push(candidate),
            }
        }
        metrics.wall_time = start.elapsed();

        let average_confidence = (!candidates.is_empty()).then(|| {
            candidates.iter().map(|c| c.confidence).sum::<f64>() / candidates.len() as f64
        });

        let output = Reconciler::new(
            self.config.strategy,
            self.config.merge_policy.as_ref(),
            observer,
        )
        .reconcile(&candidates)
        .map(|records| wrap_output(&schema, records.iter().map(|r| r.to_nested()).collect()));

        observer.on_event(&PipelineEvent::Finished {
            candidates: candidates.len(),
            rounds: self.config.rounds.len(),
            average_confidence,
        });

        Ok(PipelineReport {
            output,
            candidates,
            average_confidence,
            history,
            metrics,
        })
    }
}

impl std::fmt::Debug for ExtractionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionPipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn wrap_output(schema: &ExtractionSchema, records: Vec<Map<String, Value>>) -> Value {
    let mut records = records.into_iter().map(Value::Object);
    let inner = if schema.is_array() {
        Value::Array(records.collect())
    } else {
        records.next().unwrap_or(Value::Null)
    };
    let mut wrapped = Map::new();
    wrapped.insert(schema.object_name().to_string(), inner);
    Value::Object(wrapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingObserver, ScriptedModel, ScriptedReply};
    use serde_json::json;

    fn fields(is_array: bool) -> FieldConfig {
        FieldConfig::from_json(&format!(
            r#"{{"function_name": "extract_project", "object_name": "project", "is_array": {is_array},
                "function_description": "Extract project details",
                "fields": {{"company_name": {{"type": "string", "required": true}},
                           "profit": {{"type": "string"}}}}}}"#
        ))
        .unwrap()
    }

    #[test]
    fn test_presets() {
        let expert = PipelineConfig::default();
        assert_eq!(expert.strategy, ReconcileStrategy::ConfidenceMerge);
        assert_eq!(expert.retry.max_attempts, 2);
        assert_eq!(expert.rounds[1], RoundPlan::original(PromptVariant::Completeness));
        assert_eq!(expert.min_candidate_confidence, Some(0.3));

        let advanced = PipelineConfig::advanced();
        assert_eq!(advanced.strategy, ReconcileStrategy::Vote);
        assert!(advanced
            .rounds
            .iter()
            .all(|plan| plan.source == ContentSource::Original));
        assert_eq!(advanced.rounds[2].variant, PromptVariant::Emphasis);
        assert_eq!(advanced.scoring, AttemptScoring::Heuristic);
        assert_eq!(
            advanced.with_scoring(AttemptScoring::Verifier).scoring,
            AttemptScoring::Verifier
        );
    }

    #[test]
    fn test_round_count_cycles_plans() {
        let config = PipelineConfig::expert().with_round_count(5);
        assert_eq!(config.rounds.len(), 5);
        assert_eq!(config.rounds[3], config.rounds[0]);
        assert_eq!(PipelineConfig::expert().with_round_count(1).rounds.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_rounds_is_settings_error() {
        let pipeline = ExtractionPipeline::new(Arc::new(ScriptedModel::new([])))
            .with_config(PipelineConfig::expert().with_rounds(Vec::new()));
        let err = pipeline.run("page", &fields(false)).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Settings(_)));
    }

    #[tokio::test]
    async fn test_bad_config_fails_before_any_call() {
        let model = Arc::new(ScriptedModel::new([]));
        let pipeline = ExtractionPipeline::new(model.clone());
        let config = FieldConfig::from_json(
            r#"{"function_name": "f", "object_name": "p",
                "fields": {"rate": {"type": "percentage"}}}"#,
        )
        .unwrap();
        let err = pipeline.run("page", &config).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Config(_)));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_expert_merge_wraps_object() {
        let model = Arc::new(ScriptedModel::new([
            ScriptedReply::payload(json!({"project": {"company_name": "Acme Ventures", "profit": null}})),
            ScriptedReply::Empty,
            ScriptedReply::payload(json!({"project": {"company_name": "Acme", "profit": "18 percent"}})),
            ScriptedReply::Empty,
            ScriptedReply::Empty,
        ]));
        let observer = Arc::new(RecordingObserver::new());
        let pipeline = ExtractionPipeline::new(model.clone()).with_observer(observer.clone());
        let report = pipeline
            .run("<p>Acme</p><script>x()</script>", &fields(false))
            .await
            .unwrap();

        assert_eq!(
            report.output,
            Some(json!({"project": {"company_name": "Acme Ventures", "profit": "18 percent"}}))
        );
        assert_eq!(report.candidates.len(), 2);
        assert_eq!(report.history.len(), 3);
        // Round 2 exits early after one perfect attempt
        assert_eq!(report.metrics.total_attempts, 5);
        assert_eq!(report.history[1].len(), 1);
        assert!(model.prompts()[0].ends_with("<p>Acme</p>"));
        assert!(observer
            .events()
            .iter()
            .any(|e| matches!(e, PipelineEvent::ContentCleaned { .. })));
    }

    #[tokio::test]
    async fn test_weak_candidates_discarded() {
        let model = Arc::new(ScriptedModel::new([ScriptedReply::payload(
            json!({"project": {"profit": "n/a"}}),
        )]));
        let observer = Arc::new(RecordingObserver::new());
        let pipeline = ExtractionPipeline::new(model)
            .with_config(PipelineConfig::expert().with_round_count(1).with_max_attempts(1))
            .with_observer(observer.clone());
        let report = pipeline.run("page", &fields(false)).await.unwrap();
        assert!(report.output.is_none());
        assert!(report.average_confidence.is_none());
        assert!(observer
            .events()
            .iter()
            .any(|e| matches!(e, PipelineEvent::CandidateDiscarded { round: 0, .. })));
    }

    #[tokio::test]
    async fn test_array_output_is_list() {
        let model = Arc::new(ScriptedModel::new([ScriptedReply::payload(json!({
            "project": [
                {"company_name": "Acme Ventures", "profit": "18 percent"},
                {"company_name": "Globex Capital", "profit": "21 percent"}
            ]
        }))]));
        let pipeline = ExtractionPipeline::new(model).with_config(
            PipelineConfig::advanced().with_round_count(1),
        );
        let report = pipeline.run("page", &fields(true)).await.unwrap();
        let output = report.output.unwrap();
        assert_eq!(output["project"].as_array().unwrap().len(), 2);
        assert_eq!(output["project"][1]["company_name"], "Globex Capital");
    }
}
