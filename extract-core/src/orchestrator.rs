//! Bounded retry loop for one extraction round.
//!
//! Each attempt is extracted, normalized and scored. The best-scoring attempt
//! is held (valid or not) and a sufficiently confident valid attempt ends the
//! round early.

use tokio::time::Instant;

use crate::error::AttemptRecord;
use crate::events::{AttemptFailure, ExtractionObserver, PipelineEvent};
use crate::extractor::Extractor;
use crate::metrics::{estimate_tokens, ExtractionMetrics};
use crate::normalize::{NormalizedResult, Normalizer};
use crate::prompt::{build_prompt, PromptVariant};
use crate::schema::ExtractionSchema;
use crate::scoring::AttemptScorer;
use crate::validation::{QualityValidator, ValidationOutcome};

/// Retry behaviour of a single round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts per round (default: 3).
    pub max_attempts: usize,
    /// A valid attempt scoring strictly above this ends the round (default: 0.9).
    pub early_exit_confidence: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            early_exit_confidence: 0.9,
        }
    }
}

impl RetryPolicy {
    /// Set the maximum number of attempts.
    #[must_use]
    pub const fn with_max_attempts(mut self, max: usize) -> Self {
        self.max_attempts = max;
        self
    }

    /// Set the early-exit confidence.
    #[must_use]
    pub const fn with_early_exit_confidence(mut self, confidence: f64) -> Self {
        self.early_exit_confidence = confidence;
        self
    }
}

/// Best result of one completed round.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Normalized records; exactly one for single-object schemas.
    pub records: Vec<NormalizedResult>,
    /// Confidence of the attempt the records came from.
    pub confidence: f64,
    /// 0-based index of the round that produced it.
    pub round: usize,
}

impl Candidate {
    /// The first record, which is the whole result for single-object schemas.
    #[must_use]
    pub fn result(&self) -> Option<&NormalizedResult> {
        self.records.first()
    }
}

/// Everything a round produced, including its attempt history.
#[derive(Debug, Clone)]
pub struct RoundOutcome {
    /// Best attempt, `None` if every attempt was empty.
    pub candidate: Option<Candidate>,
    /// One record per attempt issued.
    pub history: Vec<AttemptRecord>,
    /// Round counters.
    pub metrics: ExtractionMetrics,
}

/// Runs rounds of bounded retries.
pub struct RoundRunner<'a> {
    extractor: &'a Extractor,
    validator: QualityValidator,
    scorer: Option<&'a dyn AttemptScorer>,
    policy: RetryPolicy,
    observer: &'a dyn ExtractionObserver,
}

impl<'a> RoundRunner<'a> {
    /// Creates a runner.
    #[must_use]
    pub fn new(
        extractor: &'a Extractor,
        validator: QualityValidator,
        policy: RetryPolicy,
        observer: &'a dyn ExtractionObserver,
    ) -> Self {
        Self {
            extractor,
            validator,
            scorer: None,
            policy,
            observer,
        }
    }

    /// Scores attempts with `scorer` instead of the heuristic validator.
    #[must_use]
    pub const fn with_scorer(mut self, scorer: &'a dyn AttemptScorer) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Runs one round and returns its best candidate, if any attempt produced
    /// a usable result.
    pub async fn run_round(
        &self,
        content: &str,
        schema: &ExtractionSchema,
        variant: PromptVariant,
        round: usize,
    ) -> Option<Candidate> {
        self.run_round_detailed(content, schema, variant, round)
            .await
            .candidate
    }

    /// Runs one round, keeping the attempt history and metrics.
    pub async fn run_round_detailed(
        &self,
        content: &str,
        schema: &ExtractionSchema,
        variant: PromptVariant,
        round: usize,
    ) -> RoundOutcome {
        let start = Instant::now();
        let normalizer = Normalizer::new(schema);
        let prompt = build_prompt(schema, variant, content);
        let prompt_tokens = estimate_tokens(&prompt);
        let max_attempts = self.policy.max_attempts;

        let mut metrics = ExtractionMetrics::default();
        let mut history = Vec::with_capacity(max_attempts);
        let mut best: Option<(Vec<NormalizedResult>, ValidationOutcome)> = None;

        for attempt in 1..=max_attempts {
            self.observer.on_event(&PipelineEvent::AttemptStarted {
                round,
                attempt,
                max_attempts,
            });
            metrics.total_attempts += 1;
            metrics.estimated_input_tokens += prompt_tokens;

            let records = match self.extractor.call(&prompt, schema).await {
                Ok(raw) => {
                    metrics.estimated_output_tokens += estimate_tokens(&raw.to_string());
                    let violations = schema.schema_violations(&raw);
                    if !violations.is_empty() {
                        self.observer.on_event(&PipelineEvent::SchemaViolations {
                            round,
                            attempt,
                            violations,
                        });
                    }
                    let mut records = normalizer.normalize(&raw);
                    // `{}` and `{"project": {}}` carry no leaves
                    records.retain(|record| !record.is_empty());
                    if records.is_empty() {
                        Err(AttemptFailure::Unusable)
                    } else {
                        Ok(records)
                    }
                }
                Err(reason) => Err(reason),
            };

            let records = match records {
                Ok(records) => records,
                Err(reason) => {
                    self.observer.on_event(&PipelineEvent::AttemptFailed {
                        round,
                        attempt,
                        reason,
                    });
                    history.push(AttemptRecord {
                        attempt_number: attempt,
                        confidence: None,
                        is_valid: false,
                        issues: Vec::new(),
                        elapsed: start.elapsed(),
                    });
                    continue;
                }
            };

            metrics.successful_attempts += 1;
            let outcome = match self.scorer {
                Some(scorer) => scorer.score(content, &records, schema).await,
                None => self.validator.validate_records(&records, schema),
            };
            self.observer.on_event(&PipelineEvent::AttemptScored {
                round,
                attempt,
                confidence: outcome.confidence,
                is_valid: outcome.is_valid,
                issues: outcome.issues.clone(),
            });
            history.push(AttemptRecord {
                attempt_number: attempt,
                confidence: Some(outcome.confidence),
                is_valid: outcome.is_valid,
                issues: outcome.issues.clone(),
                elapsed: start.elapsed(),
            });

            // Validity is not required to take the lead
            let improves = best
                .as_ref()
                .map_or(true, |(_, held)| outcome.confidence > held.confidence);
            if !improves {
                continue;
            }

            let exit_early =
                outcome.is_valid && outcome.confidence > self.policy.early_exit_confidence;
            let confidence = outcome.confidence;
            best = Some((records, outcome));

            if exit_early {
                self.observer.on_event(&PipelineEvent::EarlyExit {
                    round,
                    attempt,
                    confidence,
                });
                break;
            }
        }

        metrics.wall_time = start.elapsed();
        let candidate = best.map(|(records, outcome)| Candidate {
            records,
            confidence: outcome.confidence,
            round,
        });
        self.observer.on_event(&PipelineEvent::RoundFinished {
            round,
            confidence: candidate.as_ref().map(|c| c.confidence),
        });

        RoundOutcome {
            candidate,
            history,
            metrics,
        }
    }
}
