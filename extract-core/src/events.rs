//! Progress and diagnostic events emitted by the pipeline.
//!
//! The pipeline never prints. Callers that want narration inject an
//! [`ExtractionObserver`]; the default [`NoopObserver`] discards everything.

use std::fmt;

use crate::prompt::PromptVariant;

/// Why an attempt produced no usable result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    /// The model call failed.
    Model(String),
    /// The model replied without a structured payload.
    NoPayload,
    /// The attempt exceeded its time budget.
    Timeout,
    /// The payload held no extractable object.
    Unusable,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Model(message) => write!(f, "model error: {message}"),
            Self::NoPayload => f.write_str("no structured payload"),
            Self::Timeout => f.write_str("timed out"),
            Self::Unusable => f.write_str("payload held no extractable object"),
        }
    }
}

/// Why the confidence merge replaced a base value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceReason {
    /// The base had no value.
    FillMissing,
    /// The base value contained an error marker.
    ReplaceErrorText,
    /// The merge policy preferred the candidate text.
    PolicyPreferred,
}

impl fmt::Display for ReplaceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FillMissing => "filling missing field",
            Self::ReplaceErrorText => "replacing error text",
            Self::PolicyPreferred => "using more complete text",
        })
    }
}

/// A single pipeline event.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Content was cleaned before extraction.
    ContentCleaned {
        /// Characters before cleaning.
        original_chars: usize,
        /// Characters after cleaning.
        cleaned_chars: usize,
    },
    /// A round began.
    RoundStarted {
        /// 0-based round index.
        round: usize,
        /// Prompt variant of the round.
        variant: PromptVariant,
    },
    /// An attempt is about to call the model.
    AttemptStarted {
        /// 0-based round index.
        round: usize,
        /// 1-based attempt number.
        attempt: usize,
        /// Attempt bound of the round.
        max_attempts: usize,
    },
    /// An attempt produced nothing usable.
    AttemptFailed {
        /// 0-based round index.
        round: usize,
        /// 1-based attempt number.
        attempt: usize,
        /// What went wrong.
        reason: AttemptFailure,
    },
    /// The raw payload did not match the tool schema.
    SchemaViolations {
        /// 0-based round index.
        round: usize,
        /// 1-based attempt number.
        attempt: usize,
        /// Violation messages.
        violations: Vec<String>,
    },
    /// An attempt was scored.
    AttemptScored {
        /// 0-based round index.
        round: usize,
        /// 1-based attempt number.
        attempt: usize,
        /// Attempt confidence.
        confidence: f64,
        /// Whether it met the thresholds.
        is_valid: bool,
        /// Issues found.
        issues: Vec<String>,
    },
    /// A round stopped before its attempt bound.
    EarlyExit {
        /// 0-based round index.
        round: usize,
        /// Attempt that triggered the exit.
        attempt: usize,
        /// Confidence that triggered the exit.
        confidence: f64,
    },
    /// A round finished.
    RoundFinished {
        /// 0-based round index.
        round: usize,
        /// Best confidence, `None` when every attempt failed.
        confidence: Option<f64>,
    },
    /// A round result was dropped before reconciliation.
    CandidateDiscarded {
        /// 0-based round index.
        round: usize,
        /// Its confidence.
        confidence: f64,
    },
    /// Voting settled a field.
    FieldVoted {
        /// Dotted field path.
        path: String,
        /// Votes for the winning value.
        votes: usize,
        /// Non-null values seen.
        total: usize,
    },
    /// Merging replaced a base value.
    FieldReplaced {
        /// Dotted field path.
        path: String,
        /// Why.
        reason: ReplaceReason,
    },
    /// The pipeline finished.
    Finished {
        /// Candidates that entered reconciliation.
        candidates: usize,
        /// Rounds run.
        rounds: usize,
        /// Mean candidate confidence, `None` without candidates.
        average_confidence: Option<f64>,
    },
}

/// Receiver of pipeline events.
pub trait ExtractionObserver: Send + Sync {
    /// Called synchronously for every event.
    fn on_event(&self, event: &PipelineEvent);
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ExtractionObserver for NoopObserver {
    fn on_event(&self, _event: &PipelineEvent) {}
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ExtractionObserver for TracingObserver {
    fn on_event(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::ContentCleaned {
                original_chars,
                cleaned_chars,
            } => tracing::debug!(original_chars, cleaned_chars, "Cleaned content"),
            PipelineEvent::RoundStarted { round, variant } => {
                tracing::info!(round = round + 1, %variant, "Extraction round started");
            }
            PipelineEvent::AttemptStarted {
                round,
                attempt,
                max_attempts,
            } => tracing::debug!(round = round + 1, attempt, max_attempts, "Attempt started"),
            PipelineEvent::AttemptFailed {
                round,
                attempt,
                reason,
            } => tracing::warn!(round = round + 1, attempt, %reason, "Attempt produced no result"),
            PipelineEvent::SchemaViolations {
                round,
                attempt,
                violations,
            } => tracing::debug!(
                round = round + 1,
                attempt,
                count = violations.len(),
                first = violations.first().map(String::as_str).unwrap_or_default(),
                "Payload deviates from tool schema"
            ),
            PipelineEvent::AttemptScored {
                round,
                attempt,
                confidence,
                is_valid,
                issues,
            } => tracing::debug!(
                round = round + 1,
                attempt,
                confidence,
                is_valid,
                issues = %issues.join("; "),
                "Attempt scored"
            ),
            PipelineEvent::EarlyExit {
                round,
                attempt,
                confidence,
            } => tracing::info!(round = round + 1, attempt, confidence, "High confidence, stopping round"),
            PipelineEvent::RoundFinished { round, confidence } => {
                tracing::info!(round = round + 1, confidence = ?confidence, "Extraction round finished");
            }
            PipelineEvent::CandidateDiscarded { round, confidence } => {
                tracing::debug!(round = round + 1, confidence, "Discarded low-confidence round");
            }
            PipelineEvent::FieldVoted { path, votes, total } => {
                tracing::debug!(%path, votes, total, "Field voted");
            }
            PipelineEvent::FieldReplaced { path, reason } => {
                tracing::debug!(%path, %reason, "Field replaced during merge");
            }
            PipelineEvent::Finished {
                candidates,
                rounds,
                average_confidence,
            } => tracing::info!(
                candidates,
                rounds,
                average_confidence = ?average_confidence,
                "Extraction finished"
            ),
        }
    }
}
