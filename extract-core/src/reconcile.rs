//! Combining round candidates into one answer.
//!
//! Two strategies are available: per-field majority voting, which ignores
//! confidence, and a confidence-ordered merge that starts from the best
//! candidate and patches it from the others. Array configs are reconciled
//! record by record, by index.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::events::{ExtractionObserver, NoopObserver, PipelineEvent, ReplaceReason};
use crate::markers::contains_error_marker;
use crate::normalize::NormalizedResult;
use crate::orchestrator::Candidate;

/// How round candidates are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStrategy {
    /// Most frequent value per field.
    Vote,
    /// Best candidate patched field by field from the rest.
    #[default]
    ConfidenceMerge,
}

impl fmt::Display for ReconcileStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Vote => "vote",
            Self::ConfidenceMerge => "merge",
        })
    }
}

impl FromStr for ReconcileStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vote" | "voting" => Ok(Self::Vote),
            "merge" | "confidence_merge" => Ok(Self::ConfidenceMerge),
            other => Err(format!("unknown strategy '{other}', expected vote or merge")),
        }
    }
}

/// Decides whether a lower-confidence string replaces a present, error-free
/// base string during a merge.
pub trait MergePolicy: Send + Sync + fmt::Debug {
    /// Returns `true` when `candidate` should replace `base`.
    fn prefer(&self, base: &str, candidate: &str) -> bool;
}

/// Longer text wins: the candidate replaces the base when its trimmed length
/// is strictly greater.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreferLonger;

impl MergePolicy for PreferLonger {
    fn prefer(&self, base: &str, candidate: &str) -> bool {
        candidate.trim().chars().count() > base.trim().chars().count()
    }
}

/// Present base strings are never replaced on content alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepBase;

impl MergePolicy for KeepBase {
    fn prefer(&self, _base: &str, _candidate: &str) -> bool {
        false
    }
}

/// Per-field majority vote over plain results.
///
/// Returns `None` for empty input.
#[must_use]
pub fn vote(results: &[NormalizedResult]) -> Option<Map<String, Value>> {
    let refs: Vec<&NormalizedResult> = results.iter().collect();
    vote_records(&refs, &NoopObserver).map(|voted| voted.to_nested())
}

/// Confidence-ordered merge over the first record of each candidate.
///
/// Returns `None` for empty input.
#[must_use]
pub fn merge(candidates: &[Candidate], policy: &dyn MergePolicy) -> Option<Map<String, Value>> {
    let ranked: Vec<Ranked<'_>> = candidates
        .iter()
        .filter_map(|c| {
            c.result().map(|result| Ranked {
                result,
                confidence: c.confidence,
                round: c.round,
            })
        })
        .collect();
    merge_records(ranked, policy, &NoopObserver).map(|merged| merged.to_nested())
}

/// Reconciles full candidates, reporting every decision to an observer.
pub struct Reconciler<'a> {
    strategy: ReconcileStrategy,
    policy: &'a dyn MergePolicy,
    observer: &'a dyn ExtractionObserver,
}

impl<'a> Reconciler<'a> {
    /// Creates a reconciler.
    #[must_use]
    pub fn new(
        strategy: ReconcileStrategy,
        policy: &'a dyn MergePolicy,
        observer: &'a dyn ExtractionObserver,
    ) -> Self {
        Self {
            strategy,
            policy,
            observer,
        }
    }

    /// Reconciles candidates into final records, one per record index.
    ///
    /// Returns `None` when there is nothing to reconcile.
    #[must_use]
    pub fn reconcile(&self, candidates: &[Candidate]) -> Option<Vec<NormalizedResult>> {
        let width = candidates.iter().map(|c| c.records.len()).max()?;
        let mut out = Vec::with_capacity(width);

        for index in 0..width {
            let record = match self.strategy {
                ReconcileStrategy::Vote => {
                    let records: Vec<&NormalizedResult> = candidates
                        .iter()
                        .filter_map(|c| c.records.get(index))
                        .collect();
                    vote_records(&records, self.observer)
                }
                ReconcileStrategy::ConfidenceMerge => {
                    let ranked = candidates
                        .iter()
                        .filter_map(|c| {
                            c.records.get(index).map(|result| Ranked {
                                result,
                                confidence: c.confidence,
                                round: c.round,
                            })
                        })
                        .collect();
                    merge_records(ranked, self.policy, self.observer)
                }
            };
            out.extend(record);
        }

        (!out.is_empty()).then_some(out)
    }
}

struct Ranked<'r> {
    result: &'r NormalizedResult,
    confidence: f64,
    round: usize,
}

fn is_votable(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

fn vote_records(
    records: &[&NormalizedResult],
    observer: &dyn ExtractionObserver,
) -> Option<NormalizedResult> {
    if records.is_empty() {
        return None;
    }

    let mut ballots: IndexMap<&str, Vec<&Value>> = IndexMap::new();
    for record in records {
        for (path, value) in record.iter() {
            let ballot = ballots.entry(path.as_str()).or_default();
            if !value.is_null() {
                ballot.push(value);
            }
        }
    }

    let mut voted = NormalizedResult::default();
    for (path, values) in ballots {
        let Some(first) = values.first() else {
            continue;
        };
        let (winner, votes) = if values.iter().all(|v| is_votable(v)) {
            most_frequent(&values)
        } else {
            (*first, 1)
        };
        observer.on_event(&PipelineEvent::FieldVoted {
            path: path.to_string(),
            votes,
            total: values.len(),
        });
        voted.set(path.to_string(), winner.clone());
    }
    Some(voted)
}

/// Most frequent value, ties going to the first seen. `values` is non-empty.
///
/// Numbers are tallied by numeric value, so `12` and `12.0` share a ballot and
/// the first-seen spelling is kept.
fn most_frequent<'v>(values: &[&'v Value]) -> (&'v Value, usize) {
    let mut tally: Vec<(&'v Value, usize)> = Vec::new();
    for &value in values {
        match tally.iter_mut().find(|(seen, _)| same_ballot(seen, value)) {
            Some((_, count)) => *count += 1,
            None => tally.push((value, 1)),
        }
    }
    tally
        .into_iter()
        .fold((values[0], 0), |best, entry| if entry.1 > best.1 { entry } else { best })
}

fn same_ballot(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x.total_cmp(&y).is_eq(),
            _ => x == y,
        },
        _ => a == b,
    }
}

fn merge_records(
    mut ranked: Vec<Ranked<'_>>,
    policy: &dyn MergePolicy,
    observer: &dyn ExtractionObserver,
) -> Option<NormalizedResult> {
    // Highest confidence first, earlier rounds first on ties
    ranked.sort_by(|a, b| match b.confidence.total_cmp(&a.confidence) {
        Ordering::Equal => a.round.cmp(&b.round),
        other => other,
    });

    let mut ranked = ranked.into_iter();
    let mut base = ranked.next()?.result.clone();

    for candidate in ranked {
        for (path, value) in candidate.result.iter() {
            if let Some(reason) = replace_reason(base.get(path), value, policy) {
                observer.on_event(&PipelineEvent::FieldReplaced {
                    path: path.clone(),
                    reason,
                });
                base.set(path.clone(), value.clone());
            }
        }
    }
    Some(base)
}

fn replace_reason(
    current: Option<&Value>,
    candidate: &Value,
    policy: &dyn MergePolicy,
) -> Option<ReplaceReason> {
    if candidate.is_null() {
        return None;
    }
    match current {
        None | Some(Value::Null) => Some(ReplaceReason::FillMissing),
        Some(Value::String(base)) => {
            let Value::String(text) = candidate else {
                return None;
            };
            if contains_error_marker(base) && !contains_error_marker(text) {
                Some(ReplaceReason::ReplaceErrorText)
            } else if policy.prefer(base, text) {
                Some(ReplaceReason::PolicyPreferred)
            } else {
                None
            }
        }
        Some(_) => None,
    }
}
