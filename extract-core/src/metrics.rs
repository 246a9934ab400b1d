//! Metrics tracking and token estimation for extraction runs.

use std::time::Duration;

/// Metrics collected during an extraction run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionMetrics {
    /// Total number of model calls issued.
    pub total_attempts: usize,
    /// Attempts that returned a usable payload.
    pub successful_attempts: usize,
    /// Wall-clock time elapsed.
    pub wall_time: Duration,
    /// Estimated input tokens sent to the model.
    pub estimated_input_tokens: usize,
    /// Estimated output tokens received from the model.
    pub estimated_output_tokens: usize,
}

impl ExtractionMetrics {
    /// Adds another set of counters, keeping the larger wall time.
    ///
    /// Rounds may run concurrently, so wall times are not summed.
    pub fn absorb(&mut self, other: &Self) {
        self.total_attempts += other.total_attempts;
        self.successful_attempts += other.successful_attempts;
        self.estimated_input_tokens += other.estimated_input_tokens;
        self.estimated_output_tokens += other.estimated_output_tokens;
        self.wall_time = self.wall_time.max(other.wall_time);
    }
}

/// Rough token cost of a prompt or payload, one token per four characters,
/// rounded up.
///
/// Counts characters rather than bytes so Persian page text is not
/// overestimated.
///
/// ```
/// use crowdfund_extract::metrics::estimate_tokens;
///
/// assert_eq!(estimate_tokens("profit 18%"), 3);
/// assert_eq!(estimate_tokens("سود ۱۸٪"), 2);
/// ```
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}
