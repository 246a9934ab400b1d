//! Error types for extraction operations with attempt history tracking.

use std::time::Duration;
use thiserror::Error;

/// Record of a single extraction attempt inside a round.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    /// The attempt number (1-indexed).
    pub attempt_number: usize,
    /// Confidence of the attempt, `None` when the model returned nothing.
    pub confidence: Option<f64>,
    /// Whether the attempt passed the validity thresholds.
    pub is_valid: bool,
    /// Issues reported by the quality validator.
    pub issues: Vec<String>,
    /// Elapsed time since the round started.
    pub elapsed: Duration,
}

/// Malformed or missing field configuration. Always fatal, never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field was declared with an empty (or blank) name.
    #[error("Field names must be non-empty")]
    EmptyFieldName,

    /// Two fields share a name.
    #[error("Duplicate field name: {0}")]
    DuplicateField(String),

    /// A field type outside the supported set.
    #[error("Field '{field}' has unknown type '{ty}' (expected string or number)")]
    UnknownType {
        /// Offending field.
        field: String,
        /// The type as written.
        ty: String,
    },

    /// A required top-level key is missing or empty.
    #[error("Configuration key '{0}' must be non-empty")]
    MissingKey(&'static str),

    /// The generated parameters schema did not compile.
    #[error("Schema error: {0}")]
    Schema(String),

    /// The configuration file is not valid JSON for this format.
    #[error("Invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The configuration file could not be read.
    #[error("Failed to read configuration '{path}': {source}")]
    Io {
        /// Path that was read.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Failure reported by an [`ExtractionModel`](crate::extractor::ExtractionModel).
///
/// These never escape an extraction attempt; they are mapped to an empty
/// attempt by the [`Extractor`](crate::extractor::Extractor).
#[derive(Debug, Error)]
pub enum ModelError {
    /// Transport, quota or provider-side failure.
    #[error("Provider error: {0}")]
    Provider(String),

    /// The reply could not be interpreted.
    #[error("Malformed reply: {0}")]
    MalformedReply(String),

    /// The model does not offer this kind of request.
    #[error("Unsupported request: {0}")]
    Unsupported(&'static str),
}

/// Errors that can occur when running the extraction pipeline.
///
/// Data-quality problems are never errors: they show up as low confidence,
/// issues, or a report without output.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The field configuration is unusable.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The pipeline configuration is unusable (e.g. zero rounds).
    #[error("Invalid pipeline settings: {0}")]
    Settings(String),
}
