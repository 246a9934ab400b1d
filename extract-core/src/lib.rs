//! Multi-round structured field extraction with an LLM.
//!
//! A [`config::FieldConfig`] names the fields to pull out of a page. The
//! [`pipeline::ExtractionPipeline`] asks the model to fill that schema over
//! several rounds, scores every attempt (heuristically or with a second model
//! call), and reconciles the best attempt of each round by voting or by
//! confidence-ordered merging.
//!
//! ```no_run
//! use std::sync::Arc;
//! use crowdfund_extract::prelude::*;
//! use crowdfund_extract::testing::{ScriptedModel, ScriptedReply};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let fields = FieldConfig::from_path("project.json")?;
//! let model = Arc::new(ScriptedModel::new([ScriptedReply::payload(
//!     serde_json::json!({"project": {"company_name": "Acme"}}),
//! )]));
//! let report = ExtractionPipeline::new(model)
//!     .with_config(PipelineConfig::advanced())
//!     .run("<html>...</html>", &fields)
//!     .await?;
//! println!("{:?}", report.output);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

pub mod clean;
pub mod config;
pub mod error;
pub mod events;
pub mod extractor;
pub mod markers;
pub mod metrics;
pub mod normalize;
pub mod orchestrator;
pub mod pipeline;
pub mod prompt;
pub mod provider;
pub mod reconcile;
pub mod schema;
pub mod scoring;
pub mod testing;
pub mod validation;

/// Common types for driving an extraction.
pub mod prelude {
    pub use crate::config::{FieldConfig, FieldType};
    pub use crate::error::{ConfigError, ExtractionError, ModelError};
    pub use crate::events::{ExtractionObserver, PipelineEvent, TracingObserver};
    pub use crate::extractor::ExtractionModel;
    pub use crate::pipeline::{
        ContentSource, ExtractionPipeline, PipelineConfig, PipelineReport, RoundPlan,
    };
    pub use crate::prompt::PromptVariant;
    pub use crate::provider::RigModel;
    pub use crate::reconcile::{KeepBase, MergePolicy, PreferLonger, ReconcileStrategy};
    pub use crate::schema::ExtractionSchema;
    pub use crate::scoring::{AttemptScorer, AttemptScoring, LlmVerifier};
    pub use crate::validation::ValidationThresholds;
}
