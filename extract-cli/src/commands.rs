//! Subcommand handlers.

use anyhow::Context;
use clap::{Args, ValueEnum};
use crowdfund_extract::prelude::*;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::providers::Provider;

/// Agent preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Preset {
    /// Confidence merge over cleaned and original content.
    Expert,
    /// Voting over the original content.
    Advanced,
}

/// Reconciliation strategy override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Strategy {
    /// Majority vote per field.
    Vote,
    /// Confidence-ordered merge.
    Merge,
}

impl From<Strategy> for ReconcileStrategy {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Vote => Self::Vote,
            Strategy::Merge => Self::ConfidenceMerge,
        }
    }
}

#[derive(Debug, Args)]
pub struct ExtractArgs {
    /// Field configuration JSON file
    #[arg(long, short)]
    pub config: PathBuf,

    /// Page content (HTML or text)
    #[arg(long, short)]
    pub input: PathBuf,

    /// Write the result to this file instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Settings preset
    #[arg(long, value_enum, default_value_t = Preset::Expert)]
    pub preset: Preset,

    /// Override the preset's reconciliation strategy
    #[arg(long, value_enum)]
    pub strategy: Option<Strategy>,

    /// Number of rounds
    #[arg(long)]
    pub rounds: Option<usize>,

    /// Attempts per round
    #[arg(long)]
    pub attempts: Option<usize>,

    /// Run rounds concurrently
    #[arg(long)]
    pub concurrent: bool,

    /// Score attempts with a second model call instead of the heuristic
    #[arg(long)]
    pub verify: bool,

    /// Per-attempt timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Hosted model family
    #[arg(long, value_enum, default_value_t = Provider::Gemini)]
    pub provider: Provider,

    /// Model name, defaults per provider
    #[arg(long)]
    pub model: Option<String>,

    /// API key, defaults to the provider's environment variable
    #[arg(long, hide = true)]
    pub api_key: Option<String>,
}

#[derive(Debug, Args)]
pub struct SchemaArgs {
    /// Field configuration JSON file
    #[arg(long, short)]
    pub config: PathBuf,
}

/// Applies preset and overrides.
pub fn pipeline_config(args: &ExtractArgs) -> PipelineConfig {
    let mut config = match args.preset {
        Preset::Expert => PipelineConfig::expert(),
        Preset::Advanced => PipelineConfig::advanced(),
    };
    if let Some(strategy) = args.strategy {
        config = config.with_strategy(strategy.into());
    }
    if let Some(rounds) = args.rounds {
        config = config.with_round_count(rounds);
    }
    if let Some(attempts) = args.attempts {
        config = config.with_max_attempts(attempts);
    }
    if args.verify {
        config = config.with_scoring(AttemptScoring::Verifier);
    }
    config
        .with_concurrent_rounds(args.concurrent)
        .with_attempt_timeout(args.timeout.map(Duration::from_secs))
}

pub async fn run_extract(args: ExtractArgs) -> anyhow::Result<()> {
    let fields = FieldConfig::from_path(&args.config)
        .with_context(|| format!("loading field config {}", args.config.display()))?;
    let content = std::fs::read_to_string(&args.input)
        .with_context(|| format!("reading input {}", args.input.display()))?;

    let model = args
        .provider
        .build(args.model.as_deref(), args.api_key.clone())?;
    let pipeline = ExtractionPipeline::new(model)
        .with_config(pipeline_config(&args))
        .with_observer(Arc::new(TracingObserver));

    let report = pipeline.run(&content, &fields).await?;
    tracing::info!(
        candidates = report.candidates.len(),
        average_confidence = ?report.average_confidence,
        attempts = report.metrics.total_attempts,
        successful = report.metrics.successful_attempts,
        input_tokens = report.metrics.estimated_input_tokens,
        output_tokens = report.metrics.estimated_output_tokens,
        wall_time_ms = u64::try_from(report.metrics.wall_time.as_millis()).unwrap_or(u64::MAX),
        "Extraction complete"
    );

    match report.output {
        Some(output) => write_output(&output, args.output.as_deref()),
        None => {
            println!("no result");
            Ok(())
        }
    }
}

/// Writes pretty JSON to `path`, or to stdout without one.
pub fn write_output(value: &Value, path: Option<&Path>) -> anyhow::Result<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    match path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            std::fs::write(path, rendered + "\n")
                .with_context(|| format!("writing {}", path.display()))?;
            tracing::info!(path = %path.display(), "Result saved");
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

/// Tool description and parameters of a field config.
pub fn render_schema(fields: &FieldConfig) -> anyhow::Result<String> {
    let schema = ExtractionSchema::build(fields)?;
    Ok(serde_json::to_string_pretty(&json!({
        "name": schema.function_name(),
        "description": schema.description(),
        "parameters": schema.parameters(),
    }))?)
}

pub fn run_schema(args: &SchemaArgs) -> anyhow::Result<()> {
    let fields = FieldConfig::from_path(&args.config)
        .with_context(|| format!("loading field config {}", args.config.display()))?;
    println!("{}", render_schema(&fields)?);
    Ok(())
}

pub fn run_config_schema() -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&FieldConfig::json_schema())?);
    Ok(())
}
