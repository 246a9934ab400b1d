//! Command-line front end for the extraction pipeline.

mod commands;
mod providers;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::{run_config_schema, run_extract, run_schema, ExtractArgs, SchemaArgs};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract fields from a page and print or save the result
    Extract(ExtractArgs),
    /// Print the tool description and parameters schema for a field config
    Schema(SchemaArgs),
    /// Print the JSON Schema of the field configuration format
    ConfigSchema,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is normal
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.json);

    match cli.command {
        Commands::Extract(args) => run_extract(args).await,
        Commands::Schema(args) => run_schema(&args),
        Commands::ConfigSchema => run_config_schema(),
    }
}
