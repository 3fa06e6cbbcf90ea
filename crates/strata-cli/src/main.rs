mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use strata_types::{ConfigError, LoadType};

#[derive(Parser)]
#[command(
    name = "strata",
    version,
    about = "Metadata-driven ETL pipeline orchestrator"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Path to the run config YAML file
    #[arg(long, default_value = "strata.yaml", global = true)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the two-phase batch: land every pipeline, then transform
    Run {
        /// Run date (YYYYMMDD; leading dashes are ignored)
        #[arg(long, allow_hyphen_values = true)]
        date: Option<String>,
        /// Only run this pipeline
        #[arg(long)]
        pipeline_id: Option<String>,
        /// Override every pipeline's load type (full, incremental)
        #[arg(long, value_parser = parse_load_type)]
        load_type: Option<LoadType>,
        /// Skip the load phase and only transform
        #[arg(long)]
        skip_load: bool,
    },
    /// Validate the run config and state store connectivity
    Check,
    /// Create the metadata tables
    Init,
    /// Add or update a pipeline definition
    Register {
        #[arg(long)]
        id: String,
        #[arg(long)]
        data_source: String,
        #[arg(long)]
        source_table: String,
        #[arg(long)]
        destination_table: String,
        /// Target layer (public, bronze, silver, gold)
        #[arg(long, default_value = "public")]
        schema: String,
        #[arg(long, default_value = "full")]
        load_type: String,
        /// Register the pipeline as inactive
        #[arg(long)]
        inactive: bool,
    },
    /// Show one audit record with its pipeline details
    Audit {
        audit_id: i64,
    },
}

fn parse_load_type(value: &str) -> Result<LoadType, ConfigError> {
    value.parse()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run {
            date,
            pipeline_id,
            load_type,
            skip_load,
        } => {
            let options = strata_engine::BatchOptions {
                date,
                pipeline_id: pipeline_id.map(Into::into),
                load_type,
                skip_load,
            };
            commands::run::execute(&cli.config, options).await
        }
        Commands::Check => commands::check::execute(&cli.config).await,
        Commands::Init => commands::init::execute(&cli.config).await,
        Commands::Register {
            id,
            data_source,
            source_table,
            destination_table,
            schema,
            load_type,
            inactive,
        } => {
            let row = strata_types::RawPipelineRow {
                id,
                data_source,
                source_table,
                destination_table,
                schema_name: schema,
                load_type,
                active: !inactive,
            };
            commands::register::execute(&cli.config, row).await
        }
        Commands::Audit { audit_id } => commands::audit::execute(&cli.config, audit_id).await,
    }
}
