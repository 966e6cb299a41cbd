//! Yelp Ingest - bulk loader for the Yelp dataset

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use yelp_common::logging::{init_logging, LogConfig, LogLevel};
use yelp_ingest::config::IngestConfig;
use yelp_ingest::coordinator::{DatasetSummary, WorkerCoordinator};
use yelp_ingest::datasets::{DatasetFiles, DatasetKind};
use yelp_ingest::db::PgConnectionPool;
use yelp_ingest::pipeline::DatasetPipeline;

#[derive(Parser, Debug)]
#[command(name = "yelp-ingest")]
#[command(author, version, about = "Load the Yelp dataset into Postgres")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    options: LoadOptions,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load every dataset from a directory, in dependency order
    Run {
        /// Directory holding the yelp_*.JSON files
        #[arg(short, long, env = "YELP_DATA_DIR", default_value = "../yelpInput")]
        data_dir: PathBuf,

        /// Only load these datasets (comma separated)
        #[arg(long, value_enum, value_delimiter = ',')]
        only: Vec<DatasetKind>,
    },

    /// Load a single dataset file
    Load {
        #[arg(value_enum)]
        kind: DatasetKind,

        file: PathBuf,
    },
}

/// Overrides for values otherwise read from the environment.
#[derive(Args, Debug)]
struct LoadOptions {
    /// Postgres connection URL
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    database_url: Option<String>,

    /// Worker count (at least 2)
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// Attempts per batch before giving up
    #[arg(long, global = true)]
    max_attempts: Option<u32>,

    /// Fail a barrier wait after this many seconds
    #[arg(long, global = true)]
    barrier_timeout_secs: Option<u64>,

    /// Disable the progress bar
    #[arg(long, global = true)]
    no_progress: bool,
}

impl LoadOptions {
    fn apply(&self, mut config: IngestConfig) -> IngestConfig {
        if let Some(url) = &self.database_url {
            config.database.url = url.clone();
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.max_attempts = max_attempts;
        }
        if let Some(secs) = self.barrier_timeout_secs {
            config.barrier_timeout_secs = Some(secs);
        }
        if self.no_progress {
            config.show_progress = false;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("yelp-ingest")
        .build()
        .apply_env()?;

    let _guard = init_logging(&log_config)?;

    let config = cli.options.apply(IngestConfig::from_env());
    config.validate()?;

    let result = execute(cli.command, &config).await;
    if let Err(err) = &result {
        error!(error = %err, "Ingestion failed");
    }
    result
}

async fn execute(command: Command, config: &IngestConfig) -> Result<()> {
    let workers = config.worker_count();
    let pool = Arc::new(PgConnectionPool::new(config.database.clone(), config.page_size));
    pool.initialize(workers as u32)
        .await
        .context("Failed to connect to the database")?;

    let pipeline = DatasetPipeline::new(WorkerCoordinator::new(
        pool.clone(),
        config.coordinator_settings(),
    ));

    let outcome = match command {
        Command::Run { data_dir, only } => {
            info!(data_dir = %data_dir.display(), workers, "Loading Yelp dataset");
            pipeline.run(&DatasetFiles::in_dir(&data_dir), &only).await
        },
        Command::Load { kind, file } => {
            info!(dataset = %kind, file = %file.display(), workers, "Loading single dataset");
            pipeline.load(kind, &file).await.map(|summary| vec![summary])
        },
    };

    pool.close().await;
    let summaries = outcome?;
    for summary in &summaries {
        print_summary(summary);
    }

    info!("Ingestion complete");
    Ok(())
}

fn print_summary(summary: &DatasetSummary) {
    let tables: Vec<String> = summary
        .rows_by_table
        .iter()
        .map(|(table, rows)| format!("{table}={rows}"))
        .collect();
    info!(
        dataset = %summary.kind,
        records = summary.records,
        orphans = summary.orphans,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        tables = %tables.join(" "),
        "Dataset summary"
    );
}
