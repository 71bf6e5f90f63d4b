//! Feedsync - incremental archive feed ingestion

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use feedsync_common::logging::{init_logging, LogConfig, LogLevel, WorkerGuard};
use feedsync_ingest::config::{
    DEFAULT_ARCHIVE_EXTENSION, DEFAULT_LISTING_URL, DEFAULT_MAX_CONNECTIONS, DEFAULT_QUEUE_NAME,
    DEFAULT_REDIS_URL, DEFAULT_TIMEOUT_SECS, DEFAULT_WATERMARK_KEY,
};
use feedsync_ingest::{FailurePolicy, IngestConfig, IngestError, Ingestor};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "feedsync")]
#[command(author, version, about = "Incremental archive feed ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    settings: Settings,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest every batch newer than the watermark
    Run {
        /// Summary format
        #[arg(short, long, default_value = "text")]
        output: OutputFormat,
    },

    /// Show the watermark and pending batches without ingesting
    Pending {
        /// Summary format
        #[arg(short, long, default_value = "text")]
        output: OutputFormat,
    },
}

#[derive(Args, Debug)]
struct Settings {
    /// Directory listing that links to the batch archives
    #[arg(long, global = true, env = "FEEDSYNC_LISTING_URL", default_value = DEFAULT_LISTING_URL)]
    listing_url: String,

    /// Archive file extension
    #[arg(long, global = true, env = "FEEDSYNC_ARCHIVE_EXTENSION", default_value = DEFAULT_ARCHIVE_EXTENSION)]
    archive_extension: String,

    /// Redis server address
    #[arg(long, global = true, env = "FEEDSYNC_REDIS_URL", default_value = DEFAULT_REDIS_URL)]
    redis_url: String,

    /// Max number of concurrent Redis commands
    #[arg(long, global = true, env = "FEEDSYNC_MAX_CONNECTIONS", default_value_t = DEFAULT_MAX_CONNECTIONS)]
    max_connections: usize,

    /// Max number of batches ingested at once (defaults to --max-connections)
    #[arg(long, global = true, env = "FEEDSYNC_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Redis key holding the watermark
    #[arg(long, global = true, env = "FEEDSYNC_WATERMARK_KEY", default_value = DEFAULT_WATERMARK_KEY)]
    watermark_key: String,

    /// Redis list receiving documents
    #[arg(long, global = true, env = "FEEDSYNC_QUEUE", default_value = DEFAULT_QUEUE_NAME)]
    queue: String,

    /// Parent directory for scratch storage
    #[arg(long, global = true, env = "FEEDSYNC_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// HTTP timeout in seconds
    #[arg(long, global = true, env = "FEEDSYNC_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,

    /// wait-all or fail-fast
    #[arg(long, global = true, env = "FEEDSYNC_FAILURE_POLICY", default_value = "wait-all")]
    failure_policy: FailurePolicy,
}

impl Settings {
    fn into_config(self) -> IngestConfig {
        let mut builder = IngestConfig::builder()
            .listing_url(self.listing_url)
            .archive_extension(self.archive_extension)
            .redis_url(self.redis_url)
            .max_connections(self.max_connections)
            .concurrency(self.concurrency.unwrap_or(self.max_connections))
            .watermark_key(self.watermark_key)
            .queue_name(self.queue)
            .timeout_secs(self.timeout_secs)
            .failure_policy(self.failure_policy);

        if let Some(dir) = self.scratch_dir {
            builder = builder.scratch_root(dir);
        }

        builder.build()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let _guard = match setup_logging(cli.verbose) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{e:#}");
            return ExitCode::FAILURE;
        },
    };

    match run(cli.command, cli.settings.into_config()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Ingestion failed");
            if let Some(IngestError::BatchesFailed { failures, .. }) = e.downcast_ref() {
                for failure in failures {
                    error!(batch_id = %failure.id, error = %failure, "Batch failed");
                }
            }
            ExitCode::from(exit_code(&e))
        },
    }
}

fn setup_logging(verbose: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let level = if verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let config = LogConfig::builder()
        .level(level)
        .log_file_prefix("feedsync")
        .build()
        .merge_env()
        .context("Invalid logging configuration")?;

    init_logging(&config).context("Failed to initialize logging")
}

/// `2` when only batches failed, `1` for every other error
fn exit_code(error: &anyhow::Error) -> u8 {
    error
        .downcast_ref::<IngestError>()
        .map_or(1, IngestError::exit_code)
}

async fn run(command: Command, config: IngestConfig) -> anyhow::Result<()> {
    info!(
        listing = %config.listing_url,
        concurrency = config.concurrency,
        failure_policy = %config.failure_policy,
        "Connecting"
    );
    let ingestor = Ingestor::connect(config).await?;

    match command {
        Command::Run { output } => {
            let report = ingestor.run().await?;
            match report.committed {
                Some(watermark) => info!(
                    batches = report.batches.len(),
                    documents = report.documents(),
                    watermark = %watermark,
                    "Ingestion complete"
                ),
                None => info!("Ingestion complete; nothing new"),
            }
            emit(output, &report, |r| {
                format!(
                    "run {}: {} discovered, {} ingested, {} documents, watermark {} -> {}",
                    r.run_id,
                    r.discovered,
                    r.batches.len(),
                    r.documents(),
                    display_watermark(r.previous),
                    display_watermark(r.committed.or(r.previous)),
                )
            })?;
        },
        Command::Pending { output } => {
            let plan = ingestor.pending().await?;
            emit(output, &plan, |p| {
                let ids: Vec<String> = p.pending.iter().map(ToString::to_string).collect();
                format!(
                    "watermark {}: {} discovered, {} pending [{}]",
                    display_watermark(p.watermark),
                    p.discovered,
                    p.pending.len(),
                    ids.join(", ")
                )
            })?;
        },
    }

    Ok(())
}

fn display_watermark(watermark: Option<feedsync_ingest::BatchId>) -> String {
    watermark.map_or_else(|| "unset".to_string(), |w| w.to_string())
}

/// Print the command's summary to stdout
fn emit<T: Serialize>(
    format: OutputFormat,
    value: &T,
    text: impl FnOnce(&T) -> String,
) -> anyhow::Result<()> {
    println!("{}", render(format, value, text)?);
    Ok(())
}

fn render<T: Serialize>(
    format: OutputFormat,
    value: &T,
    text: impl FnOnce(&T) -> String,
) -> anyhow::Result<String> {
    match format {
        OutputFormat::Text => Ok(text(value)),
        OutputFormat::Json => {
            serde_json::to_string_pretty(value).context("Failed to serialize summary")
        },
    }
}
