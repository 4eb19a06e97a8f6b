mod analytics;
mod batch;
mod decoder;
mod engine;
mod metrics;
mod models;
mod storage;
mod types;

use std::fs::File;
use std::io::{stderr, stdout, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio::time::interval;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, Layer};

use crate::analytics::{AggregationEngine, Page, DEFAULT_ANOMALY_PAGE_SIZE, DEFAULT_DORMANT_PAGE_SIZE};
use crate::decoder::{read_merchants, DecoderOptions};
use crate::engine::{
    IngestConfig, IngestService, Submission, DEFAULT_BATCH_SIZE, DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_FILE_SIZE, DEFAULT_RETRY_DELAY
};
use crate::metrics::{MetricsStore, TaskState};
use crate::storage::SqliteStore;
use crate::types::{Monetary, TaskId};

#[derive(Parser)]
#[command(name = "transaction-analytics-engine")]
#[command(about = "Streams transaction files into SQLite and reports on them", long_about = None)]
struct Cli {
    /// SQLite database file, created if missing.
    #[arg(long, global = true, default_value = "transactions.db")]
    db: PathBuf,

    /// One of error, warn, info, debug, trace. Logs go to stderr.
    #[arg(long, global = true, default_value = "error")]
    log_level: String,

    #[command(subcommand)]
    command: Commands
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a transaction file and print the task's final metrics.
    Ingest {
        file: PathBuf,
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
        #[arg(long)]
        task_id: Option<TaskId>,
        #[arg(long, default_value = ",", value_parser = parse_delimiter)]
        delimiter: u8,
        /// Largest accepted amount, in currency units.
        #[arg(long)]
        max_amount: Option<Monetary>,
        /// Pause before retrying a failed batch.
        #[arg(long, default_value_t = DEFAULT_RETRY_DELAY.as_millis() as u64)]
        retry_delay_ms: u64,
        /// Largest accepted file, in bytes.
        #[arg(long, default_value_t = DEFAULT_MAX_FILE_SIZE)]
        max_file_size: u64,
        /// Decoded rows buffered between the reader and the writer.
        #[arg(long, default_value_t = DEFAULT_CHANNEL_CAPACITY)]
        channel_capacity: usize,
        /// Seconds between progress log lines.
        #[arg(long, default_value_t = 5)]
        progress_secs: u64
    },
    /// Load the merchant reference set used for dormancy.
    Merchants {
        file: PathBuf,
        #[arg(long, default_value = ",", value_parser = parse_delimiter)]
        delimiter: u8
    },
    /// Run an analytic query and print it as JSON.
    Report {
        #[arg(value_enum, default_value_t = Query::Full)]
        query: Query,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long)]
        page_size: Option<u32>,
        /// Re-run the query every N seconds until interrupted.
        #[arg(long)]
        watch_secs: Option<u64>,
        /// Reuse a computed full report for this many seconds.
        #[arg(long)]
        cache_ttl_secs: Option<u64>
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Query {
    Zones,
    Categories,
    Dormant,
    Hourly,
    Anomalies,
    Retention,
    Full
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(parse_log_level(&cli.log_level));

    let store = Arc::new(SqliteStore::connect(&cli.db).await?);

    match cli.command {
        Commands::Ingest {
            file, batch_size, task_id, delimiter, max_amount, retry_delay_ms, max_file_size, channel_capacity, progress_secs
        } => {
            let mut config = IngestConfig::default()
                .with_batch_size(batch_size)
                .with_delimiter(delimiter)
                .with_retry_delay(Duration::from_millis(retry_delay_ms))
                .with_max_file_size(max_file_size)
                .with_channel_capacity(channel_capacity);

            if let Some(max_amount) = max_amount {
                config = config.with_max_amount(max_amount);
            }

            let service = IngestService::new(store.clone(), Arc::new(MetricsStore::new()), config);

            let timer = Instant::now();
            let Submission { task_id, mut handle } = service.submit(task_id, &file)?;

            let mut progress = interval(Duration::from_secs(progress_secs.max(1)));
            progress.tick().await;

            loop {
                tokio::select! {
                    finished = &mut handle => {
                        finished?;
                        break;
                    }
                    _ = tokio::signal::ctrl_c() => {
                        service.cancel(task_id);
                        (&mut handle).await?;
                        break;
                    }
                    _ = progress.tick() => {
                        let snapshot = service.get_metrics(task_id)?;
                        info!(
                            "Task [{task_id}] {:?}: seen {}, inserted {}, rejected {}",
                            snapshot.state, snapshot.rows_seen, snapshot.rows_inserted, snapshot.rows_rejected
                        );
                    }
                }
            }

            let snapshot = service.purge(task_id)?;
            info!(
                "Ingested {} in: {:?}, store now holds {} transactions",
                file.display(), timer.elapsed(), store.transaction_count().await?
            );

            write_json(&snapshot)?;

            if snapshot.state == TaskState::Failed {
                exit(1);
            }
        }
        Commands::Merchants { file, delimiter } => {
            let merchants = load_merchant_file(&file, delimiter)?;
            let loaded = store.load_merchants(&merchants).await?;

            write_json(&serde_json::json!({ "loaded": loaded }))?;
        }
        Commands::Report { query, page, page_size, watch_secs, cache_ttl_secs } => {
            let mut engine = AggregationEngine::new(store.pool().clone());

            if let Some(ttl) = cache_ttl_secs {
                engine = engine.with_cache_ttl(Duration::from_secs(ttl));
            }

            let Some(watch_secs) = watch_secs else {
                return run_query(&engine, query, page, page_size).await;
            };

            let mut ticks = interval(Duration::from_secs(watch_secs.max(1)));

            loop {
                tokio::select! {
                    _ = ticks.tick() => run_query(&engine, query, page, page_size).await?,
                    _ = tokio::signal::ctrl_c() => break
                }
            }
        }
    }

    Ok(())
}

async fn run_query(engine: &AggregationEngine, query: Query, page: u32, page_size: Option<u32>) -> Result<()> {
    match query {
        Query::Zones => write_json(&engine.zone_leaderboard().await?),
        Query::Categories => write_json(&engine.category_distribution().await?),
        Query::Dormant => {
            let page = Page::new(page, page_size.unwrap_or(DEFAULT_DORMANT_PAGE_SIZE))?;
            write_json(&engine.dormant_merchants(page).await?)
        }
        Query::Hourly => write_json(&engine.hourly_pattern().await?),
        Query::Anomalies => {
            let page = Page::new(page, page_size.unwrap_or(DEFAULT_ANOMALY_PAGE_SIZE))?;
            write_json(&engine.anomalies(page).await?)
        }
        Query::Retention => write_json(&engine.customer_retention().await?),
        Query::Full => write_json(&*engine.report().await?)
    }
}

fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\\t" => Ok(b'\t'),
        _ => match value.as_bytes() {
            [byte] if byte.is_ascii() => Ok(*byte),
            _ => Err(format!("delimiter must be a single ASCII character, got '{value}'"))
        }
    }
}

fn load_merchant_file(path: &Path, delimiter: u8) -> Result<Vec<models::Merchant>> {
    let file = File::open(path).with_context(|| format!("Cannot open merchant file {}", path.display()))?;
    let options = DecoderOptions { delimiter, ..DecoderOptions::default() };

    Ok(read_merchants(BufReader::new(file), options)?)
}

fn parse_log_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => {
            eprintln!("Invalid log level '{}', defaulting to 'error'", level);
            LevelFilter::ERROR
        }
    }
}

fn setup_logging(level: LevelFilter) {
    //NOTE: stdout carries the JSON results, so logging goes to stderr
    let terminal_log = fmt::layer()
        .with_target(false)
        .with_writer(stderr)
        .with_filter(level);

    tracing_subscriber::registry()
        .with(terminal_log)
        .init();
}

fn write_json<T: Serialize>(value: &T) -> Result<()> {
    let mut output = BufWriter::new(stdout().lock());

    serde_json::to_writer_pretty(&mut output, value)?;
    writeln!(output)?;
    output.flush()?;

    Ok(())
}
