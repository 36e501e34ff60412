//! SDSC Ingest - commercial district collection tool

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sdsc_common::logging::{init_logging, LogConfig, LogLevel};
use sdsc_common::types::{Category, RunStatus};
use sdsc_ingest::{
    ApiClient, BatchCollector, CategoryScope, CollectionOrchestrator, ConcurrencyLimiter, Database,
    IngestConfig, IngestPipeline, Persister, RegionResolver, RetryExecutor, RetryPolicy, RunReport,
    SnapshotWriter,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "sdsc-ingest")]
#[command(author, version, about = "Commercial district data collection tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Collect, normalize and persist categories for a region
    Collect {
        /// Province name or code, e.g. "서울특별시" or "11"
        #[arg(long)]
        sido: String,

        /// District name or code within the province
        #[arg(long)]
        sigungu: Option<String>,

        /// Categories to collect (defaults to all)
        #[arg(short, long = "category", value_name = "CATEGORY")]
        categories: Vec<Category>,

        /// Large industry class code (indsLclsCd), e.g. "I2"
        #[arg(long)]
        industry: Option<String>,
    },

    /// List provinces, or the districts of one province
    Regions {
        /// Province name or code
        #[arg(long)]
        sido: Option<String>,
    },

    /// List snapshot files
    Snapshots {
        /// Only this category
        #[arg(short, long)]
        category: Option<Category>,
    },

    /// Row counts per category table
    Stats,
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

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("sdsc-ingest")
        .build()
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    let config = IngestConfig::from_env().context("Failed to load configuration")?;

    match cli.command {
        Command::Collect {
            sido,
            sigungu,
            categories,
            industry,
        } => collect(&config, &sido, sigungu.as_deref(), categories, industry).await,
        Command::Regions { sido } => regions(&config, sido.as_deref()).await,
        Command::Snapshots { category } => snapshots(&config, category),
        Command::Stats => stats(&config).await,
    }
}

async fn collect(
    config: &IngestConfig,
    sido: &str,
    sigungu: Option<&str>,
    categories: Vec<Category>,
    industry: Option<String>,
) -> Result<()> {
    let client = Arc::new(ApiClient::new(&config.api, config.require_service_key()?)?);
    let executor = RetryExecutor::new(RetryPolicy::from(&config.retry));
    let limiter = ConcurrencyLimiter::new(config.collector.max_concurrency);

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let resolver = RegionResolver::new(
        BatchCollector::new(client.clone(), executor.clone(), limiter.clone(), config.collector.max_pages),
        config.collector.page_size,
    );
    let sido_code = resolver.resolve_sido(sido, &cancel).await?;
    let mut scope = CategoryScope::new(sido_code.clone());
    if let Some(sigungu) = sigungu {
        scope = scope.with_sigungu(resolver.resolve_sigungu(&sido_code, sigungu, &cancel).await?);
    }
    if let Some(industry) = industry {
        scope = scope.with_industry(industry);
    }

    let categories: BTreeSet<Category> = if categories.is_empty() {
        Category::ALL.into_iter().collect()
    } else {
        categories.into_iter().collect()
    };

    let db = Database::connect(&config.database)
        .await
        .context("Failed to open database")?;
    db.ensure_schema().await?;
    let persister = Persister::new(db.clone(), SnapshotWriter::new(&config.storage.output_dir));

    let orchestrator = CollectionOrchestrator::new(client, executor, limiter, config.collector.clone());
    let pipeline = IngestPipeline::new(orchestrator, Arc::new(persister));

    info!(sido = %sido_code, sigungu = ?scope.sigungu_code, "Starting ingestion");
    let report = pipeline.run(&categories, &scope, &cancel).await;
    db.close().await;
    let report = report?;

    print_report(&report);

    if report.status == RunStatus::Failed {
        bail!("Collection failed for every category; nothing was persisted");
    }
    let failures = report.persist_failures();
    if !failures.is_empty() {
        bail!("Persisting failed for: {:?}", failures);
    }

    info!("Ingestion complete");
    Ok(())
}

async fn regions(config: &IngestConfig, sido: Option<&str>) -> Result<()> {
    let client = Arc::new(ApiClient::new(&config.api, config.require_service_key()?)?);
    let collector = BatchCollector::new(
        client,
        RetryExecutor::new(RetryPolicy::from(&config.retry)),
        ConcurrencyLimiter::new(1),
        config.collector.max_pages,
    );
    let resolver = RegionResolver::new(collector, config.collector.page_size);
    let cancel = CancellationToken::new();

    let regions = match sido {
        Some(sido) => {
            let code = resolver.resolve_sido(sido, &cancel).await?;
            resolver.districts(&code, &cancel).await?
        },
        None => resolver.provinces(&cancel).await?,
    };

    for region in regions {
        println!("{}\t{}", region.code, region.name);
    }
    Ok(())
}

fn snapshots(config: &IngestConfig, category: Option<Category>) -> Result<()> {
    let writer = SnapshotWriter::new(&config.storage.output_dir);
    let snapshots = writer.list_snapshots()?;

    for snapshot in snapshots
        .iter()
        .filter(|s| category.map_or(true, |c| s.category == c))
    {
        println!(
            "{}\t{}\t{}\t{}",
            snapshot.category,
            snapshot.taken_at.to_rfc3339(),
            snapshot.run_prefix,
            snapshot.path.display()
        );
    }
    Ok(())
}

async fn stats(config: &IngestConfig) -> Result<()> {
    let db = Database::connect(&config.database)
        .await
        .context("Failed to open database")?;
    db.ensure_schema().await?;

    for table in db.table_stats().await? {
        println!(
            "{}\trows={}\truns={}\tlast={}",
            table.category,
            table.rows,
            table.runs_recorded,
            table.last_collected_at.as_deref().unwrap_or("-")
        );
    }
    db.close().await;
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("run {} finished: {}", report.run_id, report.status);
    for (category, entry) in &report.categories {
        let persisted = match &entry.persist {
            Some(p) if p.is_committed() => format!("{} rows", p.rows_upserted),
            Some(p) => format!("failed ({})", p.error.as_deref().unwrap_or("unknown")),
            None => "not persisted".to_string(),
        };
        println!(
            "  {:<16} {:<8} records={:<7} pages={:<5} errors={} persisted={}",
            category,
            entry.run.status,
            entry.run.records_collected,
            entry.run.pages_fetched,
            entry.run.errors.len(),
            persisted
        );
        for err in &entry.run.errors {
            warn!(category = %category, page = err.page, kind = err.kind.as_str(), "{}", err.message);
        }
    }
}

/// Cancel the run on Ctrl+C or SIGTERM
async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = cancel.cancelled() => return,
    }

    warn!("Shutdown signal received, cancelling run");
    cancel.cancel();
}
