//! SDSC Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Collection and ingestion of the sdsc2 commercial district API.
//!
//! # Stages
//!
//! - **Collection**: [`client`] fetches single pages, [`retry`] retries
//!   transient failures with jittered backoff, [`collector`] walks one
//!   category's cursor chain and [`orchestrator`] runs all categories
//!   concurrently under one [`limiter`]
//! - **Normalization**: [`preprocess`] turns raw records into typed rows
//! - **Persistence**: [`storage`] writes CSV and Parquet snapshots, [`db`]
//!   upserts into SQLite and [`persist`] ties both into one unit per
//!   category
//!
//! # Example
//!
//! ```no_run
//! use std::collections::BTreeSet;
//! use std::sync::Arc;
//!
//! use sdsc_common::types::Category;
//! use sdsc_ingest::{
//!     ApiClient, CategoryScope, CollectionOrchestrator, ConcurrencyLimiter, Database,
//!     IngestConfig, IngestPipeline, Persister, RetryExecutor, RetryPolicy, SnapshotWriter,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let client = ApiClient::new(&config.api, config.require_service_key()?)?;
//!
//!     let orchestrator = CollectionOrchestrator::new(
//!         Arc::new(client),
//!         RetryExecutor::new(RetryPolicy::from(&config.retry)),
//!         ConcurrencyLimiter::new(config.collector.max_concurrency),
//!         config.collector.clone(),
//!     );
//!     let db = Database::connect(&config.database).await?;
//!     db.ensure_schema().await?;
//!     let persister = Persister::new(db, SnapshotWriter::new(&config.storage.output_dir));
//!
//!     let pipeline = IngestPipeline::new(orchestrator, Arc::new(persister));
//!     let categories: BTreeSet<_> = Category::ALL.into_iter().collect();
//!     let report = pipeline
//!         .run(&categories, &CategoryScope::new("11"), &CancellationToken::new())
//!         .await?;
//!     println!("{}", report.status);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod collector;
pub mod config;
pub mod db;
pub mod error;
pub mod limiter;
pub mod orchestrator;
pub mod persist;
pub mod pipeline;
pub mod preprocess;
pub mod retry;
pub mod storage;

pub use client::{ApiClient, CategoryScope, PageSource, Region, RegionResolver};
pub use collector::{BatchCollector, CategoryBatch, CollectOutcome};
pub use config::IngestConfig;
pub use db::{Database, TableStats};
pub use error::{FetchError, IngestError, IngestResult, PersistError, RetryError};
pub use limiter::ConcurrencyLimiter;
pub use orchestrator::{CollectionOrchestrator, CollectionReport};
pub use persist::{PersistResult, PersistStatus, Persister};
pub use pipeline::{CategoryReport, IngestPipeline, RunReport};
pub use preprocess::{normalize, DatasetSummary, NormalizeStats, NormalizedBatch, NormalizedRecord};
pub use retry::{RetryExecutor, RetryPolicy};
pub use storage::{SnapshotInfo, SnapshotPaths, SnapshotWriter};
