//! Concurrent collection across categories
//!
//! One tokio task per category, all sharing a single [`ConcurrencyLimiter`].
//! A category that fails never affects the others; only configuration
//! errors, panics and cancellation abort the run as a whole.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use sdsc_common::types::{Category, CollectionRun, PageRequest, RunStatus};

use crate::client::{CategoryScope, PageSource};
use crate::collector::{BatchCollector, CategoryBatch, CollectOutcome};
use crate::config::CollectorConfig;
use crate::error::{IngestError, IngestResult};
use crate::limiter::ConcurrencyLimiter;
use crate::retry::RetryExecutor;

/// Everything collected in one run
#[derive(Debug, Clone)]
pub struct CollectionReport {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub categories: BTreeMap<Category, CategoryBatch>,
}

impl CollectionReport {
    pub fn runs(&self) -> impl Iterator<Item = &CollectionRun> {
        self.categories.values().map(|batch| &batch.run)
    }
}

pub struct CollectionOrchestrator {
    source: Arc<dyn PageSource>,
    executor: RetryExecutor,
    limiter: ConcurrencyLimiter,
    config: CollectorConfig,
}

impl CollectionOrchestrator {
    pub fn new(
        source: Arc<dyn PageSource>,
        executor: RetryExecutor,
        limiter: ConcurrencyLimiter,
        config: CollectorConfig,
    ) -> Self {
        Self {
            source,
            executor,
            limiter,
            config,
        }
    }

    /// Collect every requested category concurrently.
    ///
    /// Returns the per-category batches and the aggregate status. Fails only
    /// when the run cannot proceed (bad configuration, nothing requested, a
    /// task panicked) or was cancelled; cancellation discards all collected
    /// data.
    pub async fn run(
        &self,
        categories: &BTreeSet<Category>,
        scope: &CategoryScope,
        cancel: &CancellationToken,
    ) -> IngestResult<CollectionReport> {
        if categories.is_empty() {
            return Err(IngestError::NoCategories);
        }
        self.config.validate()?;

        let run_id = Uuid::new_v4();
        info!(
            run_id = %run_id,
            categories = ?categories.iter().map(Category::as_str).collect::<Vec<_>>(),
            max_concurrency = self.limiter.capacity(),
            "Starting collection run"
        );

        // Aborting on a panic cancels only this run's tasks
        let run_cancel = cancel.child_token();
        let mut tasks = JoinSet::new();
        for &category in categories {
            let collector = BatchCollector::new(
                self.source.clone(),
                self.executor.clone(),
                self.limiter.clone(),
                self.config.max_pages,
            );
            let run = CollectionRun::start(run_id, category);
            let first = PageRequest::first(category, self.config.page_size, scope.filters(category));
            let token = run_cancel.clone();

            tasks.spawn(async move { collector.collect(run, first, &token).await });
        }

        let mut batches = BTreeMap::new();
        let mut discarded = Vec::new();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(CollectOutcome::Completed(batch)) => {
                    batches.insert(batch.run.category, batch);
                },
                Ok(CollectOutcome::Cancelled { category, .. }) => {
                    discarded.push(category);
                },
                Err(e) => {
                    error!(run_id = %run_id, error = %e, "Collection task failed, aborting run");
                    run_cancel.cancel();
                    tasks.abort_all();
                    return Err(IngestError::TaskFailed(e.to_string()));
                },
            }
        }

        if !discarded.is_empty() || run_cancel.is_cancelled() {
            discarded.extend(batches.keys().copied());
            discarded.sort();
            warn!(run_id = %run_id, discarded = discarded.len(), "Collection run cancelled");
            return Err(IngestError::Cancelled { discarded });
        }

        let status = RunStatus::aggregate(
            batches
                .values()
                .map(|batch| (batch.run.status, batch.run.records_collected)),
        );

        for batch in batches.values() {
            let run = &batch.run;
            info!(
                run_id = %run.run_id,
                category = %run.category,
                status = %run.status,
                records = run.records_collected,
                pages = run.pages_fetched,
                total_reported = ?run.total_reported,
                errors = run.errors.len(),
                "Collection run summary"
            );
        }
        info!(run_id = %run_id, status = %status, "Collection run finished");

        Ok(CollectionReport {
            run_id,
            status,
            categories: batches,
        })
    }
}
