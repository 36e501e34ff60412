//! End-to-end run: collect, normalize, persist

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use sdsc_common::types::{Category, CollectionRun, RunStatus};

use crate::client::CategoryScope;
use crate::error::{IngestError, IngestResult};
use crate::orchestrator::CollectionOrchestrator;
use crate::persist::{PersistResult, Persister};
use crate::preprocess::{normalize, DatasetSummary, NormalizeStats};

/// What happened to one category over the whole pipeline
#[derive(Debug, Clone, Serialize)]
pub struct CategoryReport {
    pub run: CollectionRun,
    /// Unset when nothing was collected
    pub stats: Option<NormalizeStats>,
    pub summary: Option<DatasetSummary>,
    /// Unset when the category was not persisted
    pub persist: Option<PersistResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    /// Collection status across categories
    pub status: RunStatus,
    pub categories: BTreeMap<Category, CategoryReport>,
}

impl RunReport {
    /// Categories whose persistence was attempted and failed
    pub fn persist_failures(&self) -> Vec<Category> {
        self.categories
            .iter()
            .filter(|(_, report)| report.persist.as_ref().is_some_and(|p| !p.is_committed()))
            .map(|(category, _)| *category)
            .collect()
    }
}

pub struct IngestPipeline {
    orchestrator: CollectionOrchestrator,
    persister: Arc<Persister>,
}

impl IngestPipeline {
    pub fn new(orchestrator: CollectionOrchestrator, persister: Arc<Persister>) -> Self {
        Self {
            orchestrator,
            persister,
        }
    }

    /// Run collection and hand every category with data to persistence.
    ///
    /// A `Failed` collection persists nothing. Categories are persisted
    /// concurrently, each in its own transaction.
    pub async fn run(
        &self,
        categories: &BTreeSet<Category>,
        scope: &CategoryScope,
        cancel: &CancellationToken,
    ) -> IngestResult<RunReport> {
        let collected = self.orchestrator.run(categories, scope, cancel).await?;
        let run_id = collected.run_id;

        let mut reports: BTreeMap<Category, CategoryReport> = BTreeMap::new();
        let mut pending = Vec::new();

        for (category, batch) in collected.categories {
            let mut report = CategoryReport {
                run: batch.run,
                stats: None,
                summary: None,
                persist: None,
            };

            if !batch.records.is_empty() {
                let normalized = normalize(category, &batch.records);
                info!(
                    category = %category,
                    run_id = %run_id,
                    input = normalized.stats.input,
                    output = normalized.stats.output,
                    missing_key = normalized.stats.missing_key,
                    duplicates = normalized.stats.duplicates,
                    "Category normalized"
                );
                report.stats = Some(normalized.stats.clone());
                report.summary = Some(DatasetSummary::of(&normalized));
                if collected.status != RunStatus::Failed {
                    pending.push((report.run.clone(), normalized));
                }
            }

            reports.insert(category, report);
        }

        if collected.status == RunStatus::Failed {
            warn!(run_id = %run_id, "Collection failed, nothing will be persisted");
            return Ok(RunReport {
                run_id,
                status: collected.status,
                categories: reports,
            });
        }

        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled {
                discarded: reports.keys().copied().collect(),
            });
        }

        let writes = pending.into_iter().map(|(run, batch)| {
            let persister = self.persister.clone();
            async move { persister.persist(&run, batch).await }
        });
        for result in join_all(writes).await {
            if let Some(report) = reports.get_mut(&result.category) {
                report.persist = Some(result);
            }
        }

        let report = RunReport {
            run_id,
            status: collected.status,
            categories: reports,
        };
        info!(
            run_id = %run_id,
            status = %report.status,
            persist_failures = report.persist_failures().len(),
            "Ingestion run finished"
        );
        Ok(report)
    }
}
