//! Writes one normalized category batch to snapshots and the database
//!
//! Order of operations for a batch:
//!
//! 1. stage CSV and Parquet snapshots as hidden temp files
//! 2. upsert every row and the provenance row in one transaction
//! 3. publish the snapshots (rename into place)
//! 4. commit, withdrawing the published snapshots if the commit fails
//!
//! A failure at any step leaves the category table as it was and no
//! snapshot visible. Staging runs in parallel across categories; the
//! transactions themselves take one shared write lock, since SQLite admits a
//! single writer at a time.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info};
use uuid::Uuid;

use sdsc_common::types::{Category, CollectionRun};

use crate::db::Database;
use crate::error::PersistError;
use crate::preprocess::NormalizedBatch;
use crate::storage::{SnapshotPaths, SnapshotWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistStatus {
    Committed,
    Failed,
}

/// Outcome of persisting one category batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistResult {
    pub category: Category,
    pub run_id: Uuid,
    pub status: PersistStatus,
    pub rows_upserted: u64,
    /// Published snapshot files, set only when committed
    pub snapshots: Option<SnapshotPaths>,
    pub error: Option<String>,
}

impl PersistResult {
    pub fn is_committed(&self) -> bool {
        self.status == PersistStatus::Committed
    }
}

pub struct Persister {
    db: Database,
    snapshots: SnapshotWriter,
    locks: HashMap<Category, Arc<Mutex<()>>>,
    write_lock: Mutex<()>,
}

impl Persister {
    pub fn new(db: Database, snapshots: SnapshotWriter) -> Self {
        let locks = Category::ALL
            .into_iter()
            .map(|category| (category, Arc::new(Mutex::new(()))))
            .collect();
        Self {
            db,
            snapshots,
            locks,
            write_lock: Mutex::new(()),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn snapshots(&self) -> &SnapshotWriter {
        &self.snapshots
    }

    /// Persist a batch. Never returns an error: failures are reported in
    /// the result so other categories keep going.
    pub async fn persist(&self, run: &CollectionRun, batch: NormalizedBatch) -> PersistResult {
        let category = batch.category;
        let _guard = match self.locks.get(&category) {
            Some(lock) => Some(lock.clone().lock_owned().await),
            None => None,
        };

        match self.write(run, batch).await {
            Ok((rows_upserted, paths)) => {
                info!(
                    category = %category,
                    run_id = %run.run_id,
                    rows = rows_upserted,
                    csv = %paths.csv.display(),
                    "Category persisted"
                );
                PersistResult {
                    category,
                    run_id: run.run_id,
                    status: PersistStatus::Committed,
                    rows_upserted,
                    snapshots: Some(paths),
                    error: None,
                }
            },
            Err(e) => {
                error!(
                    category = %category,
                    run_id = %run.run_id,
                    error = %e,
                    "Persisting category failed, batch rolled back"
                );
                PersistResult {
                    category,
                    run_id: run.run_id,
                    status: PersistStatus::Failed,
                    rows_upserted: 0,
                    snapshots: None,
                    error: Some(e.to_string()),
                }
            },
        }
    }

    async fn write(&self, run: &CollectionRun, batch: NormalizedBatch) -> Result<(u64, SnapshotPaths), PersistError> {
        let category = batch.category;
        let run_id = run.run_id;
        let taken_at = Utc::now();

        let writer = self.snapshots.clone();
        let records = batch.records;
        let (staged, records) = tokio::task::spawn_blocking(move || {
            writer
                .stage(category, run_id, taken_at, &records)
                .map(|staged| (staged, records))
        })
        .await
        .map_err(|e| PersistError::snapshot(format!("snapshot task failed: {}", e)))??;

        let _writer = self.write_lock.lock().await;
        let mut tx = self.db.begin().await?;
        let rows = Database::upsert_rows(&mut tx, category, run_id, taken_at, &records).await?;
        Database::record_run(&mut tx, run, rows).await?;

        let paths = staged.publish()?;
        if let Err(e) = tx.commit().await {
            SnapshotWriter::remove(&paths);
            return Err(e.into());
        }

        Ok((rows, paths))
    }
}
