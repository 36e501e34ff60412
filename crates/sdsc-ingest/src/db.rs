//! Relational store for the latest state of every category
//!
//! One table per category keyed by the natural key, plus a
//! `collection_runs` table recording which run wrote what. Rows are
//! upserted, so a table always holds the most recent version of each
//! record and `run_id`/`collected_at` tell which run produced it.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Sqlite, Transaction};
use tracing::{debug, error, info};
use uuid::Uuid;

use sdsc_common::types::{Category, CollectionRun};

use crate::config::DatabaseConfig;
use crate::error::PersistError;
use crate::preprocess::{CategorySchema, FieldKind, FieldValue, NormalizedRecord};

/// Row counts and freshness of one category table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableStats {
    pub category: Category,
    pub rows: i64,
    pub last_collected_at: Option<String>,
    pub runs_recorded: i64,
}

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the SQLite database behind `config.url`
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, PersistError> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(config.busy_timeout_secs));

        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        info!(
            url = %config.url,
            max_connections = config.max_connections,
            "Database connection pool created"
        );

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create category tables, their indexes and the provenance table
    pub async fn ensure_schema(&self) -> Result<(), PersistError> {
        let mut tx = self.pool.begin().await?;

        for category in Category::ALL {
            let schema = CategorySchema::for_category(category);
            sqlx::query(&create_table_sql(schema)).execute(&mut *tx).await?;
            for index in schema.indexes {
                let sql = format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                    index.name,
                    schema.table(),
                    index.columns.join(", ")
                );
                sqlx::query(&sql).execute(&mut *tx).await?;
            }
        }

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS collection_runs (
                run_id TEXT NOT NULL,
                category TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                records_collected INTEGER NOT NULL,
                pages_fetched INTEGER NOT NULL,
                total_reported INTEGER,
                rows_upserted INTEGER NOT NULL,
                errors TEXT NOT NULL,
                PRIMARY KEY (run_id, category)
            )",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Database schema ensured");
        Ok(())
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, PersistError> {
        Ok(self.pool.begin().await?)
    }

    /// Upsert every record of one category inside `tx`.
    ///
    /// The first rejected row aborts with [`PersistError::Row`]; the caller
    /// drops the transaction and nothing of the batch is kept.
    pub async fn upsert_rows(
        tx: &mut Transaction<'_, Sqlite>,
        category: Category,
        run_id: Uuid,
        collected_at: DateTime<Utc>,
        records: &[NormalizedRecord],
    ) -> Result<u64, PersistError> {
        let schema = CategorySchema::for_category(category);
        let sql = upsert_sql(schema);
        let run_id = run_id.to_string();
        let collected_at = collected_at.to_rfc3339();

        let mut upserted = 0u64;
        for record in records {
            let mut query = sqlx::query(&sql).bind(record.key.as_str());
            for (field, value) in schema.fields.iter().zip(&record.values) {
                query = match (field.kind, value) {
                    (_, FieldValue::Text(s)) | (_, FieldValue::Categorical(s)) => query.bind(s.as_str()),
                    (_, FieldValue::Integer(i)) => query.bind(*i),
                    (_, FieldValue::Float(f)) => query.bind(*f),
                    (_, FieldValue::Boolean(b)) => query.bind(*b),
                    (FieldKind::Integer, FieldValue::Missing) | (FieldKind::Boolean, FieldValue::Missing) => {
                        query.bind(None::<i64>)
                    },
                    (FieldKind::Float, FieldValue::Missing) => query.bind(None::<f64>),
                    (_, FieldValue::Missing) => query.bind(None::<String>),
                };
            }
            query = query.bind(run_id.as_str()).bind(collected_at.as_str());

            if let Err(source) = query.execute(&mut **tx).await {
                error!(
                    category = %category,
                    run_id = %run_id,
                    key = %record.key,
                    error = %source,
                    "Row rejected, rolling back category"
                );
                return Err(PersistError::Row {
                    category,
                    key: record.key.clone(),
                    source,
                });
            }
            upserted += 1;
        }

        debug!(category = %category, run_id = %run_id, rows = upserted, "Rows upserted");
        Ok(upserted)
    }

    /// Provenance row for a category run
    pub async fn record_run(
        tx: &mut Transaction<'_, Sqlite>,
        run: &CollectionRun,
        rows_upserted: u64,
    ) -> Result<(), PersistError> {
        let errors = serde_json::to_string(&run.errors)?;

        sqlx::query(
            "INSERT INTO collection_runs
                (run_id, category, status, started_at, finished_at, records_collected,
                 pages_fetched, total_reported, rows_upserted, errors)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(run_id, category) DO UPDATE SET
                status = excluded.status,
                finished_at = excluded.finished_at,
                records_collected = excluded.records_collected,
                pages_fetched = excluded.pages_fetched,
                total_reported = excluded.total_reported,
                rows_upserted = excluded.rows_upserted,
                errors = excluded.errors",
        )
        .bind(run.run_id.to_string())
        .bind(run.category.as_str())
        .bind(run.status.as_str())
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(to_i64(run.records_collected))
        .bind(i64::from(run.pages_fetched))
        .bind(run.total_reported.map(to_i64))
        .bind(to_i64(rows_upserted))
        .bind(errors)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    pub async fn count_rows(&self, category: Category) -> Result<i64, PersistError> {
        let sql = format!("SELECT COUNT(*) FROM {}", category.table_name());
        Ok(sqlx::query_scalar(&sql).fetch_one(&self.pool).await?)
    }

    /// Natural keys of a category table, sorted
    pub async fn fetch_keys(&self, category: Category) -> Result<Vec<String>, PersistError> {
        let schema = CategorySchema::for_category(category);
        let sql = format!(
            "SELECT {key} FROM {table} ORDER BY {key}",
            key = schema.key_column,
            table = schema.table()
        );
        Ok(sqlx::query_scalar(&sql).fetch_all(&self.pool).await?)
    }

    /// Text value of one column for one key, for spot checks
    pub async fn fetch_text(&self, category: Category, key: &str, column: &str) -> Result<Option<String>, PersistError> {
        let schema = CategorySchema::for_category(category);
        if schema.position(column).is_none() && column != "run_id" {
            return Err(sqlx::Error::ColumnNotFound(column.to_string()).into());
        }
        let sql = format!(
            "SELECT CAST({column} AS TEXT) FROM {table} WHERE {key} = ?",
            table = schema.table(),
            key = schema.key_column
        );
        let value: Option<Option<String>> = sqlx::query_scalar(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value.flatten())
    }

    pub async fn table_stats(&self) -> Result<Vec<TableStats>, PersistError> {
        let mut stats = Vec::with_capacity(Category::ALL.len());

        for category in Category::ALL {
            let sql = format!("SELECT COUNT(*), MAX(collected_at) FROM {}", category.table_name());
            let (rows, last_collected_at): (i64, Option<String>) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
            let runs_recorded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM collection_runs WHERE category = ?")
                .bind(category.as_str())
                .fetch_one(&self.pool)
                .await?;

            stats.push(TableStats {
                category,
                rows,
                last_collected_at,
                runs_recorded,
            });
        }

        Ok(stats)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn create_table_sql(schema: &CategorySchema) -> String {
    let mut columns = Vec::with_capacity(schema.fields.len() + 3);
    columns.push(format!("{} TEXT PRIMARY KEY NOT NULL", schema.key_column));
    columns.extend(
        schema
            .fields
            .iter()
            .map(|f| format!("{} {}", f.column, f.kind.sql_type())),
    );
    columns.push("run_id TEXT NOT NULL".to_string());
    columns.push("collected_at TEXT NOT NULL".to_string());

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        schema.table(),
        columns.join(",\n    ")
    )
}

fn upsert_sql(schema: &CategorySchema) -> String {
    let mut columns = Vec::with_capacity(schema.fields.len() + 3);
    columns.push(schema.key_column);
    columns.extend(schema.fields.iter().map(|f| f.column));
    columns.push("run_id");
    columns.push("collected_at");

    let placeholders = vec!["?"; columns.len()].join(", ");
    let updates = columns[1..]
        .iter()
        .map(|c| format!("{c} = excluded.{c}"))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "INSERT INTO {table} ({columns}) VALUES ({placeholders}) ON CONFLICT({key}) DO UPDATE SET {updates}",
        table = schema.table(),
        columns = columns.join(", "),
        key = schema.key_column,
    )
}
