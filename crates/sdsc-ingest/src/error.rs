//! Error taxonomy for the collection pipeline
//!
//! Errors are layered the way they propagate:
//!
//! - [`FetchError`] comes out of a single page request and is either
//!   transient (worth retrying) or permanent.
//! - [`RetryError`] is what the retry executor hands back once it gives up.
//! - [`PersistError`] covers snapshot files and the relational store.
//! - [`IngestError`] is reserved for failures that abort a whole run.

use sdsc_common::types::{Category, PageRequest};
use thiserror::Error;

/// Failure of a single page fetch
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Timeouts, connection failures, 5xx, rate limiting
    #[error("Transient failure fetching {category} page {page}: {reason}")]
    Transient {
        category: Category,
        page: u32,
        reason: String,
    },

    /// Auth failures, malformed requests, schema violations
    #[error("Permanent failure fetching {category} page {page}: {reason}")]
    Permanent {
        category: Category,
        page: u32,
        reason: String,
    },
}

impl FetchError {
    pub fn transient(request: &PageRequest, reason: impl Into<String>) -> Self {
        Self::Transient {
            category: request.category,
            page: request.cursor.page(),
            reason: reason.into(),
        }
    }

    pub fn permanent(request: &PageRequest, reason: impl Into<String>) -> Self {
        Self::Permanent {
            category: request.category,
            page: request.cursor.page(),
            reason: reason.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Transient { reason, .. } | Self::Permanent { reason, .. } => reason,
        }
    }
}

/// Outcome of a retried operation that did not succeed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetryError {
    /// Every attempt failed transiently
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: FetchError },

    /// A permanent failure stopped the retry loop
    #[error("{error}")]
    Permanent { attempts: u32, error: FetchError },

    /// The run was cancelled while attempting or backing off
    #[error("Operation cancelled")]
    Cancelled,
}

/// Snapshot or relational write failure
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A single row was rejected; the whole category transaction rolls back
    #[error("Upsert into {category} failed for key '{key}': {source}")]
    Row {
        category: Category,
        key: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PersistError {
    pub fn snapshot(msg: impl Into<String>) -> Self {
        Self::Snapshot(msg.into())
    }
}

/// Errors that abort an entire run
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No categories requested")]
    NoCategories,

    #[error("Run cancelled; discarded categories: {}", join_categories(.discarded))]
    Cancelled { discarded: Vec<Category> },

    #[error("Collection task failed: {0}")]
    TaskFailed(String),

    #[error("Region lookup failed: {0}")]
    Region(String),
}

impl IngestError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

fn join_categories(categories: &[Category]) -> String {
    if categories.is_empty() {
        return "none".to_string();
    }
    categories
        .iter()
        .map(Category::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

pub type IngestResult<T> = std::result::Result<T, IngestError>;
