//! Collection run bookkeeping

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Category;

/// Outcome of a category collection, or of a whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }

    /// Aggregate per-category statuses into a run-level status.
    ///
    /// `Success` when every category succeeded, `Failed` when no category
    /// produced data, `Partial` otherwise. An empty set is `Failed`.
    pub fn aggregate<I>(outcomes: I) -> RunStatus
    where
        I: IntoIterator<Item = (RunStatus, u64)>,
    {
        let mut any = false;
        let mut all_success = true;
        let mut any_data = false;

        for (status, records) in outcomes {
            any = true;
            all_success &= status == RunStatus::Success;
            any_data |= records > 0;
        }

        if !any {
            RunStatus::Failed
        } else if all_success {
            RunStatus::Success
        } else if any_data {
            RunStatus::Partial
        } else {
            RunStatus::Failed
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a category stopped before exhausting its cursor chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Non-retryable failure; no retry was attempted
    Permanent,
    /// Transient failure that outlived the retry budget
    ExhaustedRetries,
    /// The API returned a cursor that did not advance
    NonTerminating,
    /// The configured page ceiling was reached
    PageLimit,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Permanent => "permanent",
            ErrorKind::ExhaustedRetries => "exhausted_retries",
            ErrorKind::NonTerminating => "non_terminating",
            ErrorKind::PageLimit => "page_limit",
        }
    }
}

/// One error entry recorded against a category run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    /// Page number the error happened on
    pub page: u32,
    pub kind: ErrorKind,
    /// Number of attempts made for that page
    pub attempts: u32,
    pub message: String,
}

/// Per-category record of one collection cycle.
///
/// Created by the orchestrator when the category starts, updated as pages
/// land and finalized once the collector stops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRun {
    pub run_id: Uuid,
    pub category: Category,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub records_collected: u64,
    pub pages_fetched: u32,
    /// Total count the API advertised, if any
    pub total_reported: Option<u64>,
    pub errors: Vec<ErrorSummary>,
}

impl CollectionRun {
    pub fn start(run_id: Uuid, category: Category) -> Self {
        Self {
            run_id,
            category,
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Failed,
            records_collected: 0,
            pages_fetched: 0,
            total_reported: None,
            errors: Vec::new(),
        }
    }

    pub fn record_page(&mut self, records: usize, total: Option<u64>) {
        self.pages_fetched += 1;
        self.records_collected += records as u64;
        if total.is_some() {
            self.total_reported = total;
        }
    }

    pub fn record_error(&mut self, error: ErrorSummary) {
        self.errors.push(error);
    }

    /// Close the run and derive its status from what was collected
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
        self.status = if self.errors.is_empty() {
            RunStatus::Success
        } else if self.records_collected > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Failed
        };
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}
