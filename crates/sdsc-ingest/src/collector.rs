//! Drives one category from the first page to the end of its cursor chain

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sdsc_common::types::{
    Category, CollectionRun, ErrorKind, ErrorSummary, PageRequest, RawRecord,
};

use crate::client::PageSource;
use crate::error::{FetchError, RetryError};
use crate::limiter::ConcurrencyLimiter;
use crate::retry::RetryExecutor;

/// Records gathered for one category, with the run that produced them
#[derive(Debug, Clone)]
pub struct CategoryBatch {
    pub run: CollectionRun,
    /// In cursor order
    pub records: Vec<RawRecord>,
}

/// How a category collection ended
#[derive(Debug, Clone)]
pub enum CollectOutcome {
    /// Ran to the end of the chain or stopped on an error. Errors are in
    /// `run.errors`; fetched pages are kept either way.
    Completed(CategoryBatch),
    /// The run was cancelled; everything gathered was dropped
    Cancelled {
        category: Category,
        pages_discarded: u32,
        records_discarded: u64,
    },
}

/// Pages through one category with the retry executor and the shared limiter
#[derive(Clone)]
pub struct BatchCollector {
    source: Arc<dyn PageSource>,
    executor: RetryExecutor,
    limiter: ConcurrencyLimiter,
    max_pages: u32,
}

impl BatchCollector {
    pub fn new(
        source: Arc<dyn PageSource>,
        executor: RetryExecutor,
        limiter: ConcurrencyLimiter,
        max_pages: u32,
    ) -> Self {
        Self {
            source,
            executor,
            limiter,
            max_pages: max_pages.max(1),
        }
    }

    /// Fetch pages in cursor order starting at `first.cursor`.
    ///
    /// Stops at the end of the chain, on the first page that fails
    /// permanently or exhausts its retries, on a cursor that does not move
    /// forward, or once `max_pages` pages were fetched with more remaining.
    pub async fn collect(
        &self,
        mut run: CollectionRun,
        first: PageRequest,
        cancel: &CancellationToken,
    ) -> CollectOutcome {
        let category = first.category;
        let mut records: Vec<RawRecord> = Vec::new();
        let mut cursor = first.cursor;

        info!(category = %category, run_id = %run.run_id, "Collecting category");

        loop {
            let request = first.at(cursor);
            let result = self.fetch_page(&request, cancel).await;

            let page = match result {
                Ok(page) => page,
                Err(RetryError::Cancelled) => {
                    warn!(
                        category = %category,
                        page = cursor.page(),
                        pages = run.pages_fetched,
                        "Collection cancelled, discarding accumulated pages"
                    );
                    return CollectOutcome::Cancelled {
                        category,
                        pages_discarded: run.pages_fetched,
                        records_discarded: run.records_collected,
                    };
                },
                Err(RetryError::Exhausted { attempts, last }) => {
                    Self::stop(&mut run, cursor.page(), ErrorKind::ExhaustedRetries, attempts, &last);
                    break;
                },
                Err(RetryError::Permanent { attempts, error }) => {
                    Self::stop(&mut run, cursor.page(), ErrorKind::Permanent, attempts, &error);
                    break;
                },
            };

            run.record_page(page.records.len(), page.total_count);
            debug!(
                category = %category,
                page = cursor.page(),
                records = page.records.len(),
                accumulated = run.records_collected,
                "Page collected"
            );
            records.extend(page.records);

            let Some(next) = page.next_cursor else {
                break;
            };

            if next <= cursor {
                run.record_error(ErrorSummary {
                    page: cursor.page(),
                    kind: ErrorKind::NonTerminating,
                    attempts: 1,
                    message: format!("cursor did not advance: {} -> {}", cursor, next),
                });
                warn!(category = %category, from = %cursor, to = %next, "Cursor did not advance, stopping");
                break;
            }

            if run.pages_fetched >= self.max_pages {
                run.record_error(ErrorSummary {
                    page: next.page(),
                    kind: ErrorKind::PageLimit,
                    attempts: 0,
                    message: format!("page limit of {} reached with more pages remaining", self.max_pages),
                });
                warn!(category = %category, max_pages = self.max_pages, "Page limit reached, stopping");
                break;
            }

            cursor = next;
        }

        run.finish();
        info!(
            category = %category,
            run_id = %run.run_id,
            status = %run.status,
            records = run.records_collected,
            pages = run.pages_fetched,
            errors = run.errors.len(),
            "Category collection finished"
        );

        CollectOutcome::Completed(CategoryBatch { run, records })
    }

    /// One page through the executor. The limiter permit covers a single
    /// attempt, never the backoff between attempts.
    async fn fetch_page(
        &self,
        request: &PageRequest,
        cancel: &CancellationToken,
    ) -> Result<sdsc_common::types::PageResult, RetryError> {
        let source = &self.source;
        let limiter = &self.limiter;

        self.executor
            .execute(
                move |attempt| async move {
                    let _permit = limiter
                        .acquire()
                        .await
                        .map_err(|_| FetchError::permanent(request, "concurrency limiter closed"))?;
                    if attempt > 1 {
                        debug!(category = %request.category, page = request.cursor.page(), attempt, "Retrying page");
                    }
                    source.fetch(request).await
                },
                cancel,
            )
            .await
    }

    fn stop(run: &mut CollectionRun, page: u32, kind: ErrorKind, attempts: u32, error: &FetchError) {
        warn!(
            category = %run.category,
            run_id = %run.run_id,
            page,
            attempts,
            kind = kind.as_str(),
            error = %error,
            "Page failed, stopping category with partial data"
        );
        run.record_error(ErrorSummary {
            page,
            kind,
            attempts,
            message: error.to_string(),
        });
    }
}
