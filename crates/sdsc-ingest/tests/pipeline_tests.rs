//! End-to-end pipeline tests with a scripted page source
//!
//! Each test gets its own temp directory holding the SQLite database and
//! the snapshot directory.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sdsc_common::types::{Category, PageRequest, PageResult, RawRecord, RunStatus};
use sdsc_ingest::config::{CollectorConfig, DatabaseConfig};
use sdsc_ingest::preprocess::CategorySchema;
use sdsc_ingest::{
    CategoryScope, CollectionOrchestrator, ConcurrencyLimiter, Database, FetchError, IngestError,
    IngestPipeline, PageSource, PersistStatus, Persister, RetryExecutor, RetryPolicy, SnapshotWriter,
};
use serde_json::{json, Map};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("sdsc_ingest=debug")
        .try_init();
}

/// Pages for one category: `sizes[n]` records on page n+1, with an
/// optional page answering with a permanent error
#[derive(Clone, Default)]
struct Script {
    sizes: Vec<usize>,
    fail_page: Option<u32>,
}

impl Script {
    fn pages(sizes: &[usize]) -> Self {
        Self {
            sizes: sizes.to_vec(),
            fail_page: None,
        }
    }

    fn failing_on(mut self, page: u32) -> Self {
        self.fail_page = Some(page);
        self
    }
}

#[derive(Default)]
struct ScriptedSource {
    scripts: HashMap<Category, Script>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedSource {
    fn new(scripts: impl IntoIterator<Item = (Category, Script)>) -> Self {
        Self {
            scripts: scripts.into_iter().collect(),
            ..Self::default()
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn record(category: Category, page: u32, index: usize) -> RawRecord {
        let schema = CategorySchema::for_category(category);
        let mut fields = Map::new();
        fields.insert(schema.key_raw.to_string(), json!(format!("{}{:04}", page, index)));
        if let Some(first) = schema.fields.first() {
            fields.insert(first.raw.to_string(), json!(format!("{} {}-{}", category, page, index)));
        }
        RawRecord::new(fields)
    }
}

#[async_trait]
impl PageSource for ScriptedSource {
    async fn fetch(&self, request: &PageRequest) -> Result<PageResult, FetchError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let script = self.scripts.get(&request.category).cloned().unwrap_or_default();
        let page = request.cursor.page();
        if script.fail_page == Some(page) {
            return Err(FetchError::permanent(request, "HTTP 401"));
        }

        let size = script.sizes.get(page as usize - 1).copied().unwrap_or(0);
        let records = (0..size)
            .map(|i| Self::record(request.category, page, i))
            .collect();
        let next_cursor = if (page as usize) < script.sizes.len() {
            request.cursor.next()
        } else {
            None
        };

        Ok(PageResult {
            records,
            next_cursor,
            total_count: Some(script.sizes.iter().sum::<usize>() as u64),
        })
    }
}

struct Harness {
    _dir: TempDir,
    db: Database,
    snapshots: SnapshotWriter,
    pipeline: IngestPipeline,
}

async fn harness(source: Arc<dyn PageSource>, max_concurrency: usize) -> Harness {
    init_tracing();
    let dir = TempDir::new().unwrap();

    let db = Database::connect(&DatabaseConfig {
        url: format!("sqlite://{}", dir.path().join("ingest.db").display()),
        max_connections: 4,
        ..DatabaseConfig::default()
    })
    .await
    .unwrap();
    db.ensure_schema().await.unwrap();
    let snapshots = SnapshotWriter::new(dir.path().join("processed"));

    let config = CollectorConfig {
        page_size: 100,
        max_pages: 100,
        max_concurrency,
    };
    let orchestrator = CollectionOrchestrator::new(
        source,
        RetryExecutor::new(RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }),
        ConcurrencyLimiter::new(max_concurrency),
        config,
    );
    let persister = Persister::new(db.clone(), snapshots.clone());

    Harness {
        _dir: dir,
        db,
        snapshots,
        pipeline: IngestPipeline::new(orchestrator, Arc::new(persister)),
    }
}

fn categories(list: &[Category]) -> BTreeSet<Category> {
    list.iter().copied().collect()
}

#[tokio::test]
async fn test_partial_run_persists_what_was_collected() {
    let source = ScriptedSource::new([
        (Category::Districts, Script::pages(&[100, 100, 40])),
        (Category::Stores, Script::pages(&[100; 5]).failing_on(2)),
    ]);
    let h = harness(Arc::new(source), 4).await;

    let report = h
        .pipeline
        .run(
            &categories(&[Category::Districts, Category::Stores]),
            &CategoryScope::new("11"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Partial);

    let districts = &report.categories[&Category::Districts];
    assert_eq!(districts.run.status, RunStatus::Success);
    assert_eq!(districts.run.records_collected, 240);
    assert_eq!(districts.stats.as_ref().unwrap().output, 240);
    assert_eq!(districts.persist.as_ref().unwrap().status, PersistStatus::Committed);

    let stores = &report.categories[&Category::Stores];
    assert_eq!(stores.run.status, RunStatus::Partial);
    assert_eq!(stores.run.records_collected, 100);
    assert_eq!(stores.run.errors[0].page, 2);
    assert_eq!(stores.persist.as_ref().unwrap().rows_upserted, 100);

    assert_eq!(h.db.count_rows(Category::Districts).await.unwrap(), 240);
    assert_eq!(h.db.count_rows(Category::Stores).await.unwrap(), 100);
    assert!(h.snapshots.latest_snapshot(Category::Districts).unwrap().is_some());
    assert!(h.snapshots.latest_snapshot(Category::Stores).unwrap().is_some());
    assert!(report.persist_failures().is_empty());
}

#[tokio::test]
async fn test_limiter_bounds_fetches_in_flight() {
    let scripts = Category::ALL
        .into_iter()
        .map(|category| (category, Script::pages(&[10; 6])));
    let source = Arc::new(ScriptedSource::new(scripts).with_delay(Duration::from_millis(15)));
    let h = harness(source.clone(), 2).await;

    let report = h
        .pipeline
        .run(&Category::ALL.into_iter().collect(), &CategoryScope::new("11"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 2);
    for category in Category::ALL {
        assert_eq!(h.db.count_rows(category).await.unwrap(), 60);
    }
}

#[tokio::test]
async fn test_failed_run_persists_nothing() {
    let source = ScriptedSource::new([
        (Category::Stores, Script::pages(&[100]).failing_on(1)),
        (Category::Zones, Script::pages(&[100]).failing_on(1)),
    ]);
    let h = harness(Arc::new(source), 2).await;

    let report = h
        .pipeline
        .run(
            &categories(&[Category::Stores, Category::Zones]),
            &CategoryScope::new("11"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert!(report.categories.values().all(|c| c.persist.is_none()));
    assert_eq!(h.db.count_rows(Category::Stores).await.unwrap(), 0);
    assert!(h.snapshots.list_snapshots().unwrap().is_empty());
}

#[tokio::test]
async fn test_cancelled_run_persists_nothing() {
    let source = ScriptedSource::new([
        (Category::Stores, Script::pages(&[10; 50])),
        (Category::Districts, Script::pages(&[10; 50])),
    ])
    .with_delay(Duration::from_millis(10));
    let h = harness(Arc::new(source), 2).await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        trigger.cancel();
    });

    let result = h
        .pipeline
        .run(&categories(&[Category::Stores, Category::Districts]), &CategoryScope::new("11"), &cancel)
        .await;

    match result {
        Err(IngestError::Cancelled { discarded }) => {
            assert_eq!(discarded, vec![Category::Stores, Category::Districts]);
        },
        other => panic!("expected cancellation, got {:?}", other.map(|r| r.status)),
    }
    assert_eq!(h.db.count_rows(Category::Stores).await.unwrap(), 0);
    assert_eq!(h.db.count_rows(Category::Districts).await.unwrap(), 0);
    assert!(h.snapshots.list_snapshots().unwrap().is_empty());
}

#[tokio::test]
async fn test_rejected_category_does_not_affect_others() {
    let source = ScriptedSource::new([
        (Category::Districts, Script::pages(&[30])),
        (Category::Stores, Script::pages(&[30])),
    ]);
    let h = harness(Arc::new(source), 2).await;

    sqlx::query(
        "CREATE TRIGGER reject_store BEFORE INSERT ON stores
         WHEN NEW.bizes_id = '10017'
         BEGIN SELECT RAISE(ABORT, 'rejected'); END",
    )
    .execute(h.db.pool())
    .await
    .unwrap();

    let report = h
        .pipeline
        .run(
            &categories(&[Category::Districts, Category::Stores]),
            &CategoryScope::new("11"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.persist_failures(), vec![Category::Stores]);

    let stores = report.categories[&Category::Stores].persist.as_ref().unwrap();
    assert!(stores.error.as_deref().unwrap().contains("10017"));
    assert_eq!(h.db.count_rows(Category::Stores).await.unwrap(), 0);
    assert_eq!(h.db.count_rows(Category::Districts).await.unwrap(), 30);
    assert!(h.snapshots.latest_snapshot(Category::Stores).unwrap().is_none());
}

#[tokio::test]
async fn test_rerun_upserts_instead_of_appending() {
    let source = Arc::new(ScriptedSource::new([(Category::Classifications, Script::pages(&[50]))]));
    let h = harness(source, 2).await;
    let wanted = categories(&[Category::Classifications]);

    let first = h
        .pipeline
        .run(&wanted, &CategoryScope::default(), &CancellationToken::new())
        .await
        .unwrap();
    let second = h
        .pipeline
        .run(&wanted, &CategoryScope::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(h.db.count_rows(Category::Classifications).await.unwrap(), 50);

    let stats = h.db.table_stats().await.unwrap();
    let classifications = stats
        .iter()
        .find(|s| s.category == Category::Classifications)
        .unwrap();
    assert_eq!(classifications.runs_recorded, 2);
    assert_eq!(
        h.db.fetch_text(Category::Classifications, "10000", "run_id").await.unwrap(),
        Some(second.run_id.to_string())
    );
}
