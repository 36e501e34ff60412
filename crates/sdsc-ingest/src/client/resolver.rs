//! Province and district name lookups
//!
//! The division listing endpoint answers both questions: `catId=mega` lists
//! provinces (ctprvnCd/ctprvnNm), `catId=cty` with a `ctprvnCd` lists the
//! districts of one province (signguCd/signguNm).

use std::collections::BTreeMap;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use sdsc_common::types::{Category, CollectionRun, PageRequest, RawRecord, RunStatus};

use crate::collector::{BatchCollector, CollectOutcome};
use crate::error::{IngestError, IngestResult};

/// Administrative division code with its display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Region {
    pub code: String,
    pub name: String,
}

/// Resolves region names to codes through the regular collection path, so
/// lookups share the retry policy and the concurrency limit
pub struct RegionResolver {
    collector: BatchCollector,
    page_size: u32,
}

impl RegionResolver {
    pub fn new(collector: BatchCollector, page_size: u32) -> Self {
        Self { collector, page_size }
    }

    /// Every province
    pub async fn provinces(&self, cancel: &CancellationToken) -> IngestResult<Vec<Region>> {
        let filters = BTreeMap::from([("catId".to_string(), "mega".to_string())]);
        let records = self.list(filters, cancel).await?;
        Ok(regions(&records, "ctprvnCd", "ctprvnNm"))
    }

    /// Districts of one province
    pub async fn districts(&self, sido_code: &str, cancel: &CancellationToken) -> IngestResult<Vec<Region>> {
        let filters = BTreeMap::from([
            ("catId".to_string(), "cty".to_string()),
            ("ctprvnCd".to_string(), sido_code.to_string()),
        ]);
        let records = self.list(filters, cancel).await?;
        Ok(regions(&records, "signguCd", "signguNm"))
    }

    /// Province code for a name ("서울특별시", "서울") or a code, which is
    /// passed through unchanged
    pub async fn resolve_sido(&self, name_or_code: &str, cancel: &CancellationToken) -> IngestResult<String> {
        let wanted = name_or_code.trim();
        if is_code(wanted) {
            return Ok(wanted.to_string());
        }

        let provinces = self.provinces(cancel).await?;
        let region = find(&provinces, wanted)
            .ok_or_else(|| IngestError::Region(format!("Unknown province '{}'", wanted)))?;

        info!(name = wanted, code = %region.code, "Resolved province");
        Ok(region.code.clone())
    }

    /// District code within a province, by name or code
    pub async fn resolve_sigungu(
        &self,
        sido_code: &str,
        name_or_code: &str,
        cancel: &CancellationToken,
    ) -> IngestResult<String> {
        let wanted = name_or_code.trim();
        if is_code(wanted) {
            return Ok(wanted.to_string());
        }

        let districts = self.districts(sido_code, cancel).await?;
        let region = find(&districts, wanted).ok_or_else(|| {
            IngestError::Region(format!("Unknown district '{}' in province {}", wanted, sido_code))
        })?;

        info!(name = wanted, sido = sido_code, code = %region.code, "Resolved district");
        Ok(region.code.clone())
    }

    async fn list(
        &self,
        filters: BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> IngestResult<Vec<RawRecord>> {
        let run = CollectionRun::start(Uuid::new_v4(), Category::Districts);
        let first = PageRequest::first(Category::Districts, self.page_size, filters);

        match self.collector.collect(run, first, cancel).await {
            CollectOutcome::Completed(batch) if batch.run.status == RunStatus::Success => {
                debug!(regions = batch.records.len(), "Region listing fetched");
                Ok(batch.records)
            },
            CollectOutcome::Completed(batch) => {
                let reason = batch
                    .run
                    .errors
                    .first()
                    .map(|e| e.message.clone())
                    .unwrap_or_else(|| "incomplete listing".to_string());
                Err(IngestError::Region(reason))
            },
            CollectOutcome::Cancelled { category, .. } => Err(IngestError::Cancelled {
                discarded: vec![category],
            }),
        }
    }
}

fn is_code(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_digit())
}

fn regions(records: &[RawRecord], code_field: &str, name_field: &str) -> Vec<Region> {
    let text = |record: &RawRecord, field: &str| -> Option<String> {
        match record.get(field)? {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    };

    records
        .iter()
        .filter_map(|r| {
            Some(Region {
                code: text(r, code_field)?,
                name: text(r, name_field)?,
            })
        })
        .collect()
}

/// Exact name match first, then a prefix match ("서울" for "서울특별시")
fn find<'a>(regions: &'a [Region], wanted: &str) -> Option<&'a Region> {
    regions
        .iter()
        .find(|r| r.name == wanted)
        .or_else(|| regions.iter().find(|r| r.name.starts_with(wanted)))
}
