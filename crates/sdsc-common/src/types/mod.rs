//! Domain types shared by the collection pipeline

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::SdscError;

mod run;

pub use run::{CollectionRun, ErrorKind, ErrorSummary, RunStatus};

// ============================================================================
// Category
// ============================================================================

/// One logical data source of the commercial district API.
///
/// The category decides which endpoint is called and which field acts as
/// the natural key of its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Individual business premises (상가업소)
    Stores,
    /// Administrative districts (행정구역)
    Districts,
    /// Commercial zones (상권)
    Zones,
    /// Industry classifications (상권업종)
    Classifications,
}

impl Category {
    /// Every category, in a stable order
    pub const ALL: [Category; 4] = [
        Category::Stores,
        Category::Districts,
        Category::Zones,
        Category::Classifications,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Stores => "stores",
            Category::Districts => "districts",
            Category::Zones => "zones",
            Category::Classifications => "classifications",
        }
    }

    /// Relational table holding the category's latest state
    pub fn table_name(&self) -> &'static str {
        self.as_str()
    }
}

impl std::str::FromStr for Category {
    type Err = SdscError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stores" | "store" => Ok(Category::Stores),
            "districts" | "district" => Ok(Category::Districts),
            "zones" | "zone" => Ok(Category::Zones),
            "classifications" | "classification" | "upjong" => Ok(Category::Classifications),
            _ => Err(SdscError::UnknownCategory(s.to_string())),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Pagination
// ============================================================================

/// Page-number cursor. Pages are numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cursor(u32);

impl Cursor {
    pub const FIRST: Cursor = Cursor(1);

    pub fn new(page: u32) -> crate::Result<Self> {
        if page == 0 {
            return Err(SdscError::InvalidCursor("page numbers start at 1".to_string()));
        }
        Ok(Cursor(page))
    }

    pub fn page(&self) -> u32 {
        self.0
    }

    /// The following page, or `None` on overflow
    pub fn next(&self) -> Option<Cursor> {
        self.0.checked_add(1).map(Cursor)
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "page {}", self.0)
    }
}

/// A single page request against one category endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub category: Category,
    pub cursor: Cursor,
    pub page_size: u32,
    /// Query parameters narrowing the listing (region, industry, ...)
    pub filters: BTreeMap<String, String>,
}

impl PageRequest {
    pub fn first(category: Category, page_size: u32, filters: BTreeMap<String, String>) -> Self {
        Self {
            category,
            cursor: Cursor::FIRST,
            page_size,
            filters,
        }
    }

    /// Same request positioned at another cursor
    pub fn at(&self, cursor: Cursor) -> Self {
        Self {
            cursor,
            ..self.clone()
        }
    }
}

/// Decoded page returned by an endpoint
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageResult {
    pub records: Vec<RawRecord>,
    /// `None` marks the end of the stream
    pub next_cursor: Option<Cursor>,
    pub total_count: Option<u64>,
}

// ============================================================================
// Records
// ============================================================================

/// Record exactly as received from the API, field name to untyped value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(Map<String, Value>);

impl RawRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }
}

impl From<Map<String, Value>> for RawRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

impl TryFrom<Value> for RawRecord {
    type Error = Value;

    /// Only JSON objects are records; anything else is handed back.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(other),
        }
    }
}
