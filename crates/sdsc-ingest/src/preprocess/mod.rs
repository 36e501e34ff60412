//! Normalization of raw API records
//!
//! This is the boundary where untyped JSON maps become typed rows. Each
//! category has a declared [`CategorySchema`]; every field of a
//! [`NormalizedRecord`] holds a typed value or [`FieldValue::Missing`].
//!
//! Rules:
//!
//! - strings are trimmed and empty strings are missing
//! - numbers are read from JSON numbers or numeric strings
//! - booleans accept `true`/`false`, `Y`/`N` and `1`/`0`
//! - unparsable or out-of-range values become missing and are counted,
//!   they never fail the batch
//! - records without a usable natural key are rejected
//! - duplicate keys keep the last record seen, at the position where the
//!   key first appeared
//!
//! Normalization is pure and idempotent through [`NormalizedRecord::to_raw`].

mod schema;

pub use schema::{CategorySchema, FieldKind, FieldSpec, IndexSpec, KOREA_LAT, KOREA_LON};

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::{Number, Value};

use sdsc_common::types::{Category, RawRecord};

/// Typed value of one declared field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Categorical(String),
    Missing,
}

impl FieldValue {
    pub fn is_missing(&self) -> bool {
        matches!(self, FieldValue::Missing)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) | FieldValue::Categorical(s) => Some(s),
            _ => None,
        }
    }

    /// Rendering used by row snapshots; missing is the empty string
    pub fn to_cell(&self) -> String {
        match self {
            FieldValue::Text(s) | FieldValue::Categorical(s) => s.clone(),
            FieldValue::Integer(i) => i.to_string(),
            FieldValue::Float(f) => f.to_string(),
            FieldValue::Boolean(b) => b.to_string(),
            FieldValue::Missing => String::new(),
        }
    }

    fn to_json(&self) -> Option<Value> {
        match self {
            FieldValue::Text(s) | FieldValue::Categorical(s) => Some(Value::String(s.clone())),
            FieldValue::Integer(i) => Some(Value::from(*i)),
            FieldValue::Float(f) => Number::from_f64(*f).map(Value::Number),
            FieldValue::Boolean(b) => Some(Value::Bool(*b)),
            FieldValue::Missing => None,
        }
    }
}

/// Record after coercion, aligned with its category schema
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRecord {
    pub category: Category,
    pub key: String,
    /// One entry per `CategorySchema::fields`, same order
    pub values: Vec<FieldValue>,
}

impl NormalizedRecord {
    pub fn schema(&self) -> &'static CategorySchema {
        CategorySchema::for_category(self.category)
    }

    /// Value of a column by name
    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.schema().position(column).and_then(|i| self.values.get(i))
    }

    /// Back to the API's raw shape. Missing fields are omitted.
    pub fn to_raw(&self) -> RawRecord {
        let schema = self.schema();
        let mut raw = RawRecord::default();
        raw.insert(schema.key_raw, Value::String(self.key.clone()));
        for (spec, value) in schema.fields.iter().zip(&self.values) {
            if let Some(json) = value.to_json() {
                raw.insert(spec.raw, json);
            }
        }
        raw
    }
}

/// Counters describing one normalization pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeStats {
    pub input: usize,
    pub output: usize,
    /// Records dropped for lacking a natural key
    pub missing_key: usize,
    /// Records replaced by a later record with the same key
    pub duplicates: usize,
    /// Present values that could not be parsed
    pub unparsable: usize,
    /// Parsed values outside the field's range
    pub out_of_range: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedBatch {
    pub category: Category,
    pub records: Vec<NormalizedRecord>,
    pub stats: NormalizeStats,
}

impl NormalizedBatch {
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.key.as_str())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Normalize one category's raw records
pub fn normalize(category: Category, records: &[RawRecord]) -> NormalizedBatch {
    let schema = CategorySchema::for_category(category);
    let mut stats = NormalizeStats {
        input: records.len(),
        ..NormalizeStats::default()
    };
    let mut out: Vec<NormalizedRecord> = Vec::with_capacity(records.len());
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(records.len());

    for raw in records {
        let Some(key) = raw.get(schema.key_raw).and_then(coerce_key) else {
            stats.missing_key += 1;
            continue;
        };

        let values = schema
            .fields
            .iter()
            .map(|spec| coerce_field(spec, raw.get(spec.raw), &mut stats))
            .collect();

        let record = NormalizedRecord {
            category,
            key,
            values,
        };

        match positions.get(&record.key) {
            Some(&index) => {
                out[index] = record;
                stats.duplicates += 1;
            },
            None => {
                positions.insert(record.key.clone(), out.len());
                out.push(record);
            },
        }
    }

    stats.output = out.len();
    NormalizedBatch {
        category,
        records: out,
        stats,
    }
}

fn coerce_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        },
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn coerce_field(spec: &FieldSpec, value: Option<&Value>, stats: &mut NormalizeStats) -> FieldValue {
    let value = match value {
        None | Some(Value::Null) => return FieldValue::Missing,
        Some(Value::String(s)) if s.trim().is_empty() => return FieldValue::Missing,
        Some(value) => value,
    };

    let parsed = match spec.kind {
        FieldKind::Text => as_text(value).map(FieldValue::Text),
        FieldKind::Categorical => as_text(value).map(FieldValue::Categorical),
        FieldKind::Integer => as_integer(value).map(FieldValue::Integer),
        FieldKind::Float => as_float(value).map(FieldValue::Float),
        FieldKind::Boolean => as_bool(value).map(FieldValue::Boolean),
    };

    let Some(parsed) = parsed else {
        stats.unparsable += 1;
        return FieldValue::Missing;
    };

    let numeric = match parsed {
        FieldValue::Integer(i) => Some(i as f64),
        FieldValue::Float(f) => Some(f),
        _ => None,
    };
    if let (Some(n), Some((lo, hi))) = (numeric, spec.range) {
        if n < lo || n > hi {
            stats.out_of_range += 1;
            return FieldValue::Missing;
        }
    }

    parsed
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral))
        },
        _ => None,
    }
}

fn integral(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15).then_some(f as i64)
}

fn as_float(value: &Value) -> Option<f64> {
    let f = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    f.is_finite().then_some(f)
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64()? {
            1 => Some(true),
            0 => Some(false),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" | "true" | "1" => Some(true),
            "n" | "no" | "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Headline figures of a normalized batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatasetSummary {
    pub category: Option<Category>,
    pub records: usize,
    pub provinces: usize,
    pub districts: usize,
    pub industry_large: usize,
    pub industry_medium: usize,
    pub industry_small: usize,
    /// Records with either coordinate missing
    pub missing_coordinates: usize,
}

impl DatasetSummary {
    /// Columns that do not exist for the category count as zero
    pub fn of(batch: &NormalizedBatch) -> Self {
        let schema = CategorySchema::for_category(batch.category);
        let distinct = |column: &str| -> usize {
            let from_key = schema.key_column == column;
            let Some(position) = schema.position(column) else {
                return if from_key { batch.records.len() } else { 0 };
            };
            batch
                .records
                .iter()
                .filter_map(|r| r.values.get(position).and_then(FieldValue::as_str))
                .collect::<HashSet<_>>()
                .len()
        };

        let missing_coordinates = match (schema.position("lon"), schema.position("lat")) {
            (Some(lon), Some(lat)) => batch
                .records
                .iter()
                .filter(|r| r.values[lon].is_missing() || r.values[lat].is_missing())
                .count(),
            _ => 0,
        };

        Self {
            category: Some(batch.category),
            records: batch.records.len(),
            provinces: distinct("ctprvn_cd"),
            districts: distinct("signgu_cd"),
            industry_large: distinct("inds_lcls_cd"),
            industry_medium: distinct("inds_mcls_cd"),
            industry_small: distinct("inds_scls_cd"),
            missing_coordinates,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn raw(value: Value) -> RawRecord {
        RawRecord::try_from(value).unwrap()
    }

    fn store(id: &str, name: &str) -> RawRecord {
        raw(json!({
            "bizesId": id,
            "bizesNm": name,
            "indsLclsCd": "I2",
            "signguCd": "11680",
            "ctprvnCd": "11",
            "lon": "127.0473",
            "lat": 37.5172,
            "flrNo": "3",
        }))
    }

    #[test]
    fn test_coerces_declared_types() {
        let batch = normalize(Category::Stores, &[store(" MA01 ", "  Cafe  ")]);
        let record = &batch.records[0];

        assert_eq!(record.key, "MA01");
        assert_eq!(record.get("bizes_nm"), Some(&FieldValue::Text("Cafe".to_string())));
        assert_eq!(record.get("inds_lcls_cd"), Some(&FieldValue::Categorical("I2".to_string())));
        assert_eq!(record.get("lon"), Some(&FieldValue::Float(127.0473)));
        assert_eq!(record.get("lat"), Some(&FieldValue::Float(37.5172)));
        assert_eq!(record.get("flr_no"), Some(&FieldValue::Integer(3)));
        assert_eq!(record.get("brch_nm"), Some(&FieldValue::Missing));
        assert_eq!(record.values.len(), record.schema().fields.len());
    }

    #[test]
    fn test_unparsable_and_out_of_range_become_missing() {
        let batch = normalize(
            Category::Stores,
            &[raw(json!({
                "bizesId": "MA02",
                "lon": "east",
                "lat": 51.5,
                "flrNo": -1,
                "bldMnno": "B1",
            }))],
        );
        let record = &batch.records[0];

        assert!(record.get("lon").unwrap().is_missing());
        assert!(record.get("lat").unwrap().is_missing());
        assert!(record.get("flr_no").unwrap().is_missing());
        assert!(record.get("bld_mnno").unwrap().is_missing());
        assert_eq!(batch.stats.unparsable, 2);
        assert_eq!(batch.stats.out_of_range, 2);
    }

    #[test]
    fn test_records_without_key_are_rejected() {
        let batch = normalize(
            Category::Stores,
            &[
                raw(json!({ "bizesNm": "no id" })),
                raw(json!({ "bizesId": "   " })),
                raw(json!({ "bizesId": null })),
                store("MA03", "kept"),
            ],
        );
        assert_eq!(batch.stats.missing_key, 3);
        assert_eq!(batch.keys().collect::<Vec<_>>(), vec!["MA03"]);
    }

    #[test]
    fn test_duplicates_keep_last_record_at_first_position() {
        let batch = normalize(
            Category::Stores,
            &[
                store("A", "first"),
                store("B", "only"),
                store("A", "second"),
                store("C", "only"),
                store("A", "third"),
            ],
        );

        assert_eq!(batch.keys().collect::<Vec<_>>(), vec!["A", "B", "C"]);
        assert_eq!(batch.records[0].get("bizes_nm"), Some(&FieldValue::Text("third".to_string())));
        assert_eq!(batch.stats.duplicates, 2);
        assert_eq!(batch.stats.output, 3);
    }

    #[test]
    fn test_numeric_keys_and_booleans() {
        let batch = normalize(Category::Districts, &[raw(json!({ "signguCd": 11680, "signguNm": "강남구" }))]);
        assert_eq!(batch.records[0].key, "11680");

        assert_eq!(as_bool(&json!("Y")), Some(true));
        assert_eq!(as_bool(&json!("n")), Some(false));
        assert_eq!(as_bool(&json!(0)), Some(false));
        assert_eq!(as_bool(&json!("maybe")), None);
    }

    #[test]
    fn test_summary_counts_distinct_values() {
        let mut other = store("MA09", "elsewhere");
        other.insert("signguCd", json!("11650"));
        other.insert("lon", Value::Null);
        let batch = normalize(Category::Stores, &[store("MA01", "a"), store("MA02", "b"), other]);

        let summary = DatasetSummary::of(&batch);
        assert_eq!(summary.records, 3);
        assert_eq!(summary.provinces, 1);
        assert_eq!(summary.districts, 2);
        assert_eq!(summary.industry_large, 1);
        assert_eq!(summary.industry_small, 0);
        assert_eq!(summary.missing_coordinates, 1);

        let districts = normalize(Category::Districts, &[raw(json!({ "signguCd": "11680", "ctprvnCd": "11" }))]);
        let summary = DatasetSummary::of(&districts);
        assert_eq!(summary.districts, 1);
        assert_eq!(summary.missing_coordinates, 0);
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(|i| json!(i)),
            (-1000.0f64..1000.0).prop_map(|f| json!(f)),
            (120.0f64..135.0).prop_map(|f| json!(f.to_string())),
            "[ a-zA-Z0-9.-]{0,8}".prop_map(Value::String),
        ]
    }

    fn arb_store() -> impl Strategy<Value = RawRecord> {
        (
            prop::option::of("[A-D ]{0,2}"),
            arb_value(),
            arb_value(),
            arb_value(),
            arb_value(),
            arb_value(),
        )
            .prop_map(|(id, name, lon, lat, floor, industry)| {
                let mut record = RawRecord::default();
                if let Some(id) = id {
                    record.insert("bizesId", Value::String(id));
                }
                record.insert("bizesNm", name);
                record.insert("lon", lon);
                record.insert("lat", lat);
                record.insert("flrNo", floor);
                record.insert("indsLclsCd", industry);
                record
            })
    }

    proptest! {
        #[test]
        fn prop_keys_are_unique_and_non_empty(records in prop::collection::vec(arb_store(), 0..40)) {
            let batch = normalize(Category::Stores, &records);
            let keys: HashSet<&str> = batch.keys().collect();
            prop_assert_eq!(keys.len(), batch.records.len());
            prop_assert!(batch.keys().all(|k| !k.is_empty()));
            prop_assert_eq!(
                batch.stats.input,
                batch.stats.output + batch.stats.missing_key + batch.stats.duplicates
            );
        }

        #[test]
        fn prop_normalization_is_idempotent(records in prop::collection::vec(arb_store(), 0..40)) {
            let once = normalize(Category::Stores, &records);
            let raw_again: Vec<RawRecord> = once.records.iter().map(NormalizedRecord::to_raw).collect();
            let twice = normalize(Category::Stores, &raw_again);
            prop_assert_eq!(once.records, twice.records);
        }
    }
}
