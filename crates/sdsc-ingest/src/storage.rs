//! File snapshots of normalized datasets
//!
//! Each persisted category gets a row-oriented CSV file and a columnar
//! Parquet file, named `{category}_{YYYYmmddTHHMMSSZ}_{run8}.{csv|parquet}`.
//! Files are first written to hidden temp files in the target directory
//! ([`StagedSnapshot`]) and only renamed into place by
//! [`StagedSnapshot::publish`], so readers never see a half-written file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, NaiveDateTime, Utc};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sdsc_common::types::Category;

use crate::error::PersistError;
use crate::preprocess::{CategorySchema, FieldKind, FieldValue, NormalizedRecord};

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SnapshotFormat {
    Csv,
    Parquet,
}

impl SnapshotFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            SnapshotFormat::Csv => "csv",
            SnapshotFormat::Parquet => "parquet",
        }
    }

    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "csv" => Some(SnapshotFormat::Csv),
            "parquet" => Some(SnapshotFormat::Parquet),
            _ => None,
        }
    }
}

/// Final locations of a published snapshot pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotPaths {
    pub csv: PathBuf,
    pub parquet: PathBuf,
}

/// A snapshot file found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub category: Category,
    pub taken_at: DateTime<Utc>,
    /// First eight hex digits of the producing run id
    pub run_prefix: String,
    pub format: SnapshotFormat,
    pub path: PathBuf,
}

/// Written but not yet visible snapshot files. Dropping discards them.
#[derive(Debug)]
pub struct StagedSnapshot {
    csv: NamedTempFile,
    parquet: NamedTempFile,
    targets: SnapshotPaths,
}

impl StagedSnapshot {
    pub fn targets(&self) -> &SnapshotPaths {
        &self.targets
    }

    /// Rename both files into place. If the second rename fails the first
    /// is removed again.
    pub fn publish(self) -> Result<SnapshotPaths, PersistError> {
        let Self {
            csv,
            parquet,
            targets,
        } = self;

        csv.persist(&targets.csv).map_err(|e| PersistError::Io(e.error))?;
        if let Err(e) = parquet.persist(&targets.parquet) {
            remove_quietly(&targets.csv);
            return Err(PersistError::Io(e.error));
        }

        debug!(csv = %targets.csv.display(), parquet = %targets.parquet.display(), "Snapshot published");
        Ok(targets)
    }
}

/// Writes and lists snapshots under one directory
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(category: Category, taken_at: DateTime<Utc>, run_id: Uuid, format: SnapshotFormat) -> String {
        let run = run_id.simple().to_string();
        format!(
            "{}_{}_{}.{}",
            category.as_str(),
            taken_at.format(TIMESTAMP_FORMAT),
            &run[..8],
            format.extension()
        )
    }

    /// Write both snapshot files to temp files next to their targets
    pub fn stage(
        &self,
        category: Category,
        run_id: Uuid,
        taken_at: DateTime<Utc>,
        records: &[NormalizedRecord],
    ) -> Result<StagedSnapshot, PersistError> {
        std::fs::create_dir_all(&self.dir)?;
        let schema = CategorySchema::for_category(category);

        let targets = SnapshotPaths {
            csv: self
                .dir
                .join(Self::file_name(category, taken_at, run_id, SnapshotFormat::Csv)),
            parquet: self
                .dir
                .join(Self::file_name(category, taken_at, run_id, SnapshotFormat::Parquet)),
        };

        let mut csv = self.temp_file()?;
        write_csv(csv.as_file_mut(), schema, records)?;

        let mut parquet = self.temp_file()?;
        write_parquet(parquet.as_file_mut(), schema, records)?;

        debug!(
            category = %category,
            records = records.len(),
            csv = %targets.csv.display(),
            "Snapshot staged"
        );

        Ok(StagedSnapshot {
            csv,
            parquet,
            targets,
        })
    }

    /// Every snapshot in the directory, oldest first
    pub fn list_snapshots(&self) -> Result<Vec<SnapshotInfo>, PersistError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut snapshots = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if let Some(info) = parse_snapshot_path(&path) {
                snapshots.push(info);
            }
        }

        snapshots.sort_by(|a, b| {
            (a.taken_at, a.category, &a.run_prefix, a.format).cmp(&(b.taken_at, b.category, &b.run_prefix, b.format))
        });
        Ok(snapshots)
    }

    /// Most recent snapshot pair of a category
    pub fn latest_snapshot(&self, category: Category) -> Result<Option<SnapshotPaths>, PersistError> {
        let snapshots = self.list_snapshots()?;
        let latest = snapshots
            .iter()
            .rev()
            .find(|s| s.category == category && s.format == SnapshotFormat::Csv);

        Ok(latest.and_then(|csv| {
            let parquet = csv.path.with_extension(SnapshotFormat::Parquet.extension());
            parquet.exists().then(|| SnapshotPaths {
                csv: csv.path.clone(),
                parquet,
            })
        }))
    }

    /// Delete a published pair, used when the database commit fails after
    /// publishing
    pub fn remove(paths: &SnapshotPaths) {
        remove_quietly(&paths.csv);
        remove_quietly(&paths.parquet);
        info!(csv = %paths.csv.display(), "Published snapshot withdrawn");
    }

    fn temp_file(&self) -> Result<NamedTempFile, PersistError> {
        Ok(tempfile::Builder::new()
            .prefix(".staging-")
            .suffix(".tmp")
            .tempfile_in(&self.dir)?)
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove snapshot file");
        }
    }
}

fn parse_snapshot_path(path: &Path) -> Option<SnapshotInfo> {
    let format = SnapshotFormat::from_extension(path.extension()?.to_str()?)?;
    let stem = path.file_stem()?.to_str()?;

    let mut parts = stem.splitn(3, '_');
    let category: Category = parts.next()?.parse().ok()?;
    let timestamp = parts.next()?;
    let run_prefix = parts.next()?;
    if run_prefix.len() != 8 || !run_prefix.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let taken_at = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
        .ok()?
        .and_utc();

    Some(SnapshotInfo {
        category,
        taken_at,
        run_prefix: run_prefix.to_string(),
        format,
        path: path.to_path_buf(),
    })
}

fn write_csv(file: &mut std::fs::File, schema: &CategorySchema, records: &[NormalizedRecord]) -> Result<(), PersistError> {
    let mut writer = csv::Writer::from_writer(file);

    let mut header = Vec::with_capacity(schema.fields.len() + 1);
    header.push(schema.key_column);
    header.extend(schema.fields.iter().map(|f| f.column));
    writer.write_record(&header)?;

    for record in records {
        let mut row = Vec::with_capacity(record.values.len() + 1);
        row.push(record.key.clone());
        row.extend(record.values.iter().map(FieldValue::to_cell));
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}

fn arrow_type(kind: FieldKind) -> DataType {
    match kind {
        FieldKind::Text | FieldKind::Categorical => DataType::Utf8,
        FieldKind::Integer => DataType::Int64,
        FieldKind::Float => DataType::Float64,
        FieldKind::Boolean => DataType::Boolean,
    }
}

fn arrow_schema(schema: &CategorySchema) -> Schema {
    let mut fields = Vec::with_capacity(schema.fields.len() + 1);
    fields.push(Field::new(schema.key_column, DataType::Utf8, false));
    fields.extend(
        schema
            .fields
            .iter()
            .map(|f| Field::new(f.column, arrow_type(f.kind), true)),
    );
    Schema::new(fields)
}

fn column(kind: FieldKind, records: &[NormalizedRecord], index: usize) -> ArrayRef {
    let values = records.iter().map(|r| r.values.get(index));

    match kind {
        FieldKind::Text | FieldKind::Categorical => {
            let mut builder = StringBuilder::new();
            for value in values {
                builder.append_option(value.and_then(FieldValue::as_str));
            }
            Arc::new(builder.finish())
        },
        FieldKind::Integer => {
            let mut builder = Int64Builder::new();
            for value in values {
                builder.append_option(match value {
                    Some(FieldValue::Integer(i)) => Some(*i),
                    _ => None,
                });
            }
            Arc::new(builder.finish())
        },
        FieldKind::Float => {
            let mut builder = Float64Builder::new();
            for value in values {
                builder.append_option(match value {
                    Some(FieldValue::Float(f)) => Some(*f),
                    _ => None,
                });
            }
            Arc::new(builder.finish())
        },
        FieldKind::Boolean => {
            let mut builder = BooleanBuilder::new();
            for value in values {
                builder.append_option(match value {
                    Some(FieldValue::Boolean(b)) => Some(*b),
                    _ => None,
                });
            }
            Arc::new(builder.finish())
        },
    }
}

fn write_parquet(
    file: &mut std::fs::File,
    schema: &CategorySchema,
    records: &[NormalizedRecord],
) -> Result<(), PersistError> {
    let arrow_schema = Arc::new(arrow_schema(schema));

    let mut keys = StringBuilder::new();
    for record in records {
        keys.append_value(&record.key);
    }
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(schema.fields.len() + 1);
    columns.push(Arc::new(keys.finish()));
    columns.extend(
        schema
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| column(f.kind, records, i)),
    );

    let batch = RecordBatch::try_new(arrow_schema.clone(), columns)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let mut writer = ArrowWriter::try_new(file, arrow_schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::preprocess::normalize;
    use chrono::TimeZone;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use sdsc_common::types::RawRecord;
    use serde_json::json;
    use tempfile::TempDir;

    fn records() -> Vec<NormalizedRecord> {
        let raw: Vec<RawRecord> = vec![
            RawRecord::try_from(json!({ "bizesId": "MA01", "bizesNm": "Cafe", "lon": 127.05, "lat": 37.5, "flrNo": 2 }))
                .unwrap(),
            RawRecord::try_from(json!({ "bizesId": "MA02", "bizesNm": "Deli, Inc." })).unwrap(),
        ];
        normalize(Category::Stores, &raw).records
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_file_name_format() {
        let run_id = Uuid::parse_str("1a2b3c4d-0000-4000-8000-000000000000").unwrap();
        let name = SnapshotWriter::file_name(Category::Zones, at(), run_id, SnapshotFormat::Parquet);
        assert_eq!(name, "zones_20261018T093000Z_1a2b3c4d.parquet");
    }

    #[test]
    fn test_staged_files_are_invisible_until_published() {
        let dir = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(dir.path());

        let staged = writer.stage(Category::Stores, Uuid::new_v4(), at(), &records()).unwrap();
        assert!(writer.list_snapshots().unwrap().is_empty());
        assert!(!staged.targets().csv.exists());

        let paths = staged.publish().unwrap();
        assert!(paths.csv.exists());
        assert!(paths.parquet.exists());
        assert_eq!(writer.list_snapshots().unwrap().len(), 2);
        assert_eq!(writer.latest_snapshot(Category::Stores).unwrap(), Some(paths));
        assert_eq!(writer.latest_snapshot(Category::Zones).unwrap(), None);
    }

    #[test]
    fn test_dropped_stage_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(dir.path());

        let staged = writer.stage(Category::Stores, Uuid::new_v4(), at(), &records()).unwrap();
        drop(staged);

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_csv_and_parquet_contents() {
        let dir = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(dir.path());
        let paths = writer
            .stage(Category::Stores, Uuid::new_v4(), at(), &records())
            .unwrap()
            .publish()
            .unwrap();

        let mut reader = csv::Reader::from_path(&paths.csv).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "bizes_id");
        assert_eq!(&headers[1], "bizes_nm");
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[1][1], "Deli, Inc.");

        let file = std::fs::File::open(&paths.parquet).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(file).unwrap().build().unwrap();
        let total: usize = reader.map(|batch| batch.unwrap().num_rows()).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn test_latest_snapshot_picks_newest() {
        let dir = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(dir.path());
        let older = at();
        let newer = older + chrono::Duration::hours(1);

        writer.stage(Category::Stores, Uuid::new_v4(), older, &records()).unwrap().publish().unwrap();
        let expected = writer
            .stage(Category::Stores, Uuid::new_v4(), newer, &records())
            .unwrap()
            .publish()
            .unwrap();

        assert_eq!(writer.latest_snapshot(Category::Stores).unwrap(), Some(expected));
    }

    #[test]
    fn test_foreign_files_are_ignored() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.csv"), "x").unwrap();
        std::fs::write(dir.path().join("stores_latest_abc.csv"), "x").unwrap();
        assert!(SnapshotWriter::new(dir.path()).list_snapshots().unwrap().is_empty());
    }
}
