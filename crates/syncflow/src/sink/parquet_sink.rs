//! Hive-layout Parquet dataset on a local or mounted filesystem.
//!
//! Layout: `root/<entity>=<v>/<key>=<v>/.../part-<uuid>.parquet`. Partition
//! columns live in the path only, as external query engines expect.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Int64Array, ListArray, ListBuilder, StringArray, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::sink::{PartitionKey, PartitionedSink, WriteMode, WriteReceipt};
use crate::source::TrackRow;

const PART_PREFIX: &str = "part-";
const PART_SUFFIX: &str = ".parquet";
/// The single file a REPLACE_PARTITION write owns. Concurrent replaces of the
/// same partition race on one rename target, so the last one wins whole.
const REPLACE_PART: &str = "part-00000.parquet";

fn tracks_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("track_id", DataType::Utf8, false),
        Field::new("track_name", DataType::Utf8, false),
        Field::new("track_type", DataType::Utf8, false),
        Field::new("duration_ms", DataType::Int64, false),
        Field::new("track_number", DataType::Int64, false),
        Field::new(
            "available_markets",
            DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
            false,
        ),
        Field::new("popularity", DataType::Int64, false),
        Field::new("album_id", DataType::Utf8, false),
        Field::new("album_name", DataType::Utf8, false),
        Field::new("album_type", DataType::Utf8, false),
        Field::new("album_release_date", DataType::Utf8, false),
        Field::new("added_at", DataType::Utf8, false),
    ]))
}

fn utf8<'a>(rows: &'a [TrackRow], f: impl Fn(&'a TrackRow) -> &'a str) -> ArrayRef {
    Arc::new(StringArray::from_iter_values(rows.iter().map(f)))
}

fn int64(rows: &[TrackRow], f: impl Fn(&TrackRow) -> i64) -> ArrayRef {
    Arc::new(Int64Array::from_iter_values(rows.iter().map(f)))
}

fn to_batch(rows: &[TrackRow]) -> Result<RecordBatch> {
    let mut markets = ListBuilder::new(StringBuilder::new());
    for row in rows {
        for m in &row.available_markets {
            markets.values().append_value(m);
        }
        markets.append(true);
    }

    let columns: Vec<ArrayRef> = vec![
        utf8(rows, |r| r.track_id.as_str()),
        utf8(rows, |r| r.track_name.as_str()),
        utf8(rows, |r| r.track_type.as_str()),
        int64(rows, |r| r.duration_ms),
        int64(rows, |r| r.track_number),
        Arc::new(markets.finish()),
        int64(rows, |r| r.popularity),
        utf8(rows, |r| r.album_id.as_str()),
        utf8(rows, |r| r.album_name.as_str()),
        utf8(rows, |r| r.album_type.as_str()),
        utf8(rows, |r| r.album_release_date.as_str()),
        utf8(rows, |r| r.added_at.as_str()),
    ];

    Ok(RecordBatch::try_new(tracks_schema(), columns)?)
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| SyncError::StoreUnavailable(format!("column `{name}` missing or mistyped")))
}

fn from_batch(batch: &RecordBatch) -> Result<Vec<TrackRow>> {
    let track_id = column::<StringArray>(batch, "track_id")?;
    let track_name = column::<StringArray>(batch, "track_name")?;
    let track_type = column::<StringArray>(batch, "track_type")?;
    let duration_ms = column::<Int64Array>(batch, "duration_ms")?;
    let track_number = column::<Int64Array>(batch, "track_number")?;
    let markets = column::<ListArray>(batch, "available_markets")?;
    let popularity = column::<Int64Array>(batch, "popularity")?;
    let album_id = column::<StringArray>(batch, "album_id")?;
    let album_name = column::<StringArray>(batch, "album_name")?;
    let album_type = column::<StringArray>(batch, "album_type")?;
    let album_release_date = column::<StringArray>(batch, "album_release_date")?;
    let added_at = column::<StringArray>(batch, "added_at")?;

    (0..batch.num_rows())
        .map(|i| {
            let values = markets.value(i);
            let values = values
                .as_any()
                .downcast_ref::<StringArray>()
                .ok_or_else(|| SyncError::StoreUnavailable("market list is not utf8".into()))?;
            Ok(TrackRow {
                track_id: track_id.value(i).to_string(),
                track_name: track_name.value(i).to_string(),
                track_type: track_type.value(i).to_string(),
                duration_ms: duration_ms.value(i),
                track_number: track_number.value(i),
                available_markets: values.iter().flatten().map(str::to_string).collect(),
                popularity: popularity.value(i),
                album_id: album_id.value(i).to_string(),
                album_name: album_name.value(i).to_string(),
                album_type: album_type.value(i).to_string(),
                album_release_date: album_release_date.value(i).to_string(),
                added_at: added_at.value(i).to_string(),
            })
        })
        .collect()
}

/// Keeps `[A-Za-z0-9_-]`, percent-encodes the rest so a value can never
/// climb out of its directory or collide with the `=` separator.
pub fn escape_partition_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

fn is_part_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(PART_PREFIX) && n.ends_with(PART_SUFFIX))
        .unwrap_or(false)
}

fn part_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_part_file(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

// Written under a hidden temp name, then renamed onto `name`. The rename
// replaces any file already there in one step.
fn write_part(dir: &Path, name: &str, rows: &[TrackRow]) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;

    let tmp = dir.join(format!(".{}.parquet.tmp", Uuid::new_v4()));
    let dest = dir.join(name);

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let file = File::create(&tmp)?;
    let mut writer = ArrowWriter::try_new(file, tracks_schema(), Some(props))?;
    if !rows.is_empty() {
        writer.write(&to_batch(rows)?)?;
    }
    let file = writer.into_inner()?;
    file.sync_all()?;

    fs::rename(&tmp, &dest)?;
    Ok(dest)
}

fn read_part(path: &Path) -> Result<Vec<TrackRow>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?.build()?;
    let mut rows = Vec::new();
    for batch in reader {
        rows.extend(from_batch(&batch?)?);
    }
    Ok(rows)
}

fn collect_leaf_partitions(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let mut has_parts = false;
    let mut children = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            children.push(path);
        } else if is_part_file(&path) {
            has_parts = true;
        }
    }
    if has_parts {
        out.push(dir.to_path_buf());
    }
    children.sort();
    for child in children {
        collect_leaf_partitions(&child, out)?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ParquetSink {
    root: PathBuf,
}

impl ParquetSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn partition_dir(&self, entity_key: &PartitionKey, partition_keys: &[PartitionKey]) -> PathBuf {
        std::iter::once(entity_key)
            .chain(partition_keys)
            .fold(self.root.clone(), |dir, key| {
                dir.join(format!("{}={}", key.column, escape_partition_value(&key.value)))
            })
    }

    /// Rows currently visible under one partition, part files in name order.
    pub async fn read_partition(
        &self,
        entity_key: &PartitionKey,
        partition_keys: &[PartitionKey],
    ) -> Result<Vec<TrackRow>> {
        let dir = self.partition_dir(entity_key, partition_keys);
        tokio::task::spawn_blocking(move || {
            let mut rows = Vec::new();
            for part in part_files(&dir)? {
                rows.extend(read_part(&part)?);
            }
            Ok(rows)
        })
        .await?
    }

    /// Leaf partition directories (those holding part files) under an entity.
    pub async fn list_partitions(&self, entity_key: &PartitionKey) -> Result<Vec<PathBuf>> {
        let dir = self.partition_dir(entity_key, &[]);
        tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            if dir.exists() {
                collect_leaf_partitions(&dir, &mut out)?;
            }
            Ok(out)
        })
        .await?
    }
}

#[async_trait]
impl PartitionedSink for ParquetSink {
    async fn write(
        &self,
        entity_key: &PartitionKey,
        partition_keys: &[PartitionKey],
        rows: &[TrackRow],
        mode: WriteMode,
    ) -> Result<WriteReceipt> {
        if mode == WriteMode::Append && rows.is_empty() {
            return Ok(WriteReceipt {
                file: None,
                rows: 0,
                replaced_files: 0,
            });
        }

        let dir = self.partition_dir(entity_key, partition_keys);
        let rows = rows.to_vec();

        tokio::task::spawn_blocking(move || {
            let (file, replaced) = match mode {
                WriteMode::Append => {
                    let name = format!("{PART_PREFIX}{}{PART_SUFFIX}", Uuid::new_v4());
                    (write_part(&dir, &name, &rows)?, 0)
                }
                WriteMode::ReplacePartition => {
                    let file = write_part(&dir, REPLACE_PART, &rows)?;
                    let mut removed = 0;
                    for old in part_files(&dir)? {
                        if old == file {
                            continue;
                        }
                        match fs::remove_file(&old) {
                            Ok(()) => removed += 1,
                            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                            Err(e) => return Err(e.into()),
                        }
                    }
                    (file, removed)
                }
            };

            debug!(
                partition = %dir.display(),
                rows = rows.len(),
                replaced,
                "partition written"
            );

            Ok(WriteReceipt {
                file: Some(file),
                rows: rows.len(),
                replaced_files: replaced,
            })
        })
        .await?
    }
}
