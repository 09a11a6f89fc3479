use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Result;
use crate::source::TrackRow;

pub mod parquet_sink;

pub use parquet_sink::ParquetSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Adds a new part file. Redelivery duplicates rows; only for write-once data.
    Append,
    /// Replaces every row under the partition, so repeated writes converge.
    ReplacePartition,
}

/// One `column=value` level of the partition path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    pub column: String,
    pub value: String,
}

impl PartitionKey {
    pub fn new(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.column, self.value)
    }
}

#[derive(Debug, Clone)]
pub struct WriteReceipt {
    pub file: Option<PathBuf>,
    pub rows: usize,
    /// Part files removed by a REPLACE_PARTITION write.
    pub replaced_files: usize,
}

/// Columnar dataset partitioned first by owning entity.
///
/// Writers for disjoint `(entity, partition)` pairs may run concurrently;
/// no coordination beyond the per-partition replace is needed.
#[async_trait]
pub trait PartitionedSink: Send + Sync {
    async fn write(
        &self,
        entity_key: &PartitionKey,
        partition_keys: &[PartitionKey],
        rows: &[TrackRow],
        mode: WriteMode,
    ) -> Result<WriteReceipt>;
}
