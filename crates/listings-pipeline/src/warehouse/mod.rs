//! Append-only loading of normalized tables into the warehouse

use crate::error::{PipelineError, Result};
use crate::table::{NormalizedTable, Tabular};
use arrow::datatypes::Schema;
use arrow::json::ArrayWriter;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub mod bigquery;

pub use bigquery::{BigQueryWarehouse, ServiceAccountConfig};

pub const DEFAULT_CHUNK_SIZE: usize = 500_000;

/// One warehouse row: column name to JSON value. Null cells are absent.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Fully qualified target table, `{project}.{dataset}.{table}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WarehouseTable {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl WarehouseTable {
    pub fn new(project: impl Into<String>, dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

impl std::fmt::Display for WarehouseTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

impl std::str::FromStr for WarehouseTable {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            [project, dataset, table] if parts.iter().all(|part| !part.is_empty()) => {
                Ok(Self::new(*project, *dataset, *table))
            }
            _ => Err(PipelineError::Config(format!(
                "warehouse table '{s}' is not of the form project.dataset.table"
            ))),
        }
    }
}

/// Backend accepting appended rows
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Create `target` with one column per field of `schema` unless it
    /// already exists. An existing table is left as it is.
    async fn ensure_table(&self, target: &WarehouseTable, schema: &Schema) -> Result<()>;

    async fn append(&self, target: &WarehouseTable, rows: Vec<Row>) -> Result<()>;

    fn describe(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub rows: usize,
    pub chunks: usize,
}

/// Splits tables into bounded chunks and appends them in order.
///
/// Writes are append-only: loading the same table twice stores its rows
/// twice.
pub struct WarehouseLoader {
    warehouse: Arc<dyn Warehouse>,
    chunk_size: usize,
}

impl WarehouseLoader {
    pub fn new(warehouse: Arc<dyn Warehouse>) -> Self {
        Self {
            warehouse,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[instrument(skip(self, table), fields(warehouse_table = %target, rows = table.num_rows()))]
    pub async fn append_rows(&self, table: &NormalizedTable, target: &WarehouseTable) -> Result<LoadSummary> {
        let batch = table.batch();
        let total = batch.num_rows();
        let mut chunks = 0;
        let mut offset = 0;

        self.warehouse.ensure_table(target, &table.schema()).await?;

        while offset < total {
            let length = self.chunk_size.min(total - offset);
            let rows = batch_to_rows(&batch.slice(offset, length))?;

            self.warehouse.append(target, rows).await?;
            chunks += 1;
            offset += length;
            debug!(chunk = chunks, written = offset, total, "Appended chunk");
        }

        info!(
            warehouse_table = %target,
            warehouse = %self.warehouse.describe(),
            rows = total,
            chunks,
            "Appended {} rows in {} chunks",
            total,
            chunks
        );

        Ok(LoadSummary { rows: total, chunks })
    }
}

/// Render a batch as JSON rows
pub fn batch_to_rows(batch: &RecordBatch) -> Result<Vec<Row>> {
    let mut writer = ArrayWriter::new(Vec::new());
    writer
        .write(batch)
        .map_err(|e| PipelineError::Load(format!("cannot encode rows: {e}")))?;
    writer
        .finish()
        .map_err(|e| PipelineError::Load(format!("cannot encode rows: {e}")))?;

    let json = writer.into_inner();
    if json.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_slice(&json).map_err(|e| PipelineError::Load(format!("cannot encode rows: {e}")))
}
