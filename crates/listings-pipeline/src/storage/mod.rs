//! Staging and object storage of datasets
//!
//! Tables are staged as gzip-compressed Parquet files named after their
//! [`DatasetReference`] and mirrored into an [`ObjectStore`] under the same
//! name. Writing the same dataset twice overwrites both copies.

use crate::error::{PipelineError, Result};
use crate::table::{RawTable, Tabular};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use listings_common::{DatasetReference, Fingerprint};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel};
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub mod local;
pub mod s3;

pub use local::LocalObjectStore;
pub use s3::{S3BlockConfig, S3ObjectStore};

/// Blob storage addressed by string keys
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Copy the file at `local_path` to `key`, replacing any existing object
    async fn upload(&self, local_path: &Path, key: &str) -> Result<()>;

    /// Copy object `key` to `local_path`; [`PipelineError::NotFound`] if absent
    async fn download(&self, key: &str, local_path: &Path) -> Result<()>;

    /// Human-readable location for logs
    fn describe(&self) -> String;
}

/// A named object-store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageBlock {
    S3(S3BlockConfig),
    Local { root: PathBuf },
}

impl StorageBlock {
    pub async fn open(&self) -> Result<Arc<dyn ObjectStore>> {
        Ok(match self {
            StorageBlock::S3(config) => Arc::new(S3ObjectStore::connect(config).await?),
            StorageBlock::Local { root } => Arc::new(LocalObjectStore::new(root.clone())),
        })
    }
}

/// Local directory holding staged Parquet files, and the key layout they
/// are mirrored under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingArea {
    root: PathBuf,
    key_prefix: String,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>, key_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            key_prefix: key_prefix.into().trim_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn local_path(&self, dataset: &DatasetReference) -> PathBuf {
        self.root.join(format!("{dataset}.parquet"))
    }

    pub fn object_key(&self, dataset: &DatasetReference) -> String {
        if self.key_prefix.is_empty() {
            format!("{dataset}.parquet")
        } else {
            format!("{}/{dataset}.parquet", self.key_prefix)
        }
    }
}

/// Where a dataset was staged
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StagedObject {
    pub local_path: PathBuf,
    pub key: String,
    pub checksum: Fingerprint,
    pub size: u64,
}

pub struct StorageWriter {
    staging: StagingArea,
    store: Arc<dyn ObjectStore>,
}

impl StorageWriter {
    pub fn new(staging: StagingArea, store: Arc<dyn ObjectStore>) -> Self {
        Self { staging, store }
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// Stage `table` as Parquet and upload it under the dataset key
    #[instrument(skip(self, table), fields(dataset = %dataset))]
    pub async fn put_object<T: Tabular>(&self, table: &T, dataset: &DatasetReference) -> Result<StagedObject> {
        let local_path = self.staging.local_path(dataset);
        let key = self.staging.object_key(dataset);

        let batch = table.batch().clone();
        let path = local_path.clone();
        tokio::task::spawn_blocking(move || write_parquet(&path, &batch)).await??;

        let checksum = Fingerprint::of_file(&local_path)?;
        let size = tokio::fs::metadata(&local_path).await?.len();
        debug!(path = %local_path.display(), size, checksum = checksum.short(), "Staged dataset");

        self.store.upload(&local_path, &key).await?;
        info!(key = %key, store = %self.store.describe(), rows = table.num_rows(), "Stored dataset");

        Ok(StagedObject {
            local_path,
            key,
            checksum,
            size,
        })
    }

    /// Download the staged object for `dataset` into the staging area.
    ///
    /// One attempt; callers wrap it in a retry policy.
    #[instrument(skip(self), fields(dataset = %dataset))]
    pub async fn get_object(&self, dataset: &DatasetReference) -> Result<PathBuf> {
        let key = self.staging.object_key(dataset);
        let local_path = self.staging.local_path(dataset);

        self.store.download(&key, &local_path).await?;
        info!(key = %key, path = %local_path.display(), "Retrieved dataset");
        Ok(local_path)
    }

    /// Read a staged Parquet file back into memory
    pub async fn read_staged(&self, path: &Path) -> Result<RawTable> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || read_parquet(&path)).await?
    }
}

/// Write `batch` as gzip Parquet, replacing `path` atomically
pub fn write_parquet(path: &Path, batch: &RecordBatch) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let props = WriterProperties::builder()
        .set_compression(Compression::GZIP(GzipLevel::default()))
        .build();

    let tmp = path.with_extension("parquet.tmp");
    let file = File::create(&tmp)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;

    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_parquet(path: &Path) -> Result<RawTable> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let batches = builder
        .build()?
        .collect::<std::result::Result<Vec<RecordBatch>, _>>()
        .map_err(|e| PipelineError::Format(format!("unreadable parquet {}: {e}", path.display())))?;

    Ok(RawTable::new(arrow::compute::concat_batches(&schema, &batches)?))
}

async fn write_file_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".part");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
