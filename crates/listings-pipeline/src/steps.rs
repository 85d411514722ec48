//! Pipeline steps over storage, normalization and the warehouse

use crate::error::Result;
use crate::framework::Step;
use crate::normalizer::SchemaNormalizer;
use crate::storage::{StagedObject, StorageWriter};
use crate::table::{NormalizedTable, RawTable};
use crate::warehouse::{LoadSummary, WarehouseLoader, WarehouseTable};
use async_trait::async_trait;
use listings_common::DatasetReference;
use std::path::PathBuf;
use std::sync::Arc;

/// A fetched table and the dataset it belongs to
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub dataset: DatasetReference,
    pub table: RawTable,
}

pub struct PutObjectStep {
    writer: Arc<StorageWriter>,
}

impl PutObjectStep {
    pub fn new(writer: Arc<StorageWriter>) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl Step for PutObjectStep {
    type Input = StageRequest;
    type Output = StagedObject;

    fn name(&self) -> &'static str {
        "put_object"
    }

    async fn execute(&self, request: &StageRequest) -> Result<StagedObject> {
        self.writer.put_object(&request.table, &request.dataset).await
    }
}

pub struct GetObjectStep {
    writer: Arc<StorageWriter>,
}

impl GetObjectStep {
    pub fn new(writer: Arc<StorageWriter>) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl Step for GetObjectStep {
    type Input = DatasetReference;
    type Output = PathBuf;

    fn name(&self) -> &'static str {
        "get_object"
    }

    async fn execute(&self, dataset: &DatasetReference) -> Result<PathBuf> {
        self.writer.get_object(dataset).await
    }
}

pub struct ReadStagedStep {
    writer: Arc<StorageWriter>,
}

impl ReadStagedStep {
    pub fn new(writer: Arc<StorageWriter>) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl Step for ReadStagedStep {
    type Input = PathBuf;
    type Output = RawTable;

    fn name(&self) -> &'static str {
        "read_staged"
    }

    async fn execute(&self, path: &PathBuf) -> Result<RawTable> {
        self.writer.read_staged(path).await
    }
}

pub struct NormalizeStep {
    normalizer: SchemaNormalizer,
}

impl NormalizeStep {
    pub fn new(normalizer: SchemaNormalizer) -> Self {
        Self { normalizer }
    }
}

#[async_trait]
impl Step for NormalizeStep {
    type Input = RawTable;
    type Output = NormalizedTable;

    fn name(&self) -> &'static str {
        "normalize"
    }

    async fn execute(&self, table: &RawTable) -> Result<NormalizedTable> {
        self.normalizer.normalize(table)
    }
}

pub struct AppendStep {
    loader: WarehouseLoader,
    target: WarehouseTable,
}

impl AppendStep {
    pub fn new(loader: WarehouseLoader, target: WarehouseTable) -> Self {
        Self { loader, target }
    }

    pub fn target(&self) -> &WarehouseTable {
        &self.target
    }
}

#[async_trait]
impl Step for AppendStep {
    type Input = NormalizedTable;
    type Output = LoadSummary;

    fn name(&self) -> &'static str {
        "append_rows"
    }

    async fn execute(&self, table: &NormalizedTable) -> Result<LoadSummary> {
        self.loader.append_rows(table, &self.target).await
    }
}
