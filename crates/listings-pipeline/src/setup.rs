//! Wiring of pipeline components from a [`PipelineConfig`]

use crate::config::PipelineConfig;
use crate::discovery::CatalogDiscoverer;
use crate::error::Result;
use crate::fetcher::{CachedFetcher, HttpFetch};
use crate::framework::{FileResultStore, Task, TaskCache};
use crate::normalizer::SchemaNormalizer;
use crate::orchestrator::{BatchRunner, IngestPipeline, LoadPipeline, Orchestrator};
use crate::steps::{AppendStep, GetObjectStep, NormalizeStep, PutObjectStep, ReadStagedStep};
use crate::storage::{StagingArea, StorageWriter};
use crate::warehouse::{BigQueryWarehouse, WarehouseLoader};
use reqwest::Client;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Which pipelines a process needs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Components {
    pub ingest: bool,
    pub load: bool,
}

pub fn http_client(config: &PipelineConfig) -> Result<Client> {
    config.catalog.headers.client(config.http_timeout())
}

pub fn discoverer(config: &PipelineConfig, client: Client) -> Result<CatalogDiscoverer> {
    Ok(CatalogDiscoverer::new(client, config.catalog_url()?)
        .with_table_class_template(config.catalog.table_class_template.clone()))
}

pub async fn storage_writer(config: &PipelineConfig) -> Result<Arc<StorageWriter>> {
    let store = config.storage_block()?.open().await?;
    info!(block = %config.storage.block, store = %store.describe(), "Opened storage block");

    let staging = StagingArea::new(&config.staging.root, &config.staging.key_prefix);
    Ok(Arc::new(StorageWriter::new(staging, store)))
}

pub fn fetcher(config: &PipelineConfig, client: Client) -> CachedFetcher {
    let cache = TaskCache::new(
        CachedFetcher::cache_policy(config.cache_ttl()),
        Arc::new(FileResultStore::new(&config.fetch.cache_dir)),
    );
    CachedFetcher::new(HttpFetch::new(client), config.retry_policy(), cache)
}

pub fn ingest_pipeline(config: &PipelineConfig, client: Client, writer: Arc<StorageWriter>) -> IngestPipeline {
    IngestPipeline::new(
        config.catalog.dataset_base_url.clone(),
        fetcher(config, client),
        Task::once(PutObjectStep::new(writer)),
    )
}

pub async fn load_pipeline(config: &PipelineConfig, writer: Arc<StorageWriter>) -> Result<LoadPipeline> {
    config.validate_load()?;
    let warehouse = BigQueryWarehouse::connect(config.service_account()?).await?;
    let loader = WarehouseLoader::new(Arc::new(warehouse)).with_chunk_size(config.warehouse.chunk_size);

    Ok(LoadPipeline::new(
        config.catalog.dataset_base_url.clone(),
        Task::new(GetObjectStep::new(writer.clone()), config.retry_policy()),
        Task::once(ReadStagedStep::new(writer)),
        Task::once(NormalizeStep::new(SchemaNormalizer::new(config.normalize.text_columns.clone()))),
        Task::once(AppendStep::new(loader, config.warehouse_table()?)),
    ))
}

/// Build an orchestrator with the requested pipelines
pub async fn orchestrator(
    config: &PipelineConfig,
    components: Components,
    cancel: CancellationToken,
) -> Result<Orchestrator> {
    let client = http_client(config)?;
    let runner = BatchRunner::new(Arc::new(discoverer(config, client.clone())?))
        .with_concurrency(config.batch.concurrency)
        .with_cancellation(cancel);
    let mut orchestrator = Orchestrator::new(runner);

    if components.ingest || components.load {
        let writer = storage_writer(config).await?;
        if components.ingest {
            orchestrator = orchestrator.with_ingest(ingest_pipeline(config, client, writer.clone()));
        }
        if components.load {
            orchestrator = orchestrator.with_load(load_pipeline(config, writer).await?);
        }
    }

    Ok(orchestrator)
}
