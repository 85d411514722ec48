//! Shared fixtures for pipeline integration tests
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use arrow::datatypes::Schema;
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use listings_pipeline::discovery::CatalogDiscoverer;
use listings_pipeline::fetcher::{CachedFetcher, HttpFetch};
use listings_pipeline::framework::{Backoff, FileResultStore, RetryPolicy, Task, TaskCache};
use listings_pipeline::normalizer::{SchemaNormalizer, LISTING_TEXT_COLUMNS};
use listings_pipeline::orchestrator::{BatchRunner, IngestPipeline, LoadPipeline, Orchestrator};
use listings_pipeline::steps::{AppendStep, GetObjectStep, NormalizeStep, PutObjectStep, ReadStagedStep};
use listings_pipeline::storage::{LocalObjectStore, ObjectStore, StagingArea, StorageWriter};
use listings_pipeline::warehouse::{Row, Warehouse, WarehouseLoader, WarehouseTable};
use listings_pipeline::Result;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CATALOG_PATH: &str = "/get-the-data/";

/// Warehouse keeping appended rows in memory
#[derive(Default)]
pub struct MemoryWarehouse {
    /// Tables with their column names, in creation order
    pub tables: Mutex<Vec<(WarehouseTable, Vec<String>)>>,
    pub appends: Mutex<Vec<(WarehouseTable, Vec<Row>)>>,
}

impl MemoryWarehouse {
    pub async fn total_rows(&self) -> usize {
        self.appends.lock().await.iter().map(|(_, rows)| rows.len()).sum()
    }

    pub async fn rows(&self) -> Vec<Row> {
        self.appends
            .lock()
            .await
            .iter()
            .flat_map(|(_, rows)| rows.iter().cloned())
            .collect()
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn ensure_table(&self, target: &WarehouseTable, schema: &Schema) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if !tables.iter().any(|(table, _)| table == target) {
            let columns = schema.fields().iter().map(|field| field.name().clone()).collect();
            tables.push((target.clone(), columns));
        }
        Ok(())
    }

    async fn append(&self, target: &WarehouseTable, rows: Vec<Row>) -> Result<()> {
        self.appends.lock().await.push((target.clone(), rows));
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// A listings CSV with every text column, an integer id first and a float
/// column last
pub fn listings_csv(ids: &[i64]) -> String {
    let mut header = vec!["id".to_string()];
    header.extend(LISTING_TEXT_COLUMNS.iter().map(|c| c.to_string()));
    header.push("reviews_per_month".to_string());

    let mut csv = header.join(",");
    csv.push('\n');

    for id in ids {
        let mut row = vec![id.to_string()];
        for column in LISTING_TEXT_COLUMNS {
            let value = match column {
                "host_response_rate" => "95".to_string(),
                "host_is_superhost" => "true".to_string(),
                "first_review" => "2023-01-05".to_string(),
                "price" => format!("{}.5", 100 + id),
                "host_about" => String::new(),
                other => format!("{other} {id}"),
            };
            row.push(value);
        }
        row.push(format!("{}.25", id));
        csv.push_str(&row.join(","));
        csv.push('\n');
    }
    csv
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Catalog page with one table per `(region, dataset path)`, in order
pub fn catalog_html(server_uri: &str, entries: &[(&str, &str)]) -> String {
    let mut html = String::from("<html><body>\n");
    for (region, dataset_path) in entries {
        html.push_str(&format!(
            "<table class=\"data table table-hover table-striped {region}\">\
             <tr><td><a href=\"{server_uri}{dataset_path}\">listings</a></td></tr></table>\n"
        ));
    }
    html.push_str("</body></html>");
    html
}

pub async fn mount_catalog(server: &MockServer, entries: &[(&str, &str)]) {
    Mock::given(method("GET"))
        .and(path(CATALOG_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(catalog_html(&server.uri(), entries)))
        .mount(server)
        .await;
}

pub async fn mount_dataset(server: &MockServer, dataset_path: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(dataset_path))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

pub fn quick_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        backoff: Backoff::None,
        attempt_timeout: Some(Duration::from_secs(10)),
    }
}

/// Everything a pipeline test touches, rooted in one temp dir
pub struct Harness {
    pub server: MockServer,
    pub dir: TempDir,
    pub warehouse: Arc<MemoryWarehouse>,
    pub target: WarehouseTable,
}

impl Harness {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
            dir: TempDir::new().unwrap(),
            warehouse: Arc::new(MemoryWarehouse::default()),
            target: WarehouseTable::new("test-project", "listings", "airbnb"),
        }
    }

    /// Prefix stripped from dataset URLs
    pub fn base_prefix(&self) -> String {
        format!("{}/", self.server.uri())
    }

    pub fn bucket(&self) -> PathBuf {
        self.dir.path().join("bucket")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    pub fn writer(&self) -> Arc<StorageWriter> {
        self.writer_with(Arc::new(LocalObjectStore::new(self.bucket())))
    }

    pub fn writer_with(&self, store: Arc<dyn ObjectStore>) -> Arc<StorageWriter> {
        Arc::new(StorageWriter::new(
            StagingArea::new(self.dir.path().join("staging"), "src"),
            store,
        ))
    }

    pub fn fetcher(&self) -> CachedFetcher {
        let cache = TaskCache::new(
            CachedFetcher::cache_policy(Duration::from_secs(24 * 60 * 60)),
            Arc::new(FileResultStore::new(self.cache_dir())),
        );
        CachedFetcher::new(HttpFetch::new(reqwest::Client::new()), quick_retry(), cache)
    }

    pub fn ingest_pipeline(&self) -> IngestPipeline {
        IngestPipeline::new(self.base_prefix(), self.fetcher(), Task::once(PutObjectStep::new(self.writer())))
    }

    pub fn load_pipeline(&self) -> LoadPipeline {
        self.load_pipeline_with(self.writer())
    }

    pub fn load_pipeline_with(&self, writer: Arc<StorageWriter>) -> LoadPipeline {
        let loader = WarehouseLoader::new(self.warehouse.clone()).with_chunk_size(2);
        LoadPipeline::new(
            self.base_prefix(),
            Task::new(GetObjectStep::new(writer.clone()), quick_retry()),
            Task::once(ReadStagedStep::new(writer)),
            Task::once(NormalizeStep::new(SchemaNormalizer::default())),
            Task::once(AppendStep::new(loader, self.target.clone())),
        )
    }

    pub fn runner(&self, cancel: CancellationToken) -> BatchRunner {
        let catalog = Url::parse(&format!("{}{CATALOG_PATH}", self.server.uri())).unwrap();
        BatchRunner::new(Arc::new(CatalogDiscoverer::new(reqwest::Client::new(), catalog)))
            .with_cancellation(cancel)
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(self.runner(CancellationToken::new()))
            .with_ingest(self.ingest_pipeline())
            .with_load(self.load_pipeline())
    }

    pub fn location(&self, dataset_path: &str) -> listings_common::SourceLocation {
        listings_common::SourceLocation::new(format!("{}{dataset_path}", self.server.uri()))
    }
}

/// Every file under `root`, relative to it
pub fn files_under(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path.strip_prefix(root).unwrap().to_path_buf());
            }
        }
    }
    files.sort();
    files
}
