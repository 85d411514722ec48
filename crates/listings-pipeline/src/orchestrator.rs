//! Pipelines and batch execution
//!
//! Two pipelines run per dataset:
//!
//! - **ingest**: fetch, then put_object
//! - **load**: get_object, read_staged, normalize, then append_rows
//!
//! A batch discovers the datasets of some regions once and runs one
//! pipeline per location. Failures stay inside their [`PipelineRun`].

use crate::discovery::{CatalogDiscoverer, Discovery};
use crate::error::{PipelineError, Result};
use crate::fetcher::CachedFetcher;
use crate::framework::{BatchReport, ErrorRecord, PipelineKind, PipelineRun, Task};
use crate::steps::{AppendStep, GetObjectStep, NormalizeStep, PutObjectStep, ReadStagedStep, StageRequest};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use listings_common::{DatasetReference, SourceLocation};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Runs one task and records it; a failure ends the pipeline run
macro_rules! run_task {
    ($run:ident, $task:expr, $input:expr) => {
        match $task.run($input).await.record_into(&mut $run) {
            Ok(output) => output,
            Err(e) => return $run.fail(&e),
        }
    };
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    fn kind(&self) -> PipelineKind;

    /// Run every step for one dataset. Never fails: errors are recorded.
    async fn run(&self, location: &SourceLocation) -> PipelineRun;
}

fn dataset_for(location: &SourceLocation, base_prefix: &str) -> Result<DatasetReference> {
    let dataset = DatasetReference::from_location(location, base_prefix);
    if dataset.is_empty() {
        return Err(PipelineError::InvalidLocation(format!(
            "no dataset path in '{location}'"
        )));
    }
    Ok(dataset)
}

/// Source to object store
pub struct IngestPipeline {
    base_prefix: String,
    fetcher: CachedFetcher,
    put: Task<PutObjectStep>,
}

impl IngestPipeline {
    pub fn new(base_prefix: impl Into<String>, fetcher: CachedFetcher, put: Task<PutObjectStep>) -> Self {
        Self {
            base_prefix: base_prefix.into(),
            fetcher,
            put,
        }
    }
}

#[async_trait]
impl Pipeline for IngestPipeline {
    fn kind(&self) -> PipelineKind {
        PipelineKind::Ingest
    }

    async fn run(&self, location: &SourceLocation) -> PipelineRun {
        let mut run = PipelineRun::start(PipelineKind::Ingest, location.clone());
        let dataset = match dataset_for(location, &self.base_prefix) {
            Ok(dataset) => dataset,
            Err(e) => return run.fail(&e),
        };
        run.dataset = Some(dataset.clone());

        let table = match self.fetcher.fetch_recorded(location).await.record_into(&mut run) {
            Ok(table) => table,
            Err(e) => return run.fail(&e),
        };

        let request = StageRequest { dataset, table };
        let staged = run_task!(run, self.put, &request);
        debug!(key = %staged.key, checksum = staged.checksum.short(), "Ingest complete");

        run.finish()
    }
}

/// Object store to warehouse
pub struct LoadPipeline {
    base_prefix: String,
    get: Task<GetObjectStep>,
    read: Task<ReadStagedStep>,
    normalize: Task<NormalizeStep>,
    append: Task<AppendStep>,
}

impl LoadPipeline {
    pub fn new(
        base_prefix: impl Into<String>,
        get: Task<GetObjectStep>,
        read: Task<ReadStagedStep>,
        normalize: Task<NormalizeStep>,
        append: Task<AppendStep>,
    ) -> Self {
        Self {
            base_prefix: base_prefix.into(),
            get,
            read,
            normalize,
            append,
        }
    }
}

#[async_trait]
impl Pipeline for LoadPipeline {
    fn kind(&self) -> PipelineKind {
        PipelineKind::Load
    }

    async fn run(&self, location: &SourceLocation) -> PipelineRun {
        let mut run = PipelineRun::start(PipelineKind::Load, location.clone());
        let dataset = match dataset_for(location, &self.base_prefix) {
            Ok(dataset) => dataset,
            Err(e) => return run.fail(&e),
        };
        run.dataset = Some(dataset.clone());

        let path = run_task!(run, self.get, &dataset);
        let raw = run_task!(run, self.read, &path);
        let normalized = run_task!(run, self.normalize, &raw);
        let summary = run_task!(run, self.append, &normalized);
        debug!(
            warehouse_table = %self.append.step().target(),
            rows = summary.rows,
            chunks = summary.chunks,
            "Load complete"
        );

        run.finish()
    }
}

/// Runs one pipeline per discovered dataset
pub struct BatchRunner {
    discoverer: Arc<CatalogDiscoverer>,
    concurrency: usize,
    cancel: CancellationToken,
}

impl BatchRunner {
    pub fn new(discoverer: Arc<CatalogDiscoverer>) -> Self {
        Self {
            discoverer,
            concurrency: 1,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn discover(&self, regions: &[String]) -> Discovery {
        self.discoverer.discover(regions).await
    }

    /// Discover the datasets of `regions` and run `pipeline` for each.
    ///
    /// Runs start in discovery order, at most `concurrency` at a time, and
    /// are reported in that order. Once the token is cancelled no new run
    /// starts; the remaining locations are reported as skipped.
    pub async fn run<P: Pipeline + ?Sized>(&self, pipeline: &P, regions: &[String]) -> BatchReport {
        let kind = pipeline.kind();
        let mut discovery = self.discover(regions).await;
        let discovery_warnings: Vec<ErrorRecord> =
            discovery.take_warnings().iter().map(ErrorRecord::from).collect();

        info!(pipeline = %kind, datasets = discovery.len(), "Starting batch for {} regions", regions.len());

        let cancel = &self.cancel;
        let outcomes: Vec<std::result::Result<PipelineRun, SourceLocation>> = stream::iter(discovery)
            .map(|location| async move {
                if cancel.is_cancelled() {
                    return Err(location);
                }
                info!(pipeline = %kind, location = %location, "Running pipeline");
                let run = pipeline.run(&location).await;
                log_run(&run);
                Ok(run)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut report = BatchReport {
            discovery_warnings,
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                Ok(run) => report.runs.push(run),
                Err(location) => report.skipped.push(location),
            }
        }

        if !report.skipped.is_empty() {
            warn!(skipped = report.skipped.len(), "Batch cancelled before every dataset started");
        }
        info!(
            "Batch completed: {} succeeded, {} failed, {} skipped",
            report.succeeded(),
            report.failed(),
            report.skipped.len()
        );

        report
    }
}

fn log_run(run: &PipelineRun) {
    match &run.error {
        None => info!(pipeline = %run.kind, dataset = %run.label(), "✓ {} succeeded", run.label()),
        Some(err) => error!(
            pipeline = %run.kind,
            dataset = %run.label(),
            error_kind = %err.kind,
            "✗ {} failed: {}",
            run.label(),
            err.message
        ),
    }
}

/// Entry points over both pipelines.
///
/// Either pipeline may be absent when the process only needs the other;
/// calling an entry point of a missing pipeline is a configuration error.
pub struct Orchestrator {
    runner: BatchRunner,
    ingest: Option<IngestPipeline>,
    load: Option<LoadPipeline>,
}

impl Orchestrator {
    pub fn new(runner: BatchRunner) -> Self {
        Self {
            runner,
            ingest: None,
            load: None,
        }
    }

    pub fn with_ingest(mut self, pipeline: IngestPipeline) -> Self {
        self.ingest = Some(pipeline);
        self
    }

    pub fn with_load(mut self, pipeline: LoadPipeline) -> Self {
        self.load = Some(pipeline);
        self
    }

    pub fn runner(&self) -> &BatchRunner {
        &self.runner
    }

    pub async fn discover(&self, regions: &[String]) -> Discovery {
        self.runner.discover(regions).await
    }

    /// Source to object store for every dataset of `regions`
    pub async fn ingest(&self, regions: &[String]) -> Result<BatchReport> {
        Ok(self.runner.run(self.ingest_pipeline()?, regions).await)
    }

    pub async fn ingest_one(&self, location: &SourceLocation) -> Result<PipelineRun> {
        let run = self.ingest_pipeline()?.run(location).await;
        log_run(&run);
        Ok(run)
    }

    /// Object store to warehouse for every dataset of `regions`
    pub async fn load_regions(&self, regions: &[String]) -> Result<BatchReport> {
        Ok(self.runner.run(self.load_pipeline()?, regions).await)
    }

    pub async fn load(&self, location: &SourceLocation) -> Result<PipelineRun> {
        let run = self.load_pipeline()?.run(location).await;
        log_run(&run);
        Ok(run)
    }

    fn ingest_pipeline(&self) -> Result<&IngestPipeline> {
        self.ingest
            .as_ref()
            .ok_or_else(|| PipelineError::Config("ingest pipeline not configured".to_string()))
    }

    fn load_pipeline(&self) -> Result<&LoadPipeline> {
        self.load
            .as_ref()
            .ok_or_else(|| PipelineError::Config("load pipeline not configured".to_string()))
    }
}
