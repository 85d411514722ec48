//! Listings Pipeline
//!
//! Moves public short-term-rental listing datasets from a web catalog
//! through object storage into a warehouse.
//!
//! # Components
//!
//! - [`discovery`]: region identifiers to dataset locations
//! - [`fetcher`]: HTTP retrieval with retry and a 24h result cache
//! - [`normalizer`]: coerces the listing text columns to UTF-8
//! - [`storage`]: gzip Parquet staging and object-store transfer
//! - [`warehouse`]: chunked, append-only loading
//! - [`orchestrator`]: the ingest and load pipelines and batch runs
//!
//! Pipelines are linear sequences of [`framework::Step`]s, each wrapped in
//! a [`framework::Task`] carrying its retry policy and, for the fetch, a
//! cache policy. Every run produces a [`framework::PipelineRun`] record.
//!
//! # Example
//!
//! ```no_run
//! use listings_pipeline::config::PipelineConfig;
//! use listings_pipeline::setup::{self, Components};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig::load(None)?;
//!     let components = Components { ingest: true, load: false };
//!     let orchestrator = setup::orchestrator(&config, components, CancellationToken::new()).await?;
//!
//!     let report = orchestrator.ingest(&["amsterdam".to_string()]).await?;
//!     println!("{} succeeded, {} failed", report.succeeded(), report.failed());
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod discovery;
pub mod error;
pub mod fetcher;
pub mod framework;
pub mod normalizer;
pub mod orchestrator;
pub mod setup;
pub mod steps;
pub mod storage;
pub mod table;
pub mod warehouse;

pub use error::{ErrorKind, PipelineError, Result};
pub use orchestrator::{BatchRunner, IngestPipeline, LoadPipeline, Orchestrator, Pipeline};
pub use table::{NormalizedTable, RawTable, Tabular};
