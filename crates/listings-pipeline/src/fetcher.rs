//! Dataset retrieval with retry and memoization

use crate::error::{PipelineError, Result};
use crate::framework::{CachePolicy, CachedTask, RetryPolicy, Step, Task, TaskCache, TaskResult};
use crate::table::RawTable;
use arrow::csv::{reader::Format, ReaderBuilder};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use flate2::read::MultiGzDecoder;
use listings_common::{Fingerprint, SourceLocation};
use reqwest::Client;
use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Default lifetime of a cached fetch
pub const DEFAULT_FETCH_TTL: Duration = Duration::from_secs(24 * 60 * 60);

const CSV_BATCH_SIZE: usize = 8192;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Single HTTP GET of a dataset, decoded into a [`RawTable`]
pub struct HttpFetch {
    client: Client,
}

impl HttpFetch {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Step for HttpFetch {
    type Input = SourceLocation;
    type Output = RawTable;

    fn name(&self) -> &'static str {
        "fetch"
    }

    async fn execute(&self, location: &SourceLocation) -> Result<RawTable> {
        debug!(location = %location, "Downloading dataset");

        let response = self.client.get(location.as_str()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Retrieval(format!("HTTP {status} from {location}")));
        }

        let body = response.bytes().await?;
        info!(location = %location, bytes = body.len(), "Downloaded dataset");

        let location = location.clone();
        tokio::task::spawn_blocking(move || decode_payload(location.as_str(), &body)).await?
    }
}

/// Parse a CSV payload with a header row, gunzipping it first when needed
pub fn decode_payload(location: &str, payload: &[u8]) -> Result<RawTable> {
    let data = if payload.starts_with(&GZIP_MAGIC) {
        let mut decoded = Vec::with_capacity(payload.len() * 4);
        MultiGzDecoder::new(payload)
            .read_to_end(&mut decoded)
            .map_err(|e| PipelineError::Format(format!("invalid gzip payload from {location}: {e}")))?;
        decoded
    } else {
        if location.ends_with(".gz") {
            debug!(location, "Payload already inflated by transport");
        }
        payload.to_vec()
    };

    if data.iter().all(u8::is_ascii_whitespace) {
        return Err(PipelineError::Format(format!("empty payload from {location}")));
    }

    let format = Format::default().with_header(true);
    let (schema, _) = format
        .infer_schema(Cursor::new(&data), None)
        .map_err(|e| PipelineError::Format(format!("not a CSV table ({location}): {e}")))?;
    let schema = Arc::new(schema);

    if schema.fields().is_empty() {
        return Err(PipelineError::Format(format!("no columns in payload from {location}")));
    }

    let reader = ReaderBuilder::new(schema.clone())
        .with_format(format)
        .with_batch_size(CSV_BATCH_SIZE)
        .build(Cursor::new(&data))?;

    let batches = reader
        .collect::<std::result::Result<Vec<RecordBatch>, _>>()
        .map_err(|e| PipelineError::Format(format!("malformed CSV from {location}: {e}")))?;

    let batch = arrow::compute::concat_batches(&schema, &batches)?;
    debug!(location, rows = batch.num_rows(), columns = batch.num_columns(), "Decoded dataset");
    Ok(RawTable::new(batch))
}

/// Cache key of a fetch: the source location alone
pub fn fetch_key(location: &SourceLocation) -> Fingerprint {
    Fingerprint::of_parts(&["fetch", location.as_str()])
}

/// [`HttpFetch`] with bounded retry and TTL memoization
pub struct CachedFetcher {
    task: CachedTask<HttpFetch>,
}

impl CachedFetcher {
    pub fn new(fetch: HttpFetch, retry: RetryPolicy, cache: TaskCache<SourceLocation>) -> Self {
        Self {
            task: CachedTask::new(Task::new(fetch, retry), cache),
        }
    }

    pub fn cache_policy(ttl: Duration) -> CachePolicy<SourceLocation> {
        CachePolicy::new(fetch_key, ttl)
    }

    pub async fn fetch(&self, location: &SourceLocation) -> Result<RawTable> {
        self.fetch_recorded(location).await.output
    }

    pub async fn fetch_recorded(&self, location: &SourceLocation) -> TaskResult<RawTable> {
        self.task.run(location).await
    }
}
