//! Content-addressed memoization of step outputs
//!
//! A [`TaskCache`] maps the fingerprint of a step input to the encoded
//! output the step produced for it. Entries are reused while younger than
//! the policy TTL. Reads that fail for any reason (missing file, corrupt
//! metadata, checksum mismatch, undecodable payload) are cache misses.

use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use listings_common::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Source of the current time for TTL checks
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.millis.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

/// How a step input maps to a cache key and how long the entry lives
pub struct CachePolicy<I: ?Sized> {
    pub key_fn: fn(&I) -> Fingerprint,
    pub ttl: Duration,
}

impl<I: ?Sized> Clone for CachePolicy<I> {
    fn clone(&self) -> Self {
        Self {
            key_fn: self.key_fn,
            ttl: self.ttl,
        }
    }
}

impl<I: ?Sized> std::fmt::Debug for CachePolicy<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachePolicy").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

impl<I: ?Sized> CachePolicy<I> {
    pub fn new(key_fn: fn(&I) -> Fingerprint, ttl: Duration) -> Self {
        Self { key_fn, ttl }
    }

    pub fn key(&self, input: &I) -> Fingerprint {
        (self.key_fn)(input)
    }

    pub fn is_fresh(&self, produced_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match (now - produced_at).to_std() {
            Ok(age) => age < self.ttl,
            // produced "in the future": clock skew, still fresh
            Err(_) => true,
        }
    }
}

/// Outputs that can be stored in a result store
pub trait Cacheable: Sized {
    fn encode(&self) -> Result<Vec<u8>>;
    fn decode(bytes: &[u8]) -> Result<Self>;
}

/// One stored step output
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub step: String,
    pub produced_at: DateTime<Utc>,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn load(&self, key: &Fingerprint) -> Result<Option<CacheEntry>>;
    async fn store(&self, key: &Fingerprint, entry: CacheEntry) -> Result<()>;
}

/// Sidecar metadata written next to every payload file
#[derive(Debug, Serialize, Deserialize)]
struct EntryMetadata {
    step: String,
    produced_at: DateTime<Utc>,
    payload_size: u64,
    payload_checksum: Fingerprint,
}

/// Result store persisted under a local directory.
///
/// Each entry is `<fingerprint>.payload` plus `<fingerprint>.json`. The
/// metadata file is renamed into place last, so a crash mid-write leaves
/// at worst an orphaned payload that is ignored.
#[derive(Debug, Clone)]
pub struct FileResultStore {
    root: PathBuf,
}

impl FileResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn metadata_path(&self, key: &Fingerprint) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    fn payload_path(&self, key: &Fingerprint) -> PathBuf {
        self.root.join(format!("{key}.payload"))
    }

    async fn read_entry(&self, key: &Fingerprint) -> Result<Option<CacheEntry>> {
        let metadata_path = self.metadata_path(key);
        let raw = match tokio::fs::read(&metadata_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let metadata: EntryMetadata = serde_json::from_slice(&raw)
            .map_err(|e| PipelineError::Cache(format!("corrupt metadata: {e}")))?;
        let payload = tokio::fs::read(self.payload_path(key)).await?;

        if payload.len() as u64 != metadata.payload_size
            || Fingerprint::of_bytes(&payload) != metadata.payload_checksum
        {
            return Err(PipelineError::Cache("payload checksum mismatch".to_string()));
        }

        Ok(Some(CacheEntry {
            step: metadata.step,
            produced_at: metadata.produced_at,
            payload,
        }))
    }
}

#[async_trait]
impl ResultStore for FileResultStore {
    async fn load(&self, key: &Fingerprint) -> Result<Option<CacheEntry>> {
        match self.read_entry(key).await {
            Ok(entry) => Ok(entry),
            Err(e) => {
                warn!(fingerprint = key.short(), error = %e, "Ignoring unreadable cache entry");
                Ok(None)
            }
        }
    }

    async fn store(&self, key: &Fingerprint, entry: CacheEntry) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;

        let metadata = EntryMetadata {
            step: entry.step,
            produced_at: entry.produced_at,
            payload_size: entry.payload.len() as u64,
            payload_checksum: Fingerprint::of_bytes(&entry.payload),
        };

        let payload_path = self.payload_path(key);
        write_atomic(&payload_path, &entry.payload).await?;

        let metadata_json = serde_json::to_vec_pretty(&metadata)
            .map_err(|e| PipelineError::Cache(e.to_string()))?;
        write_atomic(&self.metadata_path(key), &metadata_json).await?;

        debug!(
            fingerprint = key.short(),
            bytes = metadata.payload_size,
            path = %payload_path.display(),
            "Stored cache entry"
        );
        Ok(())
    }
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Process-local result store
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    entries: Mutex<HashMap<Fingerprint, CacheEntry>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn load(&self, key: &Fingerprint) -> Result<Option<CacheEntry>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn store(&self, key: &Fingerprint, entry: CacheEntry) -> Result<()> {
        self.entries.lock().await.insert(key.clone(), entry);
        Ok(())
    }
}

/// A [`CachePolicy`] bound to a store and a clock
pub struct TaskCache<I: ?Sized> {
    policy: CachePolicy<I>,
    store: Arc<dyn ResultStore>,
    clock: Arc<dyn Clock>,
}

impl<I: ?Sized> TaskCache<I> {
    pub fn new(policy: CachePolicy<I>, store: Arc<dyn ResultStore>) -> Self {
        Self {
            policy,
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> &CachePolicy<I> {
        &self.policy
    }

    pub fn key(&self, input: &I) -> Fingerprint {
        self.policy.key(input)
    }

    /// Fresh cached output for `key`, if any
    pub async fn lookup<O: Cacheable>(&self, key: &Fingerprint) -> Option<O> {
        let entry = match self.store.load(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!(fingerprint = key.short(), error = %e, "Cache lookup failed");
                return None;
            }
        };

        if !self.policy.is_fresh(entry.produced_at, self.clock.now()) {
            debug!(
                fingerprint = key.short(),
                produced_at = %entry.produced_at,
                "Cache entry expired"
            );
            return None;
        }

        match O::decode(&entry.payload) {
            Ok(output) => Some(output),
            Err(e) => {
                warn!(fingerprint = key.short(), error = %e, "Discarding undecodable cache entry");
                None
            }
        }
    }

    pub async fn persist<O: Cacheable>(&self, step: &str, key: &Fingerprint, output: &O) -> Result<()> {
        let entry = CacheEntry {
            step: step.to_string(),
            produced_at: self.clock.now(),
            payload: output.encode()?,
        };
        self.store.store(key, entry).await
    }
}
