//! Object store backed by a local directory

use super::ObjectStore;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Stores object `key` at `<root>/<key>`
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn object_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(PipelineError::Storage(format!("invalid object key '{key}'")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn upload(&self, local_path: &Path, key: &str) -> Result<()> {
        let target = self.object_path(key)?;
        let data = tokio::fs::read(local_path).await?;
        super::write_file_atomic(&target, &data).await?;
        debug!(key, path = %target.display(), bytes = data.len(), "Stored object");
        Ok(())
    }

    async fn download(&self, key: &str, local_path: &Path) -> Result<()> {
        let source = self.object_path(key)?;
        let data = match tokio::fs::read(&source).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::NotFound { key: key.to_string() })
            }
            Err(e) => return Err(e.into()),
        };
        super::write_file_atomic(local_path, &data).await?;
        debug!(key, path = %local_path.display(), bytes = data.len(), "Fetched object");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }
}
