//! S3-compatible object store (AWS, MinIO, GCS interoperability)

use super::ObjectStore;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, instrument};

/// Connection settings of one S3 storage block.
///
/// Without an access key pair the default AWS credential chain is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3BlockConfig {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub path_style: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl S3BlockConfig {
    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: default_region(),
            endpoint: Some(endpoint.into()),
            access_key: Some("minioadmin".to_string()),
            secret_key: Some("minioadmin".to_string()),
            path_style: true,
        }
    }

    /// GCS through its S3-compatible XML API, authenticated with HMAC keys
    pub fn for_gcs(bucket: impl Into<String>, access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: "auto".to_string(),
            endpoint: Some("https://storage.googleapis.com".to_string()),
            access_key: Some(access_key.into()),
            secret_key: Some(secret_key.into()),
            path_style: true,
        }
    }
}

impl std::fmt::Display for S3BlockConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.endpoint {
            Some(endpoint) => write!(f, "s3://{} via {}", self.bucket, endpoint),
            None => write!(f, "s3://{}", self.bucket),
        }
    }
}

#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub async fn connect(config: &S3BlockConfig) -> Result<Self> {
        debug!(block = %config, "Initializing S3 object store");

        let mut builder = match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                let credentials = Credentials::new(access_key, secret_key, None, None, "listings-block");
                aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .credentials_provider(credentials)
            }
            (None, None) => {
                let shared = aws_config::defaults(BehaviorVersion::latest()).load().await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
            _ => {
                return Err(PipelineError::Config(format!(
                    "storage block for bucket '{}' sets only one of access_key/secret_key",
                    config.bucket
                )))
            }
        };

        builder = builder
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());
        info!(bucket = %config.bucket, "S3 object store initialized");

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, local_path))]
    async fn upload(&self, local_path: &Path, key: &str) -> Result<()> {
        debug!("Uploading {} to s3://{}/{}", local_path.display(), self.bucket, key);

        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| PipelineError::Storage(format!("cannot read {}: {e}", local_path.display())))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| PipelineError::Storage(format!("upload of {key} failed: {e}")))?;

        info!("Uploaded to s3://{}/{}", self.bucket, key);
        Ok(())
    }

    #[instrument(skip(self, local_path))]
    async fn download(&self, key: &str, local_path: &Path) -> Result<()> {
        debug!("Downloading s3://{}/{}", self.bucket, key);

        let response = match self.client.get_object().bucket(&self.bucket).key(key).send().await {
            Ok(response) => response,
            Err(e) => {
                if e.as_service_error().is_some_and(|service| service.is_no_such_key()) {
                    return Err(PipelineError::NotFound { key: key.to_string() });
                }
                return Err(PipelineError::Storage(format!("download of {key} failed: {e}")));
            }
        };

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| PipelineError::Storage(format!("failed to read body of {key}: {e}")))?
            .into_bytes();

        super::write_file_atomic(local_path, &data).await?;
        debug!("Downloaded {} bytes from s3://{}/{}", data.len(), self.bucket, key);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("s3://{}", self.bucket)
    }
}
