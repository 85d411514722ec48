//! S3 object store integration tests
//!
//! **Requirements**:
//! - MinIO or S3 must be running and accessible
//! - S3_ENDPOINT must be set (e.g. "http://localhost:9000")
//! - S3_BUCKET names an existing bucket (default "listings-test")
//! - Tests are skipped if S3_ENDPOINT is not configured
//!
//! ```bash
//! docker run -p 9000:9000 minio/minio server /data
//! S3_ENDPOINT=http://localhost:9000 cargo test --test s3_object_store_test
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use listings_pipeline::storage::{ObjectStore, S3BlockConfig, S3ObjectStore};
use listings_pipeline::PipelineError;
use tempfile::TempDir;

async fn setup_store() -> Option<S3ObjectStore> {
    let endpoint = std::env::var("S3_ENDPOINT").ok()?;
    let bucket = std::env::var("S3_BUCKET").unwrap_or_else(|_| "listings-test".to_string());

    match S3ObjectStore::connect(&S3BlockConfig::for_minio(endpoint, bucket)).await {
        Ok(store) => Some(store),
        Err(e) => {
            eprintln!("Failed to create S3 client: {}", e);
            None
        },
    }
}

fn test_key(test_name: &str) -> String {
    format!("test/{}/{}.parquet", test_name, uuid::Uuid::new_v4())
}

#[tokio::test]
async fn test_s3_upload_download() {
    let Some(store) = setup_store().await else {
        println!("Skipping test: S3_ENDPOINT not configured");
        return;
    };

    let dir = TempDir::new().unwrap();
    let source = dir.path().join("in.parquet");
    std::fs::write(&source, b"PAR1 listings PAR1").unwrap();

    let key = test_key("upload_download");
    store.upload(&source, &key).await.expect("Upload should succeed");

    let target = dir.path().join("nested/out.parquet");
    store.download(&key, &target).await.expect("Download should succeed");
    assert_eq!(std::fs::read(target).unwrap(), b"PAR1 listings PAR1");
}

#[tokio::test]
async fn test_s3_upload_overwrites() {
    let Some(store) = setup_store().await else {
        println!("Skipping test: S3_ENDPOINT not configured");
        return;
    };

    let dir = TempDir::new().unwrap();
    let source = dir.path().join("in.parquet");
    let key = test_key("overwrite");

    std::fs::write(&source, b"first").unwrap();
    store.upload(&source, &key).await.unwrap();
    std::fs::write(&source, b"second").unwrap();
    store.upload(&source, &key).await.unwrap();

    let target = dir.path().join("out.parquet");
    store.download(&key, &target).await.unwrap();
    assert_eq!(std::fs::read(target).unwrap(), b"second");
}

#[tokio::test]
async fn test_s3_missing_key_is_not_found() {
    let Some(store) = setup_store().await else {
        println!("Skipping test: S3_ENDPOINT not configured");
        return;
    };

    let dir = TempDir::new().unwrap();
    let err = store
        .download(&test_key("missing"), &dir.path().join("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NotFound { .. }));
}
