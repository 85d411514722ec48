//! Catalog discovery and configured wiring against a mock catalog host

mod common;

use common::{catalog_html, listings_csv, mount_catalog, mount_dataset, CATALOG_PATH};
use listings_pipeline::config::PipelineConfig;
use listings_pipeline::discovery::{CatalogDiscoverer, RequestHeaders};
use listings_pipeline::setup::{self, Components};
use listings_pipeline::storage::StorageBlock;
use listings_pipeline::{ErrorKind, PipelineError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn catalog_url(server: &MockServer) -> Url {
    Url::parse(&format!("{}{CATALOG_PATH}", server.uri())).unwrap()
}

#[tokio::test]
async fn test_catalog_is_requested_once_with_browser_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CATALOG_PATH))
        .and(header("DNT", "1"))
        .and(header("Upgrade-Insecure-Requests", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(catalog_html(
            &server.uri(),
            &[
                ("amsterdam", "/nl/amsterdam/2023-03-09/data/listings.csv.gz"),
                ("madrid", "/es/madrid/2023-03-13/data/listings.csv.gz"),
                ("amsterdam", "/nl/amsterdam/2022-12-05/data/listings.csv.gz"),
            ],
        )))
        .expect(1)
        .mount(&server)
        .await;

    let client = RequestHeaders::default().client(Duration::from_secs(5)).unwrap();
    let discoverer = CatalogDiscoverer::new(client, catalog_url(&server));

    let mut discovery = discoverer
        .discover(&["madrid".to_string(), "amsterdam".to_string()])
        .await;
    assert!(discovery.take_warnings().is_empty());
    assert_eq!(discovery.len(), 3);

    let paths: Vec<String> = discovery
        .map(|location| Url::parse(location.as_str()).unwrap().path().to_string())
        .collect();
    assert_eq!(
        paths,
        vec![
            "/es/madrid/2023-03-13/data/listings.csv.gz",
            "/nl/amsterdam/2023-03-09/data/listings.csv.gz",
            "/nl/amsterdam/2022-12-05/data/listings.csv.gz",
        ]
    );
}

#[tokio::test]
async fn test_custom_table_class_template() {
    let server = MockServer::start().await;
    let html = format!(
        r#"<table class="datasets rome"><tr><td><a href="{}/it/rome/listings.csv">x</a></td></tr></table>"#,
        server.uri()
    );
    Mock::given(method("GET"))
        .and(path(CATALOG_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(html))
        .mount(&server)
        .await;

    let discoverer = CatalogDiscoverer::new(reqwest::Client::new(), catalog_url(&server))
        .with_table_class_template("datasets {region}");
    let discovery = discoverer.discover(&["rome".to_string()]).await;

    assert_eq!(discovery.warnings().len(), 0);
    assert_eq!(discovery.count(), 1);
}

#[tokio::test]
async fn test_unreachable_catalog_yields_warnings_only() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(CATALOG_PATH))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let discoverer = CatalogDiscoverer::new(reqwest::Client::new(), catalog_url(&server));
    let mut discovery = discoverer.discover(&["lisbon".to_string()]).await;

    let warnings = discovery.take_warnings();
    assert_eq!(warnings.len(), 1);
    assert!(matches!(&warnings[0], PipelineError::Discovery { region, .. } if region == "lisbon"));
    assert_eq!(warnings[0].kind(), ErrorKind::Discovery);
    assert_eq!(discovery.count(), 0);
}

#[tokio::test]
async fn test_configured_orchestrator_ingests_into_local_block() {
    let server = MockServer::start().await;
    let dir = tempfile::TempDir::new().unwrap();
    mount_catalog(&server, &[("porto", "/pt/porto/2023-03-15/data/listings.csv")]).await;
    mount_dataset(&server, "/pt/porto/2023-03-15/data/listings.csv", listings_csv(&[7]).into_bytes()).await;

    let mut config = PipelineConfig::default();
    config.catalog.url = catalog_url(&server).to_string();
    config.catalog.dataset_base_url = format!("{}/", server.uri());
    config.fetch.cache_dir = dir.path().join("cache");
    config.staging.root = dir.path().join("staging");
    config.blocks.insert(
        config.storage.block.clone(),
        StorageBlock::Local {
            root: dir.path().join("bucket"),
        },
    );
    config.validate().unwrap();

    let components = Components {
        ingest: true,
        load: false,
    };
    let orchestrator = setup::orchestrator(&config, components, CancellationToken::new())
        .await
        .unwrap();

    let report = orchestrator.ingest(&["porto".to_string()]).await.unwrap();
    assert_eq!(report.succeeded(), 1);
    assert!(dir
        .path()
        .join("bucket/src/pt-porto-2023-03-15-data-listings.csv.parquet")
        .is_file());
    assert!(dir
        .path()
        .join("staging/pt-porto-2023-03-15-data-listings.csv.parquet")
        .is_file());

    // load was not requested
    let err = orchestrator.load_regions(&["porto".to_string()]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}
