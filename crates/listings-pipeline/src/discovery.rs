//! Catalog discovery
//!
//! Turns region identifiers into dataset source locations by fetching the
//! public catalog page once and reading the download link of every dataset
//! table tagged with the region.
//!
//! The catalog lists each dataset in a `<table>` whose class attribute is
//! `data table table-hover table-striped <region>`; the first `<a>` in that
//! table links to the dataset file. Links may be absolute or relative to the
//! catalog page.

use crate::error::{PipelineError, Result};
use listings_common::SourceLocation;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Placeholder replaced by the region identifier in the table class template
pub const REGION_PLACEHOLDER: &str = "{region}";

pub const DEFAULT_TABLE_CLASS_TEMPLATE: &str = "data table table-hover table-striped {region}";

/// Immutable header set sent with every catalog and dataset request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestHeaders(BTreeMap<String, String>);

impl Default for RequestHeaders {
    /// Headers of a desktop browser; the catalog host rejects bare clients
    fn default() -> Self {
        let headers = [
            (
                "User-Agent",
                "Mozilla/5.0 (Windows NT 6.1; WOW64; rv:49.0) Gecko/20100101 Firefox/49.0",
            ),
            (
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
            ("Accept-Language", "en-US,en;q=0.5"),
            ("Accept-Encoding", "gzip, deflate"),
            ("DNT", "1"),
            ("Connection", "keep-alive"),
            ("Upgrade-Insecure-Requests", "1"),
        ];
        Self(
            headers
                .into_iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
        )
    }
}

impl RequestHeaders {
    pub fn new(headers: BTreeMap<String, String>) -> Self {
        Self(headers)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn to_header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::with_capacity(self.0.len());
        for (name, value) in &self.0 {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| PipelineError::Config(format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| PipelineError::Config(format!("invalid value for header '{name}': {e}")))?;
            map.insert(name, value);
        }
        Ok(map)
    }

    /// HTTP client sending these headers by default
    pub fn client(&self, timeout: Duration) -> Result<Client> {
        Client::builder()
            .default_headers(self.to_header_map()?)
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to build HTTP client: {e}")))
    }
}

/// Locations found by one catalog query.
///
/// Yields each location once, regions in the order requested and locations
/// within a region in document order. A new query is needed to iterate
/// again.
#[derive(Debug)]
pub struct Discovery {
    locations: std::vec::IntoIter<SourceLocation>,
    warnings: Vec<PipelineError>,
}

impl Discovery {
    /// Problems met while discovering; the affected regions yield nothing
    pub fn take_warnings(&mut self) -> Vec<PipelineError> {
        std::mem::take(&mut self.warnings)
    }

    pub fn warnings(&self) -> &[PipelineError] {
        &self.warnings
    }
}

impl Iterator for Discovery {
    type Item = SourceLocation;

    fn next(&mut self) -> Option<Self::Item> {
        self.locations.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.locations.size_hint()
    }
}

impl ExactSizeIterator for Discovery {}

pub struct CatalogDiscoverer {
    client: Client,
    catalog_url: Url,
    table_class_template: String,
}

impl CatalogDiscoverer {
    pub fn new(client: Client, catalog_url: Url) -> Self {
        Self {
            client,
            catalog_url,
            table_class_template: DEFAULT_TABLE_CLASS_TEMPLATE.to_string(),
        }
    }

    pub fn with_table_class_template(mut self, template: impl Into<String>) -> Self {
        self.table_class_template = template.into();
        self
    }

    pub fn catalog_url(&self) -> &Url {
        &self.catalog_url
    }

    /// Query the catalog once and collect the locations of every region.
    ///
    /// Never fails: a catalog fetch failure yields no locations and one
    /// warning per region, and a region without matches yields a warning.
    #[instrument(skip(self), fields(catalog = %self.catalog_url))]
    pub async fn discover(&self, regions: &[String]) -> Discovery {
        let html = match self.fetch_catalog().await {
            Ok(html) => html,
            Err(e) => {
                warn!(error = %e, "Catalog fetch failed; no datasets discovered");
                let warnings = regions
                    .iter()
                    .map(|region| PipelineError::Discovery {
                        region: region.clone(),
                        message: format!("catalog unavailable: {e}"),
                    })
                    .collect();
                return Discovery {
                    locations: Vec::new().into_iter(),
                    warnings,
                };
            }
        };

        let mut locations = Vec::new();
        let mut warnings = Vec::new();

        for region in regions {
            match extract_locations(&html, &self.catalog_url, region, &self.table_class_template) {
                Ok(found) if found.is_empty() => {
                    warn!(region = %region, "No datasets listed for region");
                    warnings.push(PipelineError::Discovery {
                        region: region.clone(),
                        message: "no matching catalog entries".to_string(),
                    });
                }
                Ok(found) => {
                    info!(region = %region, count = found.len(), "Discovered {} datasets", found.len());
                    locations.extend(found);
                }
                Err(e) => {
                    warn!(region = %region, error = %e, "Failed to read catalog entries");
                    warnings.push(e);
                }
            }
        }

        Discovery {
            locations: locations.into_iter(),
            warnings,
        }
    }

    async fn fetch_catalog(&self) -> Result<String> {
        debug!("Fetching catalog page");

        let response = self.client.get(self.catalog_url.clone()).send().await?;

        if !response.status().is_success() {
            return Err(PipelineError::Retrieval(format!(
                "HTTP {} from {}",
                response.status(),
                self.catalog_url
            )));
        }

        Ok(response.text().await?)
    }
}

/// Links of every catalog table tagged with `region`, in document order
pub fn extract_locations(
    html: &str,
    base: &Url,
    region: &str,
    table_class_template: &str,
) -> Result<Vec<SourceLocation>> {
    let region = region.trim();
    if region.is_empty() {
        return Err(PipelineError::Discovery {
            region: region.to_string(),
            message: "empty region identifier".to_string(),
        });
    }

    let class = table_class_template.replace(REGION_PLACEHOLDER, region);
    let required: Vec<&str> = class.split_whitespace().collect();

    let table_selector = selector("table", region)?;
    let link_selector = selector("a", region)?;
    let document = Html::parse_document(html);

    let mut locations = Vec::new();
    for table in document.select(&table_selector) {
        let classes: HashSet<&str> = table.value().classes().collect();
        if !required.iter().all(|name| classes.contains(name)) {
            continue;
        }

        let Some(href) = table
            .select(&link_selector)
            .next()
            .and_then(|link| link.value().attr("href"))
        else {
            debug!(region, "Catalog table without a link");
            continue;
        };

        match base.join(href.trim()) {
            Ok(url) => locations.push(SourceLocation::new(url.as_str())),
            Err(e) => warn!(region, href, error = %e, "Skipping unparseable dataset link"),
        }
    }

    Ok(locations)
}

fn selector(css: &str, region: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| PipelineError::Discovery {
        region: region.to_string(),
        message: format!("invalid selector '{css}': {e}"),
    })
}
