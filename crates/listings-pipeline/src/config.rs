//! Pipeline configuration
//!
//! Layered with `figment`, lowest priority first:
//!
//! 1. built-in defaults
//! 2. an optional TOML file (`--config`)
//! 3. `LISTINGS_`-prefixed environment variables, `__` separating sections
//!    (`LISTINGS_FETCH__MAX_ATTEMPTS=5`, `LISTINGS_BATCH__CONCURRENCY=4`)
//!
//! A `.env` file in the working directory is read first.

use crate::discovery::{RequestHeaders, DEFAULT_TABLE_CLASS_TEMPLATE};
use crate::error::{PipelineError, Result};
use crate::fetcher::DEFAULT_FETCH_TTL;
use crate::framework::{Backoff, RetryPolicy};
use crate::normalizer::LISTING_TEXT_COLUMNS;
use crate::storage::StorageBlock;
use crate::warehouse::{ServiceAccountConfig, WarehouseTable, DEFAULT_CHUNK_SIZE};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use listings_common::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_CATALOG_URL: &str = "http://insideairbnb.com/get-the-data/";

/// Prefix stripped from dataset URLs to build dataset references
pub const DEFAULT_DATASET_BASE_URL: &str = "http://data.insideairbnb.com/";

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CACHE_DIR: &str = "./.listings-cache";
pub const DEFAULT_STAGING_ROOT: &str = "./staging";
pub const DEFAULT_KEY_PREFIX: &str = "src";
pub const DEFAULT_STORAGE_BLOCK: &str = "listings-block";
pub const DEFAULT_OBJECT_STORE_ROOT: &str = "./object-store";
pub const DEFAULT_CREDENTIAL: &str = "warehouse-sa";
pub const DEFAULT_WAREHOUSE_DATASET: &str = "dbt_training";
pub const DEFAULT_WAREHOUSE_TABLE: &str = "Airbnb_dbs";

const ENV_PREFIX: &str = "LISTINGS_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub catalog: CatalogConfig,
    pub fetch: FetchConfig,
    pub staging: StagingConfig,
    pub storage: StorageSelection,
    /// Named object-store configurations
    pub blocks: BTreeMap<String, StorageBlock>,
    pub normalize: NormalizeConfig,
    pub warehouse: WarehouseConfig,
    /// Named service accounts
    pub credentials: BTreeMap<String, ServiceAccountConfig>,
    pub batch: BatchConfig,
    pub logging: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub url: String,
    pub dataset_base_url: String,
    pub table_class_template: String,
    pub headers: RequestHeaders,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub attempt_timeout_secs: u64,
    pub cache_ttl_secs: u64,
    pub cache_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingConfig {
    pub root: PathBuf,
    pub key_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSelection {
    /// Key into [`PipelineConfig::blocks`]
    pub block: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeConfig {
    pub text_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseConfig {
    pub project: String,
    pub dataset: String,
    pub table: String,
    /// Key into [`PipelineConfig::credentials`]
    pub credential: String,
    pub chunk_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    pub concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            catalog: CatalogConfig {
                url: DEFAULT_CATALOG_URL.to_string(),
                dataset_base_url: DEFAULT_DATASET_BASE_URL.to_string(),
                table_class_template: DEFAULT_TABLE_CLASS_TEMPLATE.to_string(),
                headers: RequestHeaders::default(),
                timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            },
            fetch: FetchConfig {
                max_attempts: DEFAULT_MAX_ATTEMPTS,
                backoff: Backoff::default(),
                attempt_timeout_secs: DEFAULT_ATTEMPT_TIMEOUT_SECS,
                cache_ttl_secs: DEFAULT_FETCH_TTL.as_secs(),
                cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            },
            staging: StagingConfig {
                root: PathBuf::from(DEFAULT_STAGING_ROOT),
                key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            },
            storage: StorageSelection {
                block: DEFAULT_STORAGE_BLOCK.to_string(),
            },
            blocks: BTreeMap::from([(
                DEFAULT_STORAGE_BLOCK.to_string(),
                StorageBlock::Local {
                    root: PathBuf::from(DEFAULT_OBJECT_STORE_ROOT),
                },
            )]),
            normalize: NormalizeConfig {
                text_columns: LISTING_TEXT_COLUMNS.iter().map(|name| name.to_string()).collect(),
            },
            warehouse: WarehouseConfig {
                project: String::new(),
                dataset: DEFAULT_WAREHOUSE_DATASET.to_string(),
                table: DEFAULT_WAREHOUSE_TABLE.to_string(),
                credential: DEFAULT_CREDENTIAL.to_string(),
                chunk_size: DEFAULT_CHUNK_SIZE,
            },
            credentials: BTreeMap::new(),
            batch: BatchConfig { concurrency: 1 },
            logging: LogConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load and validate the layered configuration
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config: Self = Self::figment(path)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Defaults with the TOML file merged over them
    pub fn figment(path: Option<&Path>) -> Figment {
        let figment = Figment::from(Serialized::defaults(Self::default()));
        match path {
            Some(path) => figment.merge(Toml::file(path)),
            None => figment,
        }
    }

    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.catalog.url)
            .map_err(|e| PipelineError::Config(format!("catalog.url '{}': {e}", self.catalog.url)))?;
        self.catalog.headers.to_header_map()?;

        if self.catalog.dataset_base_url.is_empty() {
            return Err(PipelineError::Config("catalog.dataset_base_url must not be empty".to_string()));
        }
        if self.fetch.max_attempts == 0 {
            return Err(PipelineError::Config("fetch.max_attempts must be at least 1".to_string()));
        }
        if self.warehouse.chunk_size == 0 {
            return Err(PipelineError::Config("warehouse.chunk_size must be at least 1".to_string()));
        }
        if self.batch.concurrency == 0 {
            return Err(PipelineError::Config("batch.concurrency must be at least 1".to_string()));
        }
        self.storage_block()?;

        Ok(())
    }

    /// Checks only the load pipeline needs
    pub fn validate_load(&self) -> Result<()> {
        self.warehouse_table()?;
        self.service_account()?;
        Ok(())
    }

    pub fn catalog_url(&self) -> Result<Url> {
        Url::parse(&self.catalog.url).map_err(|e| PipelineError::Config(format!("catalog.url: {e}")))
    }

    pub fn storage_block(&self) -> Result<&StorageBlock> {
        self.blocks.get(&self.storage.block).ok_or_else(|| {
            PipelineError::Config(format!("unknown storage block '{}'", self.storage.block))
        })
    }

    pub fn service_account(&self) -> Result<&ServiceAccountConfig> {
        self.credentials.get(&self.warehouse.credential).ok_or_else(|| {
            PipelineError::Config(format!("unknown credential '{}'", self.warehouse.credential))
        })
    }

    pub fn warehouse_table(&self) -> Result<WarehouseTable> {
        let warehouse = &self.warehouse;
        if warehouse.project.is_empty() || warehouse.dataset.is_empty() || warehouse.table.is_empty() {
            return Err(PipelineError::Config(
                "warehouse.project, warehouse.dataset and warehouse.table are required".to_string(),
            ));
        }
        Ok(WarehouseTable::new(&warehouse.project, &warehouse.dataset, &warehouse.table))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.fetch.max_attempts,
            backoff: self.fetch.backoff.clone(),
            attempt_timeout: match self.fetch.attempt_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.fetch.cache_ttl_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.catalog.timeout_secs)
    }
}
