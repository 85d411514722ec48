//! BigQuery streaming-insert backend

use super::{Row, Warehouse, WarehouseTable};
use crate::error::{PipelineError, Result};
use arrow::datatypes::{DataType, Schema};
use async_trait::async_trait;
use gcp_bigquery_client::error::BQError;
use gcp_bigquery_client::model::query_request::QueryRequest;
use gcp_bigquery_client::model::table_data_insert_all_request::TableDataInsertAllRequest;
use gcp_bigquery_client::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Upper bound on rows in one `insertAll` request
pub const MAX_ROWS_PER_REQUEST: usize = 500;

/// Upper bound on the encoded rows of one `insertAll` request. BigQuery
/// rejects requests over 10 MB; the rest is headroom for the envelope.
pub const MAX_REQUEST_BYTES: usize = 9 * 1024 * 1024;

// `{"json":` + `}` + `,` around every row
const ROW_ENVELOPE_BYTES: usize = 10;

/// A named service account, resolved from configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccountConfig {
    pub key_path: PathBuf,
}

/// Appends rows with the `tabledata.insertAll` API.
///
/// Credentials are bound when connecting; a loader targets one service
/// account for its lifetime. Missing tables are created on first use.
pub struct BigQueryWarehouse {
    client: Client,
    key_path: PathBuf,
    known_tables: Mutex<HashSet<WarehouseTable>>,
}

impl BigQueryWarehouse {
    pub async fn connect(credentials: &ServiceAccountConfig) -> Result<Self> {
        let key_path = credentials.key_path.to_string_lossy().to_string();
        let client = Client::from_service_account_key_file(&key_path)
            .await
            .map_err(|e| PipelineError::Load(format!("invalid service account key {key_path}: {e}")))?;

        info!(key_path = %key_path, "BigQuery client initialized");
        Ok(Self {
            client,
            key_path: credentials.key_path.clone(),
            known_tables: Mutex::new(HashSet::new()),
        })
    }

    async fn table_exists(&self, target: &WarehouseTable) -> Result<bool> {
        match self
            .client
            .table()
            .get(&target.project, &target.dataset, &target.table, None)
            .await
        {
            Ok(_) => Ok(true),
            Err(BQError::ResponseError { error }) if error.error.code == 404 => Ok(false),
            Err(e) => Err(load_error(target, e)),
        }
    }
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    async fn ensure_table(&self, target: &WarehouseTable, schema: &Schema) -> Result<()> {
        if self.known_tables.lock().await.contains(target) {
            return Ok(());
        }

        if !self.table_exists(target).await? {
            info!(warehouse_table = %target, columns = schema.fields().len(), "Creating warehouse table");
            self.client
                .job()
                .query(&target.project, QueryRequest::new(create_table_ddl(target, schema)))
                .await
                .map_err(|e| PipelineError::Load(format!("cannot create {target}: {e}")))?;
        }

        self.known_tables.lock().await.insert(target.clone());
        Ok(())
    }

    async fn append(&self, target: &WarehouseTable, rows: Vec<Row>) -> Result<()> {
        let mut sent = 0;

        for request_rows in split_requests(rows)? {
            let count = request_rows.len();
            let mut request = TableDataInsertAllRequest::new();
            for row in request_rows {
                request.add_row(None, row).map_err(|e| load_error(target, e))?;
            }

            let response = self
                .client
                .tabledata()
                .insert_all(&target.project, &target.dataset, &target.table, request)
                .await
                .map_err(|e| load_error(target, e))?;

            if let Some(errors) = response.insert_errors.filter(|errors| !errors.is_empty()) {
                return Err(PipelineError::Load(format!(
                    "{} of {} rows rejected by {}; first error: {:?}",
                    errors.len(),
                    count,
                    target,
                    errors.first()
                )));
            }

            sent += count;
            debug!(warehouse_table = %target, sent, "insertAll request accepted");
        }

        Ok(())
    }

    fn describe(&self) -> String {
        format!("bigquery ({})", self.key_path.display())
    }
}

fn load_error(target: &WarehouseTable, err: BQError) -> PipelineError {
    PipelineError::Load(format!("append to {target} failed: {err}"))
}

/// Group rows into `insertAll` requests bounded by both
/// [`MAX_ROWS_PER_REQUEST`] and [`MAX_REQUEST_BYTES`], keeping row order.
///
/// A single row larger than the byte bound travels alone.
pub fn split_requests(rows: Vec<Row>) -> Result<Vec<Vec<Row>>> {
    let mut requests = Vec::new();
    let mut current: Vec<Row> = Vec::new();
    let mut current_bytes = 0;

    for row in rows {
        let row_bytes = serde_json::to_vec(&row)
            .map_err(|e| PipelineError::Load(format!("cannot encode row: {e}")))?
            .len()
            + ROW_ENVELOPE_BYTES;

        let full = current.len() >= MAX_ROWS_PER_REQUEST || current_bytes + row_bytes > MAX_REQUEST_BYTES;
        if full && !current.is_empty() {
            requests.push(std::mem::take(&mut current));
            current_bytes = 0;
        }

        current_bytes += row_bytes;
        current.push(row);
    }

    if !current.is_empty() {
        requests.push(current);
    }
    Ok(requests)
}

/// BigQuery column type for an Arrow type
pub fn bigquery_type(data_type: &DataType) -> &'static str {
    match data_type {
        DataType::Boolean => "bool",
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32 => "int64",
        DataType::Float16 | DataType::Float32 | DataType::Float64 => "float64",
        DataType::Decimal128(..) | DataType::Decimal256(..) => "numeric",
        DataType::Date32 | DataType::Date64 => "date",
        DataType::Timestamp(..) => "timestamp",
        _ => "string",
    }
}

/// `create table` statement with one nullable column per schema field
pub fn create_table_ddl(target: &WarehouseTable, schema: &Schema) -> String {
    let columns: Vec<String> = schema
        .fields()
        .iter()
        .map(|field| format!("`{}` {}", field.name().replace('`', ""), bigquery_type(field.data_type())))
        .collect();

    format!(
        "create table if not exists `{}.{}.{}` ({})",
        target.project,
        target.dataset,
        target.table,
        columns.join(", ")
    )
}
