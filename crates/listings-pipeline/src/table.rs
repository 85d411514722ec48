//! In-memory tables passed between steps

use crate::error::{PipelineError, Result};
use crate::framework::Cacheable;
use arrow::record_batch::RecordBatch;
use arrow::datatypes::SchemaRef;
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::FileWriter;
use std::io::Cursor;

/// Access shared by raw and normalized tables
pub trait Tabular {
    fn batch(&self) -> &RecordBatch;

    fn num_rows(&self) -> usize {
        self.batch().num_rows()
    }

    fn schema(&self) -> SchemaRef {
        self.batch().schema()
    }

    fn column_names(&self) -> Vec<String> {
        self.batch()
            .schema()
            .fields()
            .iter()
            .map(|field| field.name().clone())
            .collect()
    }
}

/// A dataset exactly as fetched, with inferred column types
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    batch: RecordBatch,
}

impl RawTable {
    pub fn new(batch: RecordBatch) -> Self {
        Self { batch }
    }

    pub fn into_batch(self) -> RecordBatch {
        self.batch
    }
}

impl Tabular for RawTable {
    fn batch(&self) -> &RecordBatch {
        &self.batch
    }
}

/// A raw table whose listing text columns have been coerced to UTF-8
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTable {
    batch: RecordBatch,
}

impl NormalizedTable {
    pub(crate) fn new(batch: RecordBatch) -> Self {
        Self { batch }
    }

    pub fn into_batch(self) -> RecordBatch {
        self.batch
    }
}

impl Tabular for NormalizedTable {
    fn batch(&self) -> &RecordBatch {
        &self.batch
    }
}

/// Cached as a single-batch Arrow IPC file
impl Cacheable for RawTable {
    fn encode(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        {
            let mut writer = FileWriter::try_new(&mut buffer, &self.batch.schema())?;
            writer.write(&self.batch)?;
            writer.finish()?;
        }
        Ok(buffer)
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let reader = FileReader::try_new(Cursor::new(bytes), None)
            .map_err(|e| PipelineError::Cache(format!("invalid arrow payload: {e}")))?;
        let schema = reader.schema();
        let batches = reader
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| PipelineError::Cache(format!("invalid arrow payload: {e}")))?;

        let batch = if batches.is_empty() {
            RecordBatch::new_empty(schema)
        } else {
            arrow::compute::concat_batches(&schema, &batches)?
        };
        Ok(Self::new(batch))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn sample() -> RawTable {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(StringArray::from(vec![Some("a"), None, Some("c")])),
            ],
        )
        .unwrap();
        RawTable::new(batch)
    }

    #[test]
    fn test_column_names_and_rows() {
        let table = sample();
        assert_eq!(table.num_rows(), 3);
        assert_eq!(table.column_names(), vec!["id", "name"]);
    }

    #[test]
    fn test_ipc_cache_codec_preserves_table() {
        let table = sample();
        let bytes = table.encode().unwrap();
        assert_eq!(RawTable::decode(&bytes).unwrap(), table);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            RawTable::decode(b"definitely not arrow"),
            Err(PipelineError::Cache(_))
        ));
    }
}
