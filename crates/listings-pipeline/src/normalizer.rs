//! Canonical column types for listing tables

use crate::error::{PipelineError, Result};
use crate::table::{NormalizedTable, RawTable, Tabular};
use arrow::array::ArrayRef;
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use std::sync::Arc;
use tracing::debug;

/// Listing columns stored as text in the warehouse
pub const LISTING_TEXT_COLUMNS: [&str; 33] = [
    "listing_url",
    "last_scraped",
    "source",
    "name",
    "description",
    "neighborhood_overview",
    "picture_url",
    "host_url",
    "host_name",
    "host_since",
    "host_location",
    "host_about",
    "host_response_time",
    "host_response_rate",
    "host_acceptance_rate",
    "host_is_superhost",
    "host_thumbnail_url",
    "host_picture_url",
    "host_neighbourhood",
    "host_verifications",
    "host_has_profile_pic",
    "host_identity_verified",
    "neighbourhood",
    "property_type",
    "room_type",
    "bathrooms_text",
    "amenities",
    "price",
    "has_availability",
    "calendar_last_scraped",
    "first_review",
    "last_review",
    "instant_bookable",
];

/// Coerces a fixed set of columns to UTF-8 text.
///
/// Values become their canonical text form (`42`, `1.5`, `true`,
/// `2023-03-06`); nulls stay null. Every other column keeps its type,
/// values and position.
#[derive(Debug, Clone)]
pub struct SchemaNormalizer {
    text_columns: Vec<String>,
}

impl Default for SchemaNormalizer {
    fn default() -> Self {
        Self::new(LISTING_TEXT_COLUMNS.iter().map(|name| name.to_string()).collect())
    }
}

impl SchemaNormalizer {
    pub fn new(text_columns: Vec<String>) -> Self {
        Self { text_columns }
    }

    pub fn text_columns(&self) -> &[String] {
        &self.text_columns
    }

    pub fn normalize(&self, table: &RawTable) -> Result<NormalizedTable> {
        let batch = table.batch();
        let schema = batch.schema();

        let missing: Vec<String> = self
            .text_columns
            .iter()
            .filter(|name| schema.index_of(name).is_err())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::Schema { missing });
        }

        let mut fields = Vec::with_capacity(schema.fields().len());
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(batch.num_columns());

        for (field, column) in schema.fields().iter().zip(batch.columns()) {
            let coerce = self.text_columns.iter().any(|name| name == field.name());
            if coerce && field.data_type() != &DataType::Utf8 {
                columns.push(cast(column, &DataType::Utf8)?);
                fields.push(Field::new(field.name(), DataType::Utf8, true));
            } else {
                columns.push(column.clone());
                fields.push(field.as_ref().clone());
            }
        }

        let schema = Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()));
        let options = RecordBatchOptions::new().with_row_count(Some(batch.num_rows()));
        let normalized = RecordBatch::try_new_with_options(schema.clone(), columns, &options)?;

        for field in schema.fields() {
            debug!(column = %field.name(), dtype = %field.data_type(), "Normalized column");
        }

        Ok(NormalizedTable::new(normalized))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use arrow::array::{Array, BooleanArray, Date32Array, Float64Array, Int64Array, NullArray, StringArray};

    fn normalizer() -> SchemaNormalizer {
        SchemaNormalizer::new(vec![
            "price".into(),
            "host_is_superhost".into(),
            "first_review".into(),
            "host_about".into(),
            "name".into(),
        ])
    }

    fn mixed_table() -> RawTable {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("price", DataType::Float64, true),
            Field::new("host_is_superhost", DataType::Boolean, true),
            Field::new("first_review", DataType::Date32, true),
            Field::new("host_about", DataType::Null, true),
            Field::new("name", DataType::Utf8, true),
            Field::new("reviews_per_month", DataType::Float64, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![10, 11])),
                Arc::new(Float64Array::from(vec![Some(120.5), None])),
                Arc::new(BooleanArray::from(vec![Some(true), Some(false)])),
                Arc::new(Date32Array::from(vec![Some(19_422), None])),
                Arc::new(NullArray::new(2)),
                Arc::new(StringArray::from(vec!["Loft", "Room"])),
                Arc::new(Float64Array::from(vec![Some(0.5), Some(1.25)])),
            ],
        )
        .unwrap();
        RawTable::new(batch)
    }

    fn text(table: &NormalizedTable, name: &str) -> StringArray {
        let index = table.schema().index_of(name).unwrap();
        table
            .batch()
            .column(index)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap()
            .clone()
    }

    #[test]
    fn test_listed_columns_become_text() {
        let normalized = normalizer().normalize(&mixed_table()).unwrap();

        let price = text(&normalized, "price");
        assert_eq!(price.value(0), "120.5");
        assert!(price.is_null(1));

        let superhost = text(&normalized, "host_is_superhost");
        assert_eq!(superhost.value(0), "true");
        assert_eq!(superhost.value(1), "false");

        assert_eq!(text(&normalized, "first_review").value(0), "2023-03-06");
        assert_eq!(text(&normalized, "host_about").null_count(), 2);
        assert_eq!(text(&normalized, "name").value(1), "Room");
    }

    #[test]
    fn test_other_columns_unchanged_in_value_and_position() {
        let raw = mixed_table();
        let normalized = normalizer().normalize(&raw).unwrap();

        assert_eq!(normalized.column_names(), raw.column_names());
        assert_eq!(normalized.num_rows(), 2);
        for name in ["id", "reviews_per_month"] {
            let index = raw.schema().index_of(name).unwrap();
            assert_eq!(normalized.schema().field(index).data_type(), raw.schema().field(index).data_type());
            assert_eq!(normalized.batch().column(index), raw.batch().column(index));
        }
    }

    #[test]
    fn test_missing_columns_are_all_reported() {
        let normalizer = SchemaNormalizer::new(vec!["price".into(), "amenities".into(), "room_type".into()]);
        match normalizer.normalize(&mixed_table()) {
            Err(PipelineError::Schema { missing }) => assert_eq!(missing, vec!["amenities", "room_type"]),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_default_list_has_every_listing_text_column() {
        let normalizer = SchemaNormalizer::default();
        assert_eq!(normalizer.text_columns().len(), 33);
        assert_eq!(normalizer.text_columns()[0], "listing_url");
        assert_eq!(normalizer.text_columns()[32], "instant_bookable");
    }
}
