//! CSV ingestion through Arrow's CSV reader.

use crate::error::{Error, Result};
use arrow::array::{Array, Float64Array, Int64Array};
use arrow::compute::cast;
use arrow::csv::reader::Format;
use arrow::csv::ReaderBuilder;
use arrow::datatypes::DataType;
use std::io::{Cursor, Seek, SeekFrom};
use std::sync::Arc;

/// Name of the column carrying unix timestamps in seconds
pub const TIME_COLUMN: &str = "time";

/// Observations decoded from one CSV batch, row-major.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observations {
    /// Value columns in file order, `time` excluded
    pub fields: Vec<String>,
    /// `(timestamp, values)` with one value per entry in `fields`
    pub rows: Vec<(i64, Vec<Option<f64>>)>,
}

impl Observations {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Decode a CSV document with a header row and a `time` column.
pub fn read_observations(csv_data: &str) -> Result<Observations> {
    let mut cursor = Cursor::new(csv_data.as_bytes());
    let (schema, _) = Format::default()
        .with_header(true)
        .infer_schema(&mut cursor, None)?;
    cursor.seek(SeekFrom::Start(0))?;

    let time_idx = schema
        .index_of(TIME_COLUMN)
        .map_err(|_| Error::InvalidData(format!("missing '{}' column", TIME_COLUMN)))?;
    let fields: Vec<String> = schema
        .fields()
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != time_idx)
        .map(|(_, field)| field.name().clone())
        .collect();

    let reader = ReaderBuilder::new(Arc::new(schema.clone()))
        .with_header(true)
        .build(cursor)?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch?;

        let times = cast(batch.column(time_idx), &DataType::Int64)?;
        let times = times
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or_else(|| Error::Arrow("time column did not cast to Int64".into()))?;

        let columns = (0..batch.num_columns())
            .filter(|idx| *idx != time_idx)
            .map(|idx| cast(batch.column(idx), &DataType::Float64))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let columns = columns
            .iter()
            .map(|col| {
                col.as_any()
                    .downcast_ref::<Float64Array>()
                    .ok_or_else(|| Error::Arrow("value column did not cast to Float64".into()))
            })
            .collect::<Result<Vec<_>>>()?;

        for row in 0..batch.num_rows() {
            if times.is_null(row) {
                return Err(Error::InvalidData(format!("row {} has no time", rows.len())));
            }
            let values = columns
                .iter()
                .map(|col| (!col.is_null(row)).then(|| col.value(row)))
                .collect();
            rows.push((times.value(row), values));
        }
    }

    Ok(Observations { fields, rows })
}
