//! Per-catchment time series tables and their CSV/Parquet encodings.

use std::sync::Arc;

use arrow::array::{Array, AsArray, Float32Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Float32Type, Schema};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use forcing_common::{ForcingError, ForcingResult, ValidTime};
use ndarray::{concatenate, Array2, Axis};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;

pub const TIME_COLUMN: &str = "time";

/// `(time, var_1..var_n)` rows of one catchment, increasing in time.
#[derive(Debug, Clone, PartialEq)]
pub struct CatchmentTable {
    pub times: Vec<ValidTime>,
    pub columns: Vec<String>,
    /// `[time, variable]`
    pub values: Array2<f32>,
}

impl CatchmentTable {
    pub fn new(
        times: Vec<ValidTime>,
        columns: Vec<String>,
        values: Array2<f32>,
    ) -> ForcingResult<Self> {
        if values.dim() != (times.len(), columns.len()) {
            return Err(ForcingError::InvalidData(format!(
                "table values have shape {:?}, expected ({}, {})",
                values.dim(),
                times.len(),
                columns.len()
            )));
        }
        Ok(Self {
            times,
            columns,
            values,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.times.len()
    }

    /// Rows of `self` followed by the rows of `later`.
    pub fn append(&self, later: &CatchmentTable) -> ForcingResult<Self> {
        if self.columns != later.columns {
            return Err(ForcingError::InvalidData(format!(
                "columns {:?} do not match {:?}",
                self.columns, later.columns
            )));
        }
        let values = concatenate(Axis(0), &[self.values.view(), later.values.view()])
            .map_err(|e| ForcingError::InvalidData(e.to_string()))?;
        let mut times = self.times.clone();
        times.extend_from_slice(&later.times);
        Self::new(times, self.columns.clone(), values)
    }

    /// Mean of every column, NaN cells skipped.
    pub fn column_means(&self) -> Vec<f64> {
        self.values
            .axis_iter(Axis(1))
            .map(|col| {
                let finite: Vec<f64> = col.iter().filter(|v| !v.is_nan()).map(|&v| v as f64).collect();
                if finite.is_empty() {
                    f64::NAN
                } else {
                    finite.iter().sum::<f64>() / finite.len() as f64
                }
            })
            .collect()
    }

    /// Median of every column, NaN cells skipped.
    pub fn column_medians(&self) -> Vec<f64> {
        self.values
            .axis_iter(Axis(1))
            .map(|col| {
                let values: Vec<f64> = col.iter().filter(|v| !v.is_nan()).map(|&v| v as f64).collect();
                crate::metadata::median(&values)
            })
            .collect()
    }

    // ========================================================================
    // CSV
    // ========================================================================

    pub fn to_csv(&self) -> ForcingResult<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        let mut header = vec![TIME_COLUMN.to_string()];
        header.extend(self.columns.iter().cloned());
        writer.write_record(&header).map_err(csv_err)?;

        for (time, row) in self.times.iter().zip(self.values.rows()) {
            let mut record = Vec::with_capacity(row.len() + 1);
            record.push(time.to_string());
            record.extend(row.iter().map(|v| v.to_string()));
            writer.write_record(&record).map_err(csv_err)?;
        }
        writer
            .into_inner()
            .map_err(|e| ForcingError::Format(format!("CSV: {}", e)))
    }

    pub fn from_csv(data: &[u8]) -> ForcingResult<Self> {
        let mut reader = csv::Reader::from_reader(data);
        let header = reader.headers().map_err(csv_err)?.clone();
        let mut names = header.iter();
        if names.next() != Some(TIME_COLUMN) {
            return Err(ForcingError::Format(format!(
                "CSV must start with a '{}' column",
                TIME_COLUMN
            )));
        }
        let columns: Vec<String> = names.map(str::to_string).collect();

        let mut times = Vec::new();
        let mut flat = Vec::new();
        for record in reader.records() {
            let record = record.map_err(csv_err)?;
            if record.len() != columns.len() + 1 {
                return Err(ForcingError::Format(format!(
                    "CSV row has {} fields, expected {}",
                    record.len(),
                    columns.len() + 1
                )));
            }
            times.push(ValidTime::parse(&record[0])?);
            for field in record.iter().skip(1) {
                let value: f32 = field
                    .trim()
                    .parse()
                    .map_err(|_| ForcingError::Format(format!("bad CSV value '{}'", field)))?;
                flat.push(value);
            }
        }

        let values = Array2::from_shape_vec((times.len(), columns.len()), flat)
            .map_err(|e| ForcingError::Format(e.to_string()))?;
        Self::new(times, columns, values)
    }

    // ========================================================================
    // Parquet
    // ========================================================================

    fn schema(&self) -> Arc<Schema> {
        let mut fields = vec![Field::new(TIME_COLUMN, DataType::Utf8, false)];
        fields.extend(
            self.columns
                .iter()
                .map(|name| Field::new(name, DataType::Float32, true)),
        );
        Arc::new(Schema::new(fields))
    }

    pub fn to_parquet(&self) -> ForcingResult<Vec<u8>> {
        let schema = self.schema();
        let mut arrays: Vec<Arc<dyn Array>> = Vec::with_capacity(self.columns.len() + 1);
        arrays.push(Arc::new(StringArray::from_iter_values(
            self.times.iter().map(|t| t.to_string()),
        )));
        for col in self.values.axis_iter(Axis(1)) {
            arrays.push(Arc::new(Float32Array::from_iter_values(col.iter().copied())));
        }

        let batch = RecordBatch::try_new(schema.clone(), arrays).map_err(parquet_err)?;
        let mut buf = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buf, schema, None).map_err(parquet_err)?;
        writer.write(&batch).map_err(parquet_err)?;
        writer.close().map_err(parquet_err)?;
        Ok(buf)
    }

    pub fn from_parquet(data: Bytes) -> ForcingResult<Self> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(data).map_err(parquet_err)?;
        let columns: Vec<String> = builder
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        if columns.first().map(String::as_str) != Some(TIME_COLUMN) {
            return Err(ForcingError::Format(format!(
                "Parquet table must start with a '{}' column",
                TIME_COLUMN
            )));
        }
        let columns = columns[1..].to_vec();

        let mut times = Vec::new();
        let mut per_column: Vec<Vec<f32>> = vec![Vec::new(); columns.len()];
        for batch in builder.build().map_err(parquet_err)? {
            let batch = batch.map_err(parquet_err)?;
            let time = cast(batch.column(0), &DataType::Utf8).map_err(parquet_err)?;
            for t in time.as_string::<i32>().iter() {
                let t = t.ok_or_else(|| ForcingError::Format("null time".to_string()))?;
                times.push(ValidTime::parse(t)?);
            }
            for (i, out) in per_column.iter_mut().enumerate() {
                let column = cast(batch.column(i + 1), &DataType::Float32).map_err(parquet_err)?;
                let column = column.as_primitive::<Float32Type>();
                out.extend((0..column.len()).map(|r| {
                    if column.is_null(r) {
                        f32::NAN
                    } else {
                        column.value(r)
                    }
                }));
            }
        }

        let mut values = Array2::<f32>::zeros((times.len(), columns.len()));
        for (i, column) in per_column.into_iter().enumerate() {
            if column.len() != times.len() {
                return Err(ForcingError::Format("ragged Parquet columns".to_string()));
            }
            values
                .column_mut(i)
                .assign(&ndarray::Array1::from_vec(column));
        }
        Self::new(times, columns, values)
    }
}

fn csv_err(e: csv::Error) -> ForcingError {
    ForcingError::Format(format!("CSV: {}", e))
}

fn parquet_err(e: impl std::fmt::Display) -> ForcingError {
    ForcingError::Format(format!("Parquet: {}", e))
}
