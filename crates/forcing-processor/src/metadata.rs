//! Run summary statistics and metadata tables.

use std::fmt::Display;
use std::io::Write;
use std::sync::Arc;

use arrow::array::{Array, Float64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use flate2::write::GzEncoder;
use flate2::Compression;
use forcing_common::{ForcingError, ForcingResult};
use parquet::arrow::ArrowWriter;
use serde::Serialize;

/// Number of inputs and outputs sampled for size statistics.
pub const SAMPLE_SIZE: usize = 10;

/// Mean, median and population standard deviation of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SampleStats {
    pub mean: f64,
    pub median: f64,
    pub std: f64,
}

impl SampleStats {
    /// Statistics of `values`, all NaN when empty.
    pub fn of(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self {
                mean: f64::NAN,
                median: f64::NAN,
                std: f64::NAN,
            };
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean,
            median: median(values),
            std: var.sqrt(),
        }
    }
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Size of `data` after gzip compression.
pub fn gzip_size(data: &[u8]) -> ForcingResult<u64> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?.len() as u64)
}

/// Ordered `key,value` rows of `metadata.csv`.
#[derive(Debug, Clone, Default)]
pub struct MetadataTable {
    rows: Vec<(String, String)>,
}

impl MetadataTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: &str, value: impl Display) {
        self.rows.push((key.to_string(), value.to_string()));
    }

    /// Add `<key>_mean`, `<key>_median` and `<key>_std`.
    pub fn push_stats(&mut self, key: &str, stats: SampleStats) {
        self.push(&format!("{}_mean", key), stats.mean);
        self.push(&format!("{}_median", key), stats.median);
        self.push(&format!("{}_std", key), stats.std);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.rows
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn rows(&self) -> &[(String, String)] {
        &self.rows
    }

    pub fn to_csv(&self) -> ForcingResult<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(["key", "value"]).map_err(csv_err)?;
        for (key, value) in &self.rows {
            writer.write_record([key, value]).map_err(csv_err)?;
        }
        writer
            .into_inner()
            .map_err(|e| ForcingError::Format(format!("CSV: {}", e)))
    }
}

/// One statistic of every variable for every catchment.
#[derive(Debug, Clone, PartialEq)]
pub struct CatchmentSummary {
    pub ids: Vec<String>,
    pub columns: Vec<String>,
    /// One row per catchment, one value per column
    pub rows: Vec<Vec<f64>>,
}

impl CatchmentSummary {
    pub fn to_csv(&self) -> ForcingResult<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        let mut header = vec!["catchment_id".to_string()];
        header.extend(self.columns.iter().cloned());
        writer.write_record(&header).map_err(csv_err)?;
        for (id, row) in self.ids.iter().zip(&self.rows) {
            let mut record = vec![id.clone()];
            record.extend(row.iter().map(|v| v.to_string()));
            writer.write_record(&record).map_err(csv_err)?;
        }
        writer
            .into_inner()
            .map_err(|e| ForcingError::Format(format!("CSV: {}", e)))
    }

    pub fn to_parquet(&self) -> ForcingResult<Vec<u8>> {
        let mut fields = vec![Field::new("catchment_id", DataType::Utf8, false)];
        fields.extend(
            self.columns
                .iter()
                .map(|c| Field::new(c, DataType::Float64, true)),
        );
        let schema = Arc::new(Schema::new(fields));

        let mut arrays: Vec<Arc<dyn Array>> =
            vec![Arc::new(StringArray::from_iter_values(self.ids.iter()))];
        for c in 0..self.columns.len() {
            arrays.push(Arc::new(Float64Array::from_iter_values(
                self.rows.iter().map(|row| row.get(c).copied().unwrap_or(f64::NAN)),
            )));
        }

        let batch = RecordBatch::try_new(schema.clone(), arrays).map_err(parquet_err)?;
        let mut buf = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buf, schema, None).map_err(parquet_err)?;
        writer.write(&batch).map_err(parquet_err)?;
        writer.close().map_err(parquet_err)?;
        Ok(buf)
    }
}

fn csv_err(e: csv::Error) -> ForcingError {
    ForcingError::Format(format!("CSV: {}", e))
}

fn parquet_err(e: impl Display) -> ForcingError {
    ForcingError::Format(format!("Parquet: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_stats() {
        let stats = SampleStats::of(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(stats.mean, 5.0);
        assert_eq!(stats.median, 4.5);
        assert_eq!(stats.std, 2.0);
        assert!(SampleStats::of(&[]).mean.is_nan());
    }

    #[test]
    fn test_median_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
    }

    #[test]
    fn test_gzip_shrinks_repetitive_data() {
        let data = vec![b'a'; 10_000];
        let size = gzip_size(&data).unwrap();
        assert!(size > 0 && size < 200);
    }

    #[test]
    fn test_metadata_csv() {
        let mut table = MetadataTable::new();
        table.push("files", 2);
        table.push_stats("size", SampleStats::of(&[1.0, 3.0]));
        assert_eq!(table.get("size_median"), Some("2"));

        let text = String::from_utf8(table.to_csv().unwrap()).unwrap();
        assert!(text.starts_with("key,value\nfiles,2\nsize_mean,2\n"));
    }

    #[test]
    fn test_summary_csv() {
        let summary = CatchmentSummary {
            ids: vec!["cat-1".into(), "cat-2".into()],
            columns: vec!["a".into(), "b".into()],
            rows: vec![vec![1.5, 2.0], vec![3.0, 4.25]],
        };
        let text = String::from_utf8(summary.to_csv().unwrap()).unwrap();
        assert_eq!(text, "catchment_id,a,b\ncat-1,1.5,2\ncat-2,3,4.25\n");
        assert!(!summary.to_parquet().unwrap().is_empty());
    }
}
