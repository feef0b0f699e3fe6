//! Catchment to grid-cell weight tables.
//!
//! A weight table maps each catchment id to the flat indices of the grid cells
//! it intersects and the fraction of each cell it covers. Tables are loaded
//! from JSON, CSV, Parquet or a GeoPackage `forcing-weights` layer, one table
//! per spatial region, and merged in region order.

use std::collections::HashMap;
use std::path::Path;

use arrow::array::{Array, AsArray};
use arrow::record_batch::RecordBatch;
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int64Type};
use bytes::Bytes;
use forcing_common::{ForcingError, ForcingResult};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use storage::{FetchedSource, SourceFetcher};
use tracing::{debug, info, warn};

use crate::config::{WeightFormat, WeightSource};

/// Name of the precomputed weight layer in a hydrofabric GeoPackage.
pub const GPKG_WEIGHTS_LAYER: &str = "forcing-weights";

const ID_COLUMN: &str = "divide_id";
const CELL_COLUMN: &str = "cell";
const FRACTION_COLUMN: &str = "coverage_fraction";

/// Grid cells of one catchment with their coverage fractions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WeightEntry {
    pub cells: Vec<u64>,
    pub fractions: Vec<f64>,
}

impl WeightEntry {
    pub fn new(cells: Vec<u64>, fractions: Vec<f64>) -> Self {
        Self { cells, fractions }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Sum of coverage fractions.
    pub fn total_fraction(&self) -> f64 {
        self.fractions.iter().sum()
    }

    fn check(&self, catchment: &str) -> ForcingResult<()> {
        if self.cells.len() != self.fractions.len() {
            return Err(ForcingError::InvalidData(format!(
                "catchment '{}' has {} cells but {} coverage fractions",
                catchment,
                self.cells.len(),
                self.fractions.len()
            )));
        }
        if self.cells.is_empty() {
            return Err(ForcingError::WeightResolution {
                catchment: catchment.to_string(),
            });
        }
        if self.fractions.iter().any(|f| !f.is_finite() || *f < 0.0) {
            return Err(ForcingError::InvalidData(format!(
                "catchment '{}' has a negative or non-finite coverage fraction",
                catchment
            )));
        }
        if self.total_fraction() <= 0.0 {
            return Err(ForcingError::WeightResolution {
                catchment: catchment.to_string(),
            });
        }
        Ok(())
    }
}

/// Ordered mapping `catchment_id -> WeightEntry`.
///
/// Iteration order is insertion order. Each catchment remembers the region it
/// was loaded from.
#[derive(Debug, Clone, Default)]
pub struct WeightTable {
    ids: Vec<String>,
    entries: Vec<WeightEntry>,
    regions: Vec<String>,
    positions: HashMap<String, usize>,
}

impl WeightTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a catchment. Returns `false` (and keeps the existing entry) when
    /// the id is already present.
    pub fn insert(
        &mut self,
        id: impl Into<String>,
        entry: WeightEntry,
        region: impl Into<String>,
    ) -> ForcingResult<bool> {
        let id = id.into();
        entry.check(&id)?;
        if self.positions.contains_key(&id) {
            return Ok(false);
        }
        self.positions.insert(id.clone(), self.ids.len());
        self.ids.push(id);
        self.entries.push(entry);
        self.regions.push(region.into());
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn entries(&self) -> &[WeightEntry] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&WeightEntry> {
        self.positions.get(id).map(|&i| &self.entries[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &WeightEntry)> {
        self.ids.iter().map(String::as_str).zip(self.entries.iter())
    }

    /// Catchment positions grouped by region, regions in first-seen order.
    pub fn regions(&self) -> Vec<(String, Vec<usize>)> {
        let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
        for (i, region) in self.regions.iter().enumerate() {
            match groups.iter_mut().find(|(name, _)| name == region) {
                Some((_, members)) => members.push(i),
                None => groups.push((region.clone(), vec![i])),
            }
        }
        groups
    }

    /// Union of several tables in order.
    ///
    /// Regions are expected to have disjoint catchment ids. When an id repeats,
    /// the first table holding it wins and the repeat is logged.
    pub fn merge(tables: Vec<WeightTable>) -> WeightTable {
        let mut merged = WeightTable::new();
        for table in tables {
            for ((id, entry), region) in table
                .ids
                .into_iter()
                .zip(table.entries)
                .zip(table.regions)
            {
                if merged.positions.contains_key(&id) {
                    warn!(catchment = %id, region = %region, "Duplicate catchment id, keeping first");
                    continue;
                }
                merged.positions.insert(id.clone(), merged.ids.len());
                merged.ids.push(id);
                merged.entries.push(entry);
                merged.regions.push(region);
            }
        }
        merged
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// Load the weight table of one source.
    pub async fn load(source: &WeightSource, fetcher: &SourceFetcher) -> ForcingResult<Self> {
        let table = match source.format {
            WeightFormat::Json => {
                let bytes = fetcher.fetch_bytes(&source.source).await?;
                let text = std::str::from_utf8(&bytes).map_err(|e| {
                    ForcingError::Format(format!("{} is not UTF-8: {}", source.source.id(), e))
                })?;
                Self::from_json_str(text, &source.region)?
            }
            WeightFormat::Csv => {
                let bytes = fetcher.fetch_bytes(&source.source).await?;
                Self::from_csv_reader(bytes.as_ref(), &source.region)?
            }
            WeightFormat::Parquet => {
                let bytes = fetcher.fetch_bytes(&source.source).await?;
                Self::from_parquet_bytes(bytes, &source.region)?
            }
            WeightFormat::Geopackage => match fetcher.fetch(&source.source).await? {
                FetchedSource::Path(path) => Self::from_geopackage(&path, &source.region).await?,
                FetchedSource::Bytes(bytes) => {
                    let temp = tempfile::Builder::new().suffix(".gpkg").tempfile()?;
                    std::fs::write(temp.path(), &bytes)?;
                    Self::from_geopackage(temp.path(), &source.region).await?
                }
            },
        };

        info!(
            source = %source.source.id(),
            region = %source.region,
            catchments = table.len(),
            "Loaded weights"
        );
        Ok(table)
    }

    /// Parse `{catchment_id: [[cell, ...], [fraction, ...]]}`.
    pub fn from_json_str(text: &str, region: &str) -> ForcingResult<Self> {
        let root: Value = serde_json::from_str(text)?;
        let object = root.as_object().ok_or_else(|| {
            ForcingError::Format("weight JSON must be an object keyed by catchment id".to_string())
        })?;

        let mut table = WeightTable::new();
        for (id, value) in object {
            let (cells, fractions): (Vec<u64>, Vec<f64>) = serde_json::from_value(value.clone())
                .map_err(|e| {
                    ForcingError::Format(format!("weights of '{}' are malformed: {}", id, e))
                })?;
            table.insert(id.as_str(), WeightEntry::new(cells, fractions), region)?;
        }
        Ok(table)
    }

    /// Parse a `divide_id,cell,coverage_fraction` CSV with a header row.
    pub fn from_csv_reader<R: std::io::Read>(reader: R, region: &str) -> ForcingResult<Self> {
        let mut reader = csv::Reader::from_reader(reader);
        let headers = reader
            .headers()
            .map_err(|e| ForcingError::Format(format!("weight CSV header: {}", e)))?
            .clone();
        let column = |name: &str| {
            headers.iter().position(|h| h.trim() == name).ok_or_else(|| {
                ForcingError::Format(format!("weight CSV has no '{}' column", name))
            })
        };
        let (id_col, cell_col, frac_col) =
            (column(ID_COLUMN)?, column(CELL_COLUMN)?, column(FRACTION_COLUMN)?);

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| ForcingError::Format(format!("weight CSV: {}", e)))?;
            let field = |i: usize| record.get(i).unwrap_or("").trim();
            let cell = parse_cell(field(cell_col))?;
            let fraction: f64 = field(frac_col).parse().map_err(|_| {
                ForcingError::Format(format!("bad coverage fraction '{}'", field(frac_col)))
            })?;
            rows.push((field(id_col).to_string(), cell, fraction));
        }
        Self::from_rows(rows, region)
    }

    /// Parse a Parquet table with `divide_id`, `cell`, `coverage_fraction`.
    pub fn from_parquet_bytes(bytes: Bytes, region: &str) -> ForcingResult<Self> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)
            .map_err(|e| ForcingError::Format(format!("weight Parquet: {}", e)))?;
        let reader = builder
            .build()
            .map_err(|e| ForcingError::Format(format!("weight Parquet: {}", e)))?;

        let mut rows = Vec::new();
        for batch in reader {
            let batch = batch.map_err(|e| ForcingError::Format(format!("weight Parquet: {}", e)))?;
            append_batch_rows(&batch, &mut rows)?;
        }
        Self::from_rows(rows, region)
    }

    /// Read the precomputed weight layer of a GeoPackage.
    pub async fn from_geopackage(path: &Path, region: &str) -> ForcingResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| {
                ForcingError::Configuration(format!("cannot open {}: {}", path.display(), e))
            })?;

        let layer: Option<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?",
        )
        .bind(GPKG_WEIGHTS_LAYER)
        .fetch_optional(&pool)
        .await
        .map_err(|e| ForcingError::Format(format!("GeoPackage: {}", e)))?;

        if layer.is_none() {
            pool.close().await;
            return Err(ForcingError::Configuration(format!(
                "{} has no '{}' layer; compute weights from the geometry first",
                path.display(),
                GPKG_WEIGHTS_LAYER
            )));
        }

        let rows: Vec<(String, i64, f64)> = sqlx::query_as(
            r#"
            SELECT CAST(divide_id AS TEXT), CAST(cell AS INTEGER), CAST(coverage_fraction AS REAL)
            FROM "forcing-weights"
            "#,
        )
        .fetch_all(&pool)
        .await
        .map_err(|e| ForcingError::Format(format!("GeoPackage weights: {}", e)))?;
        pool.close().await;

        let mut converted = Vec::with_capacity(rows.len());
        for (id, cell, fraction) in rows {
            let cell = u64::try_from(cell)
                .map_err(|_| ForcingError::InvalidData(format!("negative cell index {}", cell)))?;
            converted.push((id, cell, fraction));
        }
        debug!(path = %path.display(), rows = converted.len(), "Read GeoPackage weights");
        Self::from_rows(converted, region)
    }

    /// Group `(id, cell, fraction)` rows by id in first-appearance order.
    fn from_rows(rows: Vec<(String, u64, f64)>, region: &str) -> ForcingResult<Self> {
        let mut order: Vec<String> = Vec::new();
        let mut grouped: HashMap<String, WeightEntry> = HashMap::new();
        for (id, cell, fraction) in rows {
            if id.is_empty() {
                return Err(ForcingError::Format("empty catchment id in weights".to_string()));
            }
            let entry = grouped.entry(id.clone()).or_insert_with(|| {
                order.push(id);
                WeightEntry::default()
            });
            entry.cells.push(cell);
            entry.fractions.push(fraction);
        }

        let mut table = WeightTable::new();
        for id in order {
            let entry = grouped.remove(&id).unwrap_or_default();
            table.insert(id, entry, region)?;
        }
        Ok(table)
    }
}

fn parse_cell(text: &str) -> ForcingResult<u64> {
    if let Ok(cell) = text.parse::<u64>() {
        return Ok(cell);
    }
    // tables written from float columns carry `123.0`
    match text.parse::<f64>() {
        Ok(v) if v >= 0.0 && v.fract() == 0.0 => Ok(v as u64),
        _ => Err(ForcingError::Format(format!("bad cell index '{}'", text))),
    }
}

fn append_batch_rows(batch: &RecordBatch, rows: &mut Vec<(String, u64, f64)>) -> ForcingResult<()> {
    let column = |name: &str, to: &DataType| {
        let array = batch.column_by_name(name).ok_or_else(|| {
            ForcingError::Format(format!("weight Parquet has no '{}' column", name))
        })?;
        cast(array, to).map_err(|e| ForcingError::Format(format!("column '{}': {}", name, e)))
    };

    let ids = column(ID_COLUMN, &DataType::Utf8)?;
    let cells = column(CELL_COLUMN, &DataType::Int64)?;
    let fractions = column(FRACTION_COLUMN, &DataType::Float64)?;

    let ids = ids.as_string::<i32>();
    let cells = cells.as_primitive::<Int64Type>();
    let fractions = fractions.as_primitive::<Float64Type>();

    for i in 0..batch.num_rows() {
        if ids.is_null(i) || cells.is_null(i) || fractions.is_null(i) {
            return Err(ForcingError::Format(format!("null weight value in row {}", i)));
        }
        let cell = u64::try_from(cells.value(i)).map_err(|_| {
            ForcingError::InvalidData(format!("negative cell index {}", cells.value(i)))
        })?;
        rows.push((ids.value(i).to_string(), cell, fractions.value(i)));
    }
    Ok(())
}
