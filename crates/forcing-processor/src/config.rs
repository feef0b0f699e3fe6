//! Run configuration.
//!
//! The JSON document has three sections (`forcing`, `storage`, `run`). It is
//! parsed into [`ForcingProcessorConfig`] and resolved once by
//! [`ForcingProcessorConfig::validate`] into a [`RunConfig`] where every
//! string-valued option has become an enum.

use std::path::Path;
use std::time::Duration;

use forcing_common::{ForcingError, ForcingResult, GridSpec};
use serde::{Deserialize, Serialize};
use storage::{ForcingSource, ObjectStorageConfig, StorageKind};

use crate::partition::CostModel;

/// One value or a list of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s.clone()],
            OneOrMany::Many(v) => v.clone(),
        }
    }
}

/// Configuration document as received.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForcingProcessorConfig {
    pub forcing: ForcingSection,
    pub storage: StorageSection,
    #[serde(default)]
    pub run: RunSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForcingSection {
    /// Newline-delimited list of forcing file identifiers
    pub nwm_file: String,
    /// Weight sources, one per spatial region
    pub gpkg_file: OneOrMany,
    /// Native grid; NWM CONUS when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid: Option<GridSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_type: Option<String>,
    pub output_path: String,
    pub output_file_type: OneOrMany,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSection {
    #[serde(default)]
    pub verbose: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collect_stats: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nprocs: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nfile_chunk: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_delay_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_cost_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catchment_cost_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

/// Output format of per-catchment series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Csv,
    Parquet,
    Tar,
    Netcdf,
}

impl OutputFormat {
    pub fn parse(value: &str) -> ForcingResult<Self> {
        match value.to_ascii_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "parquet" => Ok(OutputFormat::Parquet),
            "tar" => Ok(OutputFormat::Tar),
            "netcdf" | "nc" => Ok(OutputFormat::Netcdf),
            other => Err(ForcingError::Configuration(format!(
                "unknown output_file_type '{}', expected csv, parquet, tar or netcdf",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Parquet => "parquet",
            OutputFormat::Tar => "tar",
            OutputFormat::Netcdf => "netcdf",
        }
    }
}

/// Kind of a weight source, resolved from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightFormat {
    Json,
    Parquet,
    Csv,
    Geopackage,
}

/// A weight source for one spatial region.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightSource {
    pub source: ForcingSource,
    pub format: WeightFormat,
    /// Region name, the file stem
    pub region: String,
}

impl WeightSource {
    pub fn parse(id: &str) -> ForcingResult<Self> {
        let source = ForcingSource::parse(id)?;
        let format = match source.extension().as_deref() {
            Some("json") => WeightFormat::Json,
            Some("parquet") => WeightFormat::Parquet,
            Some("csv") => WeightFormat::Csv,
            Some("gpkg") => WeightFormat::Geopackage,
            _ => {
                return Err(ForcingError::Configuration(format!(
                    "cannot determine weight source type of '{}'",
                    id
                )))
            }
        };
        let region = source.stem();
        Ok(Self {
            source,
            format,
            region,
        })
    }
}

/// Validated configuration of one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub file_list: ForcingSource,
    pub weight_sources: Vec<WeightSource>,
    pub grid: GridSpec,
    pub storage: ObjectStorageConfig,
    pub output_formats: Vec<OutputFormat>,
    pub verbose: bool,
    pub collect_stats: bool,
    pub nprocs: usize,
    pub nfile_chunk: usize,
    pub file_cost: CostModel,
    pub catchment_cost: CostModel,
    pub request_timeout: Duration,
    /// The document this config was resolved from
    pub document: ForcingProcessorConfig,
}

impl RunConfig {
    pub fn wants(&self, format: OutputFormat) -> bool {
        self.output_formats.contains(&format)
    }
}

impl ForcingProcessorConfig {
    /// Load a configuration document from a JSON file.
    pub fn from_file(path: &Path) -> ForcingResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ForcingError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> ForcingResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| ForcingError::Configuration(format!("invalid configuration: {}", e)))
    }

    /// Apply `FP_NPROCS`, `FP_NFILE_CHUNK` and `FP_VERBOSE` from the environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub(crate) fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("FP_NPROCS") {
            if let Ok(n) = val.parse() {
                self.run.nprocs = Some(n);
            }
        }

        if let Some(val) = lookup("FP_NFILE_CHUNK") {
            if let Ok(n) = val.parse() {
                self.run.nfile_chunk = Some(n);
            }
        }

        if let Some(val) = lookup("FP_VERBOSE") {
            self.run.verbose = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Resolve and check every option.
    pub fn validate(&self) -> ForcingResult<RunConfig> {
        if self.forcing.nwm_file.trim().is_empty() {
            return Err(ForcingError::Configuration(
                "forcing.nwm_file is required".to_string(),
            ));
        }
        let file_list = ForcingSource::parse(&self.forcing.nwm_file)?;

        let weight_ids = self.forcing.gpkg_file.to_vec();
        if weight_ids.is_empty() {
            return Err(ForcingError::Configuration(
                "forcing.gpkg_file lists no weight sources".to_string(),
            ));
        }
        let weight_sources = weight_ids
            .iter()
            .map(|id| WeightSource::parse(id))
            .collect::<ForcingResult<Vec<_>>>()?;

        let grid = self.forcing.grid.unwrap_or_default();
        if grid.is_empty() {
            return Err(ForcingError::Configuration(
                "forcing.grid must have non-zero ny and nx".to_string(),
            ));
        }

        let output_path = self.storage.output_path.trim();
        if output_path.is_empty() {
            return Err(ForcingError::Configuration(
                "storage.output_path is required".to_string(),
            ));
        }
        let kind = match &self.storage.storage_type {
            Some(value) => StorageKind::parse(value)?,
            None => StorageKind::infer(output_path),
        };
        let storage = ObjectStorageConfig::from_output_path(output_path, kind)?;

        let mut output_formats = Vec::new();
        for value in self.storage.output_file_type.to_vec() {
            let format = OutputFormat::parse(&value)?;
            if !output_formats.contains(&format) {
                output_formats.push(format);
            }
        }
        if output_formats.is_empty() {
            return Err(ForcingError::Configuration(
                "storage.output_file_type lists no formats".to_string(),
            ));
        }

        let nprocs = self.run.nprocs.unwrap_or_else(default_nprocs);
        if nprocs == 0 {
            return Err(ForcingError::Configuration(
                "run.nprocs must be at least 1".to_string(),
            ));
        }
        let nfile_chunk = self.run.nfile_chunk.unwrap_or(DEFAULT_NFILE_CHUNK);
        if nfile_chunk == 0 {
            return Err(ForcingError::Configuration(
                "run.nfile_chunk must be at least 1".to_string(),
            ));
        }

        let launch_delay = self.run.launch_delay_secs.unwrap_or(CostModel::DEFAULT_LAUNCH_DELAY);
        let file_cost = CostModel::new(
            launch_delay,
            self.run.file_cost_secs.unwrap_or(CostModel::DEFAULT_ITEM_COST),
        )?;
        let catchment_cost = CostModel::new(
            launch_delay,
            self.run.catchment_cost_secs.unwrap_or(CostModel::DEFAULT_ITEM_COST),
        )?;

        Ok(RunConfig {
            file_list,
            weight_sources,
            grid,
            storage,
            output_formats,
            verbose: self.run.verbose,
            collect_stats: self.run.collect_stats.unwrap_or(true),
            nprocs,
            nfile_chunk,
            file_cost,
            catchment_cost,
            request_timeout: Duration::from_secs(
                self.run.request_timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            document: self.clone(),
        })
    }
}

/// Default maximum number of files per chunk (effectively one chunk).
pub const DEFAULT_NFILE_CHUNK: usize = 1_000_000;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 600;

fn default_nprocs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MINIMAL: &str = r#"{
        "forcing": {"nwm_file": "/data/files.txt", "gpkg_file": "/data/vpu09_weights.json"},
        "storage": {"output_path": "/data/out", "output_file_type": ["csv", "parquet"]},
        "run": {"nprocs": 4}
    }"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = ForcingProcessorConfig::from_json_str(MINIMAL).unwrap();
        let run = config.validate().unwrap();

        assert_eq!(run.grid, GridSpec::nwm_conus());
        assert_eq!(run.storage.kind, StorageKind::Local);
        assert_eq!(run.output_formats, vec![OutputFormat::Csv, OutputFormat::Parquet]);
        assert_eq!(run.nprocs, 4);
        assert_eq!(run.nfile_chunk, DEFAULT_NFILE_CHUNK);
        assert!(run.collect_stats);
        assert!(!run.verbose);
        assert_eq!(run.weight_sources[0].format, WeightFormat::Json);
        assert_eq!(run.weight_sources[0].region, "vpu09_weights");
    }

    #[test]
    fn test_missing_section_is_configuration_error() {
        let result = ForcingProcessorConfig::from_json_str(r#"{"forcing": {}}"#);
        assert!(matches!(result, Err(ForcingError::Configuration(_))));
    }

    #[test]
    fn test_unknown_output_type_rejected() {
        let text = MINIMAL.replace(r#"["csv", "parquet"]"#, r#"["csv", "zarr"]"#);
        let config = ForcingProcessorConfig::from_json_str(&text).unwrap();
        assert!(matches!(config.validate(), Err(ForcingError::Configuration(_))));
    }

    #[test]
    fn test_unknown_storage_type_rejected() {
        let mut config = ForcingProcessorConfig::from_json_str(MINIMAL).unwrap();
        config.storage.storage_type = Some("azure".into());
        assert!(matches!(config.validate(), Err(ForcingError::Configuration(_))));
    }

    #[test]
    fn test_s3_inferred_from_output_path() {
        let mut config = ForcingProcessorConfig::from_json_str(MINIMAL).unwrap();
        config.storage.output_path = "s3://ngen-runs/vpu09".into();
        let run = config.validate().unwrap();
        assert_eq!(run.storage.kind, StorageKind::S3);
        assert_eq!(run.storage.root, "ngen-runs");
    }

    #[test]
    fn test_weight_source_kinds() {
        assert_eq!(WeightSource::parse("a.parquet").unwrap().format, WeightFormat::Parquet);
        assert_eq!(WeightSource::parse("a.CSV").unwrap().format, WeightFormat::Csv);
        assert_eq!(
            WeightSource::parse("s3://b/hf/nextgen_09.gpkg").unwrap().format,
            WeightFormat::Geopackage
        );
        assert!(matches!(
            WeightSource::parse("weights.shp"),
            Err(ForcingError::Configuration(_))
        ));
    }

    #[test]
    fn test_gpkg_file_list() {
        let text = MINIMAL.replace(
            r#""/data/vpu09_weights.json""#,
            r#"["/data/a.json", "/data/b.csv"]"#,
        );
        let run = ForcingProcessorConfig::from_json_str(&text)
            .unwrap()
            .validate()
            .unwrap();
        let regions: Vec<_> = run.weight_sources.iter().map(|w| w.region.as_str()).collect();
        assert_eq!(regions, vec!["a", "b"]);
    }

    #[test]
    fn test_zero_nprocs_rejected() {
        let mut config = ForcingProcessorConfig::from_json_str(MINIMAL).unwrap();
        config.run.nprocs = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ForcingProcessorConfig::from_json_str(MINIMAL).unwrap();
        let env: HashMap<&str, &str> = [("FP_NPROCS", "2"), ("FP_NFILE_CHUNK", "10"), ("FP_VERBOSE", "true")]
            .into_iter()
            .collect();
        config.apply_overrides_from(|key| env.get(key).map(|v| v.to_string()));

        let run = config.validate().unwrap();
        assert_eq!(run.nprocs, 2);
        assert_eq!(run.nfile_chunk, 10);
        assert!(run.verbose);
    }

    #[test]
    fn test_grid_override() {
        let text = MINIMAL.replace(
            r#""gpkg_file": "/data/vpu09_weights.json""#,
            r#""gpkg_file": "/data/w.json", "grid": {"ny": 4, "nx": 4, "flip_rows": false}"#,
        );
        let run = ForcingProcessorConfig::from_json_str(&text)
            .unwrap()
            .validate()
            .unwrap();
        assert_eq!(run.grid.ny, 4);
        assert!(!run.grid.flip_rows);
    }
}
