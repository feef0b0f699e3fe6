//! Error types for the forcing engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using ForcingError.
pub type ForcingResult<T> = Result<T, ForcingError>;

/// Primary error type for forcing extraction and output.
#[derive(Debug, Error)]
pub enum ForcingError {
    // === Setup Errors ===
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Catchment '{catchment}' resolves to zero grid cells")]
    WeightResolution { catchment: String },

    #[error("Grid index {index} is outside the native grid of {size} cells")]
    IndexRange { index: u64, size: u64 },

    // === Data Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read '{source_id}': {message}")]
    RemoteRead { source_id: String, message: String },

    #[error("Missing variable or attribute '{name}' in {source_id}")]
    MissingVariable { name: String, source_id: String },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Cannot append to output of catchment '{catchment}': {message}")]
    AppendConsistency { catchment: String, message: String },

    // === Output Errors ===
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Format error: {0}")]
    Format(String),

    // === Infrastructure Errors ===
    #[error("Worker failed: {0}")]
    Worker(String),
}

impl ForcingError {
    /// Short machine-readable name of the error class, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            ForcingError::Configuration(_) => "configuration",
            ForcingError::WeightResolution { .. } => "weight_resolution",
            ForcingError::IndexRange { .. } => "index_range",
            ForcingError::Io(_) => "io",
            ForcingError::RemoteRead { .. } => "remote_read",
            ForcingError::MissingVariable { .. } => "missing_variable",
            ForcingError::InvalidData(_) => "invalid_data",
            ForcingError::AppendConsistency { .. } => "append_consistency",
            ForcingError::Storage(_) => "storage",
            ForcingError::Format(_) => "format",
            ForcingError::Worker(_) => "worker",
        }
    }

    /// Process exit code for this error.
    ///
    /// Setup errors (nothing was processed) exit with 2, failures during
    /// processing exit with 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            ForcingError::Configuration(_)
            | ForcingError::WeightResolution { .. }
            | ForcingError::IndexRange { .. } => 2,
            _ => 1,
        }
    }
}

impl From<serde_json::Error> for ForcingError {
    fn from(err: serde_json::Error) -> Self {
        ForcingError::Format(format!("JSON error: {}", err))
    }
}

/// Serializable form of a [`ForcingError`], passed back from worker processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorReport {
    Configuration { message: String },
    WeightResolution { catchment: String },
    IndexRange { index: u64, size: u64 },
    Io { message: String },
    RemoteRead { source_id: String, message: String },
    MissingVariable { name: String, source_id: String },
    InvalidData { message: String },
    AppendConsistency { catchment: String, message: String },
    Storage { message: String },
    Format { message: String },
    Worker { message: String },
}

impl From<&ForcingError> for ErrorReport {
    fn from(err: &ForcingError) -> Self {
        match err {
            ForcingError::Configuration(m) => ErrorReport::Configuration { message: m.clone() },
            ForcingError::WeightResolution { catchment } => ErrorReport::WeightResolution {
                catchment: catchment.clone(),
            },
            ForcingError::IndexRange { index, size } => ErrorReport::IndexRange {
                index: *index,
                size: *size,
            },
            ForcingError::Io(e) => ErrorReport::Io { message: e.to_string() },
            ForcingError::RemoteRead { source_id, message } => ErrorReport::RemoteRead {
                source_id: source_id.clone(),
                message: message.clone(),
            },
            ForcingError::MissingVariable { name, source_id } => ErrorReport::MissingVariable {
                name: name.clone(),
                source_id: source_id.clone(),
            },
            ForcingError::InvalidData(m) => ErrorReport::InvalidData { message: m.clone() },
            ForcingError::AppendConsistency { catchment, message } => {
                ErrorReport::AppendConsistency {
                    catchment: catchment.clone(),
                    message: message.clone(),
                }
            }
            ForcingError::Storage(m) => ErrorReport::Storage { message: m.clone() },
            ForcingError::Format(m) => ErrorReport::Format { message: m.clone() },
            ForcingError::Worker(m) => ErrorReport::Worker { message: m.clone() },
        }
    }
}

impl From<ErrorReport> for ForcingError {
    fn from(report: ErrorReport) -> Self {
        match report {
            ErrorReport::Configuration { message } => ForcingError::Configuration(message),
            ErrorReport::WeightResolution { catchment } => {
                ForcingError::WeightResolution { catchment }
            }
            ErrorReport::IndexRange { index, size } => ForcingError::IndexRange { index, size },
            ErrorReport::Io { message } => ForcingError::Io(std::io::Error::other(message)),
            ErrorReport::RemoteRead { source_id, message } => {
                ForcingError::RemoteRead { source_id, message }
            }
            ErrorReport::MissingVariable { name, source_id } => {
                ForcingError::MissingVariable { name, source_id }
            }
            ErrorReport::InvalidData { message } => ForcingError::InvalidData(message),
            ErrorReport::AppendConsistency { catchment, message } => {
                ForcingError::AppendConsistency { catchment, message }
            }
            ErrorReport::Storage { message } => ForcingError::Storage(message),
            ErrorReport::Format { message } => ForcingError::Format(message),
            ErrorReport::Worker { message } => ForcingError::Worker(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_errors_exit_with_two() {
        assert_eq!(ForcingError::Configuration("x".into()).exit_code(), 2);
        assert_eq!(
            ForcingError::WeightResolution { catchment: "cat-1".into() }.exit_code(),
            2
        );
        assert_eq!(ForcingError::IndexRange { index: 9, size: 4 }.exit_code(), 2);
        assert_eq!(ForcingError::Storage("down".into()).exit_code(), 1);
    }

    #[test]
    fn test_display() {
        let err = ForcingError::WeightResolution { catchment: "cat-7".into() };
        assert_eq!(err.to_string(), "Catchment 'cat-7' resolves to zero grid cells");

        let err = ForcingError::IndexRange { index: 20, size: 16 };
        assert_eq!(
            err.to_string(),
            "Grid index 20 is outside the native grid of 16 cells"
        );
        assert_eq!(err.kind(), "index_range");
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_bounds<T: Send + Sync + std::error::Error>() {}
        assert_bounds::<ForcingError>();
    }

    #[test]
    fn test_report_keeps_variant_through_json() {
        let err = ForcingError::MissingVariable {
            name: "T2D".into(),
            source_id: "nwm.t00z.f001.nc".into(),
        };
        let json = serde_json::to_string(&ErrorReport::from(&err)).unwrap();
        assert!(json.contains(r#""kind":"missing_variable""#));

        let back = ForcingError::from(serde_json::from_str::<ErrorReport>(&json).unwrap());
        assert_eq!(back.to_string(), err.to_string());
        assert_eq!(back.kind(), "missing_variable");
    }
}
