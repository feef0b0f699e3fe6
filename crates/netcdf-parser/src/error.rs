//! Error types for NetCDF parsing operations.

use forcing_common::ForcingError;
use thiserror::Error;

/// Result type for NetCDF parser operations.
pub type NetCdfResult<T> = Result<T, NetCdfError>;

/// Error types for NetCDF parsing.
#[derive(Error, Debug)]
pub enum NetCdfError {
    /// File I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Missing required variable or attribute
    #[error("Missing '{name}' in {source_id}")]
    MissingData { name: String, source_id: String },

    /// Invalid data format
    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    /// Error raised by libnetcdf
    #[error("NetCDF library error: {0}")]
    Library(#[from] netcdf::Error),
}

impl NetCdfError {
    pub fn missing(name: impl Into<String>, source_id: impl Into<String>) -> Self {
        NetCdfError::MissingData {
            name: name.into(),
            source_id: source_id.into(),
        }
    }
}

impl From<NetCdfError> for ForcingError {
    fn from(err: NetCdfError) -> Self {
        match err {
            NetCdfError::IoError(e) => ForcingError::Io(e),
            NetCdfError::MissingData { name, source_id } => {
                ForcingError::MissingVariable { name, source_id }
            }
            NetCdfError::InvalidFormat(msg) => ForcingError::InvalidData(msg),
            NetCdfError::Library(e) => ForcingError::Format(format!("NetCDF: {}", e)),
        }
    }
}
