//! Low-level helpers around the native netcdf library.
//!
//! The netcdf library requires a file path (it wraps libnetcdf/HDF5 which need
//! file handles). When reading from or writing to bytes, we go through a temp
//! file first.
//!
//! On Linux, we use `/dev/shm` (memory-backed tmpfs) to minimize I/O latency.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Once;

use crate::error::NetCdfResult;

/// Silence HDF5's automatic error printing to stderr.
///
/// The HDF5 C library prints verbose error messages to stderr even when errors
/// are handled gracefully by the Rust code (e.g., when checking for optional
/// attributes that don't exist).
///
/// It only needs to be called once per process, but is safe to call multiple times.
pub fn silence_hdf5_errors() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        // SAFETY: H5Eset_auto2 is thread-safe and we're passing null pointers
        // to disable error output, which is a documented valid use.
        unsafe {
            hdf5_metno_sys::h5e::H5Eset_auto2(
                hdf5_metno_sys::h5e::H5E_DEFAULT,
                None,
                std::ptr::null_mut(),
            );
        }
    });
}

/// A NetCDF file in the temp directory, removed when dropped.
#[derive(Debug)]
pub struct TempNetCdf {
    path: PathBuf,
}

impl TempNetCdf {
    /// Reserve a unique temp path without creating the file.
    pub fn reserve(prefix: &str) -> Self {
        let path = get_optimal_temp_dir().join(generate_temp_filename(prefix));
        Self { path }
    }

    /// Write `data` to a fresh temp file.
    pub fn from_bytes(prefix: &str, data: &[u8]) -> NetCdfResult<Self> {
        let temp = Self::reserve(prefix);
        std::fs::write(&temp.path, data)?;
        Ok(temp)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file contents back.
    pub fn read_bytes(&self) -> NetCdfResult<Vec<u8>> {
        Ok(std::fs::read(&self.path)?)
    }
}

impl Drop for TempNetCdf {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Get the optimal temp directory for NetCDF file operations.
///
/// On Linux, uses /dev/shm (memory-backed tmpfs) if available for faster I/O.
/// Falls back to the system temp directory on other platforms or if /dev/shm is unavailable.
pub(crate) fn get_optimal_temp_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        let shm_path = Path::new("/dev/shm");
        if shm_path.is_dir() {
            let test_path = shm_path.join(format!(".forcing_nc_test_{}", std::process::id()));
            if std::fs::write(&test_path, b"test").is_ok() {
                let _ = std::fs::remove_file(&test_path);
                return shm_path.to_path_buf();
            }
        }
    }

    std::env::temp_dir()
}

/// Generate a unique temp file name for concurrent safety.
/// Uses process ID, thread ID, and a counter to ensure uniqueness.
fn generate_temp_filename(prefix: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let pid = std::process::id();
    let tid = std::thread::current().id();
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);

    format!("{}_{}_{:?}_{}.nc", prefix, pid, tid, count)
}

/// Check if a variable has an attribute with the given name.
/// This avoids HDF5 error spam when checking for optional attributes.
pub(crate) fn has_attr(var: &netcdf::Variable, name: &str) -> bool {
    var.attributes().any(|attr| attr.name() == name)
}

/// Helper to get f32 attribute.
pub(crate) fn get_f32_attr(var: &netcdf::Variable, name: &str) -> Option<f32> {
    if !has_attr(var, name) {
        return None;
    }
    let attr_value = var.attribute_value(name)?.ok()?;
    numeric_attr(attr_value).map(|v| v as f32)
}

/// Numeric value of a scalar (or first element of a vector) attribute.
fn numeric_attr(value: netcdf::AttributeValue) -> Option<f64> {
    use netcdf::AttributeValue as A;
    let v = match value {
        A::Uchar(x) => x as f64,
        A::Schar(x) => x as f64,
        A::Ushort(x) => x as f64,
        A::Short(x) => x as f64,
        A::Uint(x) => x as f64,
        A::Int(x) => x as f64,
        A::Ulonglong(x) => x as f64,
        A::Longlong(x) => x as f64,
        A::Float(x) => x as f64,
        A::Double(x) => x,
        A::Shorts(v) => *v.first()? as f64,
        A::Ints(v) => *v.first()? as f64,
        A::Floats(v) => *v.first()? as f64,
        A::Doubles(v) => *v.first()?,
        _ => return None,
    };
    Some(v)
}

/// Helper to get a global string attribute.
pub(crate) fn get_global_str_attr(file: &netcdf::File, name: &str) -> Option<String> {
    if !file.attributes().any(|attr| attr.name() == name) {
        return None;
    }
    match file.attribute(name)?.value().ok()? {
        netcdf::AttributeValue::Str(s) => Some(s),
        netcdf::AttributeValue::Strs(mut v) if !v.is_empty() => Some(v.remove(0)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimal_temp_dir() {
        let dir = get_optimal_temp_dir();
        assert!(dir.exists(), "Temp dir should exist");
    }

    #[test]
    fn test_temp_filename_uniqueness() {
        let name1 = generate_temp_filename("t");
        let name2 = generate_temp_filename("t");
        assert_ne!(name1, name2, "Temp filenames should be unique");
    }

    #[test]
    fn test_temp_file_removed_on_drop() {
        let path = {
            let temp = TempNetCdf::from_bytes("drop_test", b"abc").unwrap();
            assert_eq!(temp.read_bytes().unwrap(), b"abc");
            temp.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
