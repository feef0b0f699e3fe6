//! Path builder for consistent output layout.

/// Keys of everything a run writes, relative to the output root.
pub struct StoragePath;

impl StoragePath {
    /// Directory of per-catchment files and combined outputs.
    pub const FORCINGS_DIR: &'static str = "forcings";

    /// Directory of metadata tables, configuration copy and profile log.
    pub const METADATA_DIR: &'static str = "metadata/forcings_metadata";

    /// File stem of a catchment: ids already prefixed with `cat-` are kept.
    pub fn catchment_stem(catchment_id: &str) -> String {
        if catchment_id.starts_with("cat-") {
            catchment_id.to_string()
        } else {
            format!("cat-{}", catchment_id)
        }
    }

    /// Build path for a catchment time series.
    /// Format: forcings/cat-{id}.{ext}
    pub fn catchment_file(catchment_id: &str, extension: &str) -> String {
        format!(
            "{}/{}.{}",
            Self::FORCINGS_DIR,
            Self::catchment_stem(catchment_id),
            extension
        )
    }

    /// Build path for a combined regional NetCDF.
    /// Format: forcings/{region}_forcings.nc
    pub fn region_netcdf(region: &str) -> String {
        format!("{}/{}_forcings.nc", Self::FORCINGS_DIR, region)
    }

    /// Build path for the bundled archive.
    pub fn forcing_tarball() -> String {
        format!("{}/forcings.tar.gz", Self::FORCINGS_DIR)
    }

    /// Build path for a metadata file.
    /// Format: metadata/forcings_metadata/{name}
    pub fn metadata_file(name: &str) -> String {
        format!("{}/{}", Self::METADATA_DIR, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_paths() {
        assert_eq!(StoragePath::catchment_file("cat-12", "csv"), "forcings/cat-12.csv");
        assert_eq!(StoragePath::catchment_file("12", "parquet"), "forcings/cat-12.parquet");
        assert_eq!(StoragePath::region_netcdf("vpu09"), "forcings/vpu09_forcings.nc");
        assert_eq!(StoragePath::forcing_tarball(), "forcings/forcings.tar.gz");
        assert_eq!(
            StoragePath::metadata_file("profile_fp.txt"),
            "metadata/forcings_metadata/profile_fp.txt"
        );
    }
}
