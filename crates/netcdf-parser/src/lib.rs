//! NetCDF reading and writing for the forcing engine.
//!
//! Reads windows of NWM forcing files on the native grid and reads/writes the
//! combined per-region ngen forcing file. Built on the native netcdf library
//! (libnetcdf/HDF5); byte inputs go through a temp file in `/dev/shm`.

pub mod error;
pub mod forcing;
pub mod native;
pub mod ngen;

pub use error::{NetCdfError, NetCdfResult};
pub use forcing::{
    read_forcing_frame, read_forcing_frame_from_bytes, ForcingFrame, VALID_TIME_ATTR,
};
pub use native::{silence_hdf5_errors, TempNetCdf};
pub use ngen::{
    read_ngen_netcdf, read_ngen_netcdf_from_bytes, write_ngen_netcdf, write_ngen_netcdf_to_bytes,
    NgenForcingSet,
};
