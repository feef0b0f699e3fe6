//! Common types and utilities shared across the forcing engine crates.

pub mod error;
pub mod grid;
pub mod time;
pub mod variables;

pub use error::{ErrorReport, ForcingError, ForcingResult};
pub use grid::{GridCell, GridSpec, IndexOrder, SpatialWindow};
pub use time::ValidTime;
pub use variables::{ForcingVariable, FORCING_VARIABLES};
