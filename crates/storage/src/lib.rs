//! Storage abstractions for the forcing processor.
//!
//! Provides unified interfaces for:
//! - Output storage (local filesystem or S3) through `object_store`
//! - Credential-less reads of forcing and weight files
//! - The output key layout

pub mod object_store;
pub mod paths;
pub mod source;

pub use self::object_store::{ObjectStorage, ObjectStorageConfig, StorageKind};
pub use paths::StoragePath;
pub use source::{FetchedSource, ForcingSource, SourceFetcher};
