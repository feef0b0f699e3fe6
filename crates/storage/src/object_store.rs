//! Object storage for forcing outputs (local filesystem or S3).

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use forcing_common::{ForcingError, ForcingResult};
use object_store::{aws::AmazonS3Builder, local::LocalFileSystem, path::Path, ObjectStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Backend kind of an output target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    S3,
}

impl StorageKind {
    /// Kind implied by an output path (`s3://` URIs are S3).
    pub fn infer(output_path: &str) -> Self {
        if output_path.starts_with("s3://") {
            StorageKind::S3
        } else {
            StorageKind::Local
        }
    }

    pub fn parse(value: &str) -> ForcingResult<Self> {
        match value.to_ascii_lowercase().as_str() {
            "local" => Ok(StorageKind::Local),
            "s3" => Ok(StorageKind::S3),
            other => Err(ForcingError::Configuration(format!(
                "unknown storage_type '{}', expected 'local' or 's3'",
                other
            ))),
        }
    }
}

/// Configuration for object storage connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStorageConfig {
    pub kind: StorageKind,
    /// Local root directory, or bucket name for S3
    pub root: String,
    /// Key prefix inside the bucket (empty for local)
    pub prefix: String,
    /// S3 endpoint override (MinIO and friends)
    pub endpoint: Option<String>,
    /// AWS region
    pub region: Option<String>,
    /// Allow HTTP (for local MinIO)
    pub allow_http: bool,
}

impl ObjectStorageConfig {
    /// Build a config from an output path.
    ///
    /// `s3://bucket/some/prefix` targets S3 with credentials from the
    /// environment (`S3_ENDPOINT`, `S3_REGION` and `S3_ALLOW_HTTP` override
    /// the usual `AWS_*` settings). Anything else is a local directory.
    pub fn from_output_path(output_path: &str, kind: StorageKind) -> ForcingResult<Self> {
        match kind {
            StorageKind::Local => {
                if output_path.starts_with("s3://") {
                    return Err(ForcingError::Configuration(format!(
                        "storage_type 'local' does not accept '{}'",
                        output_path
                    )));
                }
                Ok(Self {
                    kind,
                    root: output_path.to_string(),
                    prefix: String::new(),
                    endpoint: None,
                    region: None,
                    allow_http: false,
                })
            }
            StorageKind::S3 => {
                let rest = output_path.strip_prefix("s3://").ok_or_else(|| {
                    ForcingError::Configuration(format!(
                        "storage_type 's3' requires an s3:// output_path, got '{}'",
                        output_path
                    ))
                })?;
                let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
                if bucket.is_empty() {
                    return Err(ForcingError::Configuration(format!(
                        "no bucket in '{}'",
                        output_path
                    )));
                }
                Ok(Self {
                    kind,
                    root: bucket.to_string(),
                    prefix: prefix.trim_matches('/').to_string(),
                    endpoint: std::env::var("S3_ENDPOINT").ok(),
                    region: std::env::var("S3_REGION").ok(),
                    allow_http: std::env::var("S3_ALLOW_HTTP")
                        .map(|v| v == "true" || v == "1")
                        .unwrap_or(false),
                })
            }
        }
    }
}

/// Object storage client for forcing outputs.
///
/// Keys are relative (`forcings/cat-1.csv`); the client adds the bucket prefix.
#[derive(Clone)]
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    kind: StorageKind,
    root: String,
    prefix: String,
}

impl std::fmt::Debug for ObjectStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStorage")
            .field("kind", &self.kind)
            .field("root", &self.root)
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl ObjectStorage {
    /// Create a new object storage client from config.
    pub fn new(config: &ObjectStorageConfig) -> ForcingResult<Self> {
        let store: Arc<dyn ObjectStore> = match config.kind {
            StorageKind::Local => {
                std::fs::create_dir_all(&config.root)?;
                let fs = LocalFileSystem::new_with_prefix(PathBuf::from(&config.root))
                    .map_err(|e| {
                        ForcingError::Storage(format!("Failed to open {}: {}", config.root, e))
                    })?;
                Arc::new(fs)
            }
            StorageKind::S3 => {
                let mut builder = AmazonS3Builder::from_env().with_bucket_name(&config.root);
                if let Some(endpoint) = &config.endpoint {
                    builder = builder.with_endpoint(endpoint);
                }
                if let Some(region) = &config.region {
                    builder = builder.with_region(region);
                }
                if config.allow_http {
                    builder = builder.with_allow_http(true);
                }
                let s3 = builder.build().map_err(|e| {
                    ForcingError::Storage(format!("Failed to create S3 client: {}", e))
                })?;
                Arc::new(s3)
            }
        };

        Ok(Self {
            store,
            kind: config.kind,
            root: config.root.clone(),
            prefix: config.prefix.clone(),
        })
    }

    /// Human-readable location of a key (`/out/forcings/x.csv`, `s3://b/p/x.csv`).
    pub fn display_location(&self, key: &str) -> String {
        match self.kind {
            StorageKind::Local => format!("{}/{}", self.root.trim_end_matches('/'), key),
            StorageKind::S3 => format!("s3://{}/{}", self.root, self.location(key)),
        }
    }

    fn location(&self, key: &str) -> Path {
        if self.prefix.is_empty() {
            Path::from(key)
        } else {
            Path::from(format!("{}/{}", self.prefix, key))
        }
    }

    /// Write bytes to a key.
    #[instrument(skip(self, data), fields(root = %self.root, key = %key))]
    pub async fn put(&self, key: &str, data: Bytes) -> ForcingResult<()> {
        let location = self.location(key);
        debug!(size = data.len(), "Writing object");

        self.store
            .put(&location, data.into())
            .await
            .map_err(|e| ForcingError::Storage(format!("Failed to write {}: {}", key, e)))?;

        Ok(())
    }

    /// Read a key, returning `None` when it does not exist.
    pub async fn get_opt(&self, key: &str) -> ForcingResult<Option<Bytes>> {
        let location = self.location(key);
        match self.store.get(&location).await {
            Ok(result) => {
                let bytes = result
                    .bytes()
                    .await
                    .map_err(|e| ForcingError::Storage(format!("Failed to read bytes: {}", e)))?;
                Ok(Some(bytes))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(ForcingError::Storage(format!(
                "Failed to read {}: {}",
                key, e
            ))),
        }
    }
}
