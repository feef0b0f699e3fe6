//! Byte sources for forcing files and weight files.
//!
//! Identifiers are local paths, `s3://` or `gs://` URIs for public buckets, or
//! plain `http(s)://` URLs. Bucket URIs are read anonymously through the
//! bucket's public HTTPS endpoint.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use forcing_common::{ForcingError, ForcingResult};
use reqwest::Client;
use tracing::{debug, instrument};

/// Resolved location of a forcing or weight file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForcingSource {
    Local(PathBuf),
    Http { id: String, url: String },
}

impl ForcingSource {
    /// Resolve a file identifier by its scheme.
    pub fn parse(id: &str) -> ForcingResult<Self> {
        let id = id.trim();
        if id.is_empty() {
            return Err(ForcingError::Configuration(
                "empty file identifier".to_string(),
            ));
        }

        if let Some(rest) = id.strip_prefix("s3://") {
            let (bucket, key) = split_bucket(id, rest)?;
            return Ok(ForcingSource::Http {
                id: id.to_string(),
                url: format!("https://{}.s3.amazonaws.com/{}", bucket, key),
            });
        }
        if let Some(rest) = id.strip_prefix("gs://") {
            let (bucket, key) = split_bucket(id, rest)?;
            return Ok(ForcingSource::Http {
                id: id.to_string(),
                url: format!("https://storage.googleapis.com/{}/{}", bucket, key),
            });
        }
        if id.starts_with("https://") || id.starts_with("http://") {
            return Ok(ForcingSource::Http {
                id: id.to_string(),
                url: id.to_string(),
            });
        }

        Ok(ForcingSource::Local(PathBuf::from(id)))
    }

    /// Identifier used in logs and error messages.
    pub fn id(&self) -> String {
        match self {
            ForcingSource::Local(path) => path.display().to_string(),
            ForcingSource::Http { id, .. } => id.clone(),
        }
    }

    /// Final path segment, without any query string.
    pub fn file_name(&self) -> String {
        let id = self.id();
        let id = id.split('?').next().unwrap_or(&id).to_string();
        id.rsplit('/').next().unwrap_or(&id).to_string()
    }

    /// File stem of the identifier (`conus.json` -> `conus`).
    pub fn stem(&self) -> String {
        let name = self.file_name();
        Path::new(&name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or(name)
    }

    /// Lower-case extension of the identifier, if any.
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name();
        Path::new(&name)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
    }
}

fn split_bucket<'a>(id: &str, rest: &'a str) -> ForcingResult<(&'a str, &'a str)> {
    match rest.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok((bucket, key)),
        _ => Err(ForcingError::Configuration(format!(
            "'{}' is not a bucket/key URI",
            id
        ))),
    }
}

/// Bytes or path of a fetched source.
#[derive(Debug, Clone)]
pub enum FetchedSource {
    /// Local file, opened in place
    Path(PathBuf),
    /// Remote file, held in memory
    Bytes(Bytes),
}

impl FetchedSource {
    /// Number of bytes read over the network (0 for local files).
    pub fn remote_len(&self) -> usize {
        match self {
            FetchedSource::Path(_) => 0,
            FetchedSource::Bytes(b) => b.len(),
        }
    }
}

/// Reads sources without credentials.
#[derive(Debug, Clone)]
pub struct SourceFetcher {
    client: Client,
}

impl SourceFetcher {
    /// Create a fetcher with the given request timeout.
    pub fn new(request_timeout: Duration) -> ForcingResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| ForcingError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Resolve a source to a local path or downloaded bytes.
    pub async fn fetch(&self, source: &ForcingSource) -> ForcingResult<FetchedSource> {
        match source {
            ForcingSource::Local(path) => {
                if !tokio::fs::try_exists(path).await.unwrap_or(false) {
                    return Err(ForcingError::RemoteRead {
                        source_id: source.id(),
                        message: "file not found".to_string(),
                    });
                }
                Ok(FetchedSource::Path(path.clone()))
            }
            ForcingSource::Http { id, url } => Ok(FetchedSource::Bytes(self.get(id, url).await?)),
        }
    }

    /// Read a source fully into memory.
    pub async fn fetch_bytes(&self, source: &ForcingSource) -> ForcingResult<Bytes> {
        match source {
            ForcingSource::Local(path) => {
                let data = tokio::fs::read(path).await.map_err(|e| ForcingError::RemoteRead {
                    source_id: source.id(),
                    message: e.to_string(),
                })?;
                Ok(Bytes::from(data))
            }
            ForcingSource::Http { id, url } => self.get(id, url).await,
        }
    }

    #[instrument(skip(self), fields(url = %url))]
    async fn get(&self, id: &str, url: &str) -> ForcingResult<Bytes> {
        let remote_err = |message: String| ForcingError::RemoteRead {
            source_id: id.to_string(),
            message,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| remote_err(e.to_string()))?
            .error_for_status()
            .map_err(|e| remote_err(e.to_string()))?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| remote_err(e.to_string()))?;

        debug!(size = bytes.len(), "Fetched remote file");
        Ok(bytes)
    }
}
