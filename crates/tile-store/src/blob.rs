//! Access to the blobs published under a data root.
//!
//! The data root is either an HTTP(S) base URL or a local directory. A tile
//! container is fetched whole, once, the first time one of its tiles is
//! requested.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use frame_common::{FrameError, FrameResult, Metadata};

/// Reads one addressable blob.
#[async_trait]
pub trait BlobReader: Send + Sync + fmt::Debug {
    /// Location of the blob, used for logging and cache keys.
    fn location(&self) -> &str;

    /// Read the whole blob.
    async fn read(&self) -> FrameResult<Bytes>;
}

/// Blob behind an HTTP URL.
#[derive(Debug, Clone)]
pub struct HttpBlobReader {
    client: Client,
    url: String,
}

impl HttpBlobReader {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl BlobReader for HttpBlobReader {
    fn location(&self) -> &str {
        &self.url
    }

    #[instrument(skip(self), fields(url = %self.url))]
    async fn read(&self) -> FrameResult<Bytes> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| FrameError::TileFetch(format!("GET {} failed: {}", self.url, e)))?;

        let body = response
            .bytes()
            .await
            .map_err(|e| FrameError::TileFetch(format!("Reading {} failed: {}", self.url, e)))?;
        debug!(size = body.len(), "Fetched container");
        Ok(body)
    }
}

/// Blob in a local file.
#[derive(Debug, Clone)]
pub struct FileBlobReader {
    path: PathBuf,
    display: String,
}

impl FileBlobReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let display = path.display().to_string();
        Self { path, display }
    }
}

#[async_trait]
impl BlobReader for FileBlobReader {
    fn location(&self) -> &str {
        &self.display
    }

    async fn read(&self) -> FrameResult<Bytes> {
        tokio::fs::read(&self.path)
            .await
            .map(Bytes::from)
            .map_err(|e| FrameError::TileFetch(format!("Reading {}: {}", self.display, e)))
    }
}

/// Blob held in memory.
#[derive(Clone)]
pub struct MemoryBlobReader {
    name: String,
    data: Bytes,
}

impl MemoryBlobReader {
    pub fn new(name: impl Into<String>, data: Bytes) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

impl fmt::Debug for MemoryBlobReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBlobReader")
            .field("name", &self.name)
            .field("len", &self.data.len())
            .finish()
    }
}

#[async_trait]
impl BlobReader for MemoryBlobReader {
    fn location(&self) -> &str {
        &self.name
    }

    async fn read(&self) -> FrameResult<Bytes> {
        Ok(self.data.clone())
    }
}

/// Where metadata and tile containers are published.
#[derive(Debug, Clone)]
pub enum DataRoot {
    /// Base URL ending in `/`
    Http { base: String, client: Client },
    /// Local directory
    Local(PathBuf),
}

impl DataRoot {
    /// Interpret `root` as a URL when it has an http(s) scheme, else a directory.
    pub fn parse(root: &str, timeout: Duration) -> FrameResult<Self> {
        if root.starts_with("http://") || root.starts_with("https://") {
            let client = Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| FrameError::Internal(format!("HTTP client: {}", e)))?;
            let base = if root.ends_with('/') {
                root.to_string()
            } else {
                format!("{}/", root)
            };
            Ok(DataRoot::Http { base, client })
        } else {
            Ok(DataRoot::Local(PathBuf::from(root)))
        }
    }

    /// Display form of a path under the root.
    pub fn resolve(&self, relative: &str) -> String {
        match self {
            DataRoot::Http { base, .. } => format!("{}{}", base, relative),
            DataRoot::Local(dir) => dir.join(relative).display().to_string(),
        }
    }

    /// Reader for a blob under the root. Performs no I/O.
    pub fn reader(&self, relative: &str) -> Arc<dyn BlobReader> {
        match self {
            DataRoot::Http { base, client } => Arc::new(HttpBlobReader::new(
                client.clone(),
                format!("{}{}", base, relative),
            )),
            DataRoot::Local(dir) => Arc::new(FileBlobReader::new(dir.join(relative))),
        }
    }

    /// Fetch and parse `metadata.json`.
    #[instrument(skip(self))]
    pub async fn fetch_metadata(&self) -> FrameResult<Metadata> {
        let body = match self {
            DataRoot::Http { base, client } => {
                let url = format!("{}metadata.json", base);
                let response = client
                    .get(&url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| FrameError::MetadataFetch(format!("GET {}: {}", url, e)))?;
                response
                    .text()
                    .await
                    .map_err(|e| FrameError::MetadataFetch(format!("GET {}: {}", url, e)))?
            }
            DataRoot::Local(dir) => {
                let path = dir.join("metadata.json");
                tokio::fs::read_to_string(&path).await.map_err(|e| {
                    FrameError::MetadataFetch(format!("{}: {}", path.display(), e))
                })?
            }
        };

        let metadata = Metadata::from_json(&body)?;
        debug!(
            latest = %metadata.latest,
            variables = metadata.variables.len(),
            levels = metadata.levels.len(),
            "Loaded metadata"
        );
        Ok(metadata)
    }
}
