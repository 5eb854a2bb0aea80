//! Blob byte fetcher: IPFS gateway, HTTP(S) and local files.
//!
//! Transport failures are returned as [`FetchError`] and are never retried
//! here; callers wrap fetches in their own timeouts and retry policy.

use std::fs::File;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::time::Duration;

use memmap2::Mmap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unsupported vectors uri: {0}")]
    UnsupportedUri(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to build http client: {0}")]
    Client(reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    /// Base URL of the IPFS HTTP gateway, e.g. `https://ipfs.io`.
    pub ipfs_gateway: String,
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Relative paths resolve against this directory (usually the manifest's).
    pub base_dir: Option<PathBuf>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            ipfs_gateway: "https://ipfs.io".to_string(),
            timeout_secs: 30,
            user_agent: concat!("kbvec/", env!("CARGO_PKG_VERSION")).to_string(),
            base_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedSource {
    Http(String),
    File(PathBuf),
}

/// Map a `vectors_uri` onto something fetchable.
pub fn resolve_uri(uri: &str, config: &FetchConfig) -> Result<ResolvedSource, FetchError> {
    let uri = uri.trim();
    let gateway = config.ipfs_gateway.trim_end_matches('/');

    if let Some(rest) = uri.strip_prefix("ipfs://") {
        let rest = rest.strip_prefix("ipfs/").unwrap_or(rest).trim_start_matches('/');
        if rest.is_empty() {
            return Err(FetchError::UnsupportedUri(uri.to_string()));
        }
        return Ok(ResolvedSource::Http(format!("{gateway}/ipfs/{rest}")));
    }
    if uri.starts_with("/ipfs/") {
        return Ok(ResolvedSource::Http(format!("{gateway}{uri}")));
    }
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return Ok(ResolvedSource::Http(uri.to_string()));
    }
    if let Some(path) = uri.strip_prefix("file://") {
        let path = path.strip_prefix("localhost").unwrap_or(path);
        if path.is_empty() {
            return Err(FetchError::UnsupportedUri(uri.to_string()));
        }
        return Ok(ResolvedSource::File(PathBuf::from(path)));
    }
    if uri.is_empty() || uri.contains("://") {
        return Err(FetchError::UnsupportedUri(uri.to_string()));
    }

    let path = Path::new(uri);
    let path = match &config.base_dir {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_path_buf(),
    };
    Ok(ResolvedSource::File(path))
}

/// Fetched blob bytes: owned for network responses, memory-mapped for local
/// files.
#[derive(Debug)]
pub enum BlobBytes {
    Owned(Vec<u8>),
    Mapped(Mmap),
}

impl Deref for BlobBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            BlobBytes::Owned(bytes) => bytes,
            BlobBytes::Mapped(mmap) => mmap,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlobFetcher {
    config: FetchConfig,
    client: reqwest::Client,
}

impl BlobFetcher {
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub async fn fetch(&self, uri: &str) -> Result<BlobBytes, FetchError> {
        match resolve_uri(uri, &self.config)? {
            ResolvedSource::Http(url) => {
                tracing::info!(uri, url = %url, "fetching vector blob");
                self.fetch_http(&url).await.map(BlobBytes::Owned)
            }
            ResolvedSource::File(path) => {
                tracing::debug!(uri, path = %path.display(), "mapping local vector blob");
                map_file(&path)
            }
        }
    }

    async fn fetch_http(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Http {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|source| FetchError::Http {
            url: url.to_string(),
            source,
        })?;
        tracing::debug!(url, bytes = body.len(), "vector blob downloaded");
        Ok(body.to_vec())
    }
}

fn map_file(path: &Path) -> Result<BlobBytes, FetchError> {
    let io_err = |source| FetchError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_err)?;
    let len = file.metadata().map_err(io_err)?.len();
    if len == 0 {
        // Zero-length maps are rejected on some platforms.
        return Ok(BlobBytes::Owned(Vec::new()));
    }
    // SAFETY: the map is read-only and decode copies every vector out of it.
    // A file truncated underneath us while mapped is outside what we guard.
    let mmap = unsafe { Mmap::map(&file) }.map_err(io_err)?;
    Ok(BlobBytes::Mapped(mmap))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config() -> FetchConfig {
        FetchConfig {
            ipfs_gateway: "https://gw.example/".to_string(),
            base_dir: Some(PathBuf::from("/srv/kb")),
            ..FetchConfig::default()
        }
    }

    /// Serve exactly one canned HTTP response on a local port.
    async fn serve_once(response: Vec<u8>) -> std::io::Result<String> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(&response).await;
                let _ = socket.shutdown().await;
            }
        });
        Ok(format!("http://{addr}/vectors.bin"))
    }

    #[test]
    fn resolves_ipfs_forms_through_gateway() -> Result<(), FetchError> {
        let cfg = config();
        assert_eq!(
            resolve_uri("ipfs://bafyabc/vectors.bin", &cfg)?,
            ResolvedSource::Http("https://gw.example/ipfs/bafyabc/vectors.bin".to_string())
        );
        assert_eq!(
            resolve_uri("ipfs://ipfs/bafyabc", &cfg)?,
            ResolvedSource::Http("https://gw.example/ipfs/bafyabc".to_string())
        );
        assert_eq!(
            resolve_uri("/ipfs/bafyabc", &cfg)?,
            ResolvedSource::Http("https://gw.example/ipfs/bafyabc".to_string())
        );
        assert!(matches!(
            resolve_uri("ipfs://", &cfg),
            Err(FetchError::UnsupportedUri(_))
        ));
        Ok(())
    }

    #[test]
    fn resolves_http_file_and_paths() -> Result<(), FetchError> {
        let cfg = config();
        assert_eq!(
            resolve_uri("https://cdn.example/v.bin", &cfg)?,
            ResolvedSource::Http("https://cdn.example/v.bin".to_string())
        );
        assert_eq!(
            resolve_uri("file:///data/v.bin", &cfg)?,
            ResolvedSource::File(PathBuf::from("/data/v.bin"))
        );
        assert_eq!(
            resolve_uri("file://localhost/data/v.bin", &cfg)?,
            ResolvedSource::File(PathBuf::from("/data/v.bin"))
        );
        assert_eq!(
            resolve_uri("vectors/v.bin", &cfg)?,
            ResolvedSource::File(PathBuf::from("/srv/kb/vectors/v.bin"))
        );
        assert_eq!(
            resolve_uri("/abs/v.bin", &cfg)?,
            ResolvedSource::File(PathBuf::from("/abs/v.bin"))
        );
        assert!(matches!(
            resolve_uri("s3://bucket/v.bin", &cfg),
            Err(FetchError::UnsupportedUri(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn fetches_local_files() -> anyhow::Result<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("v.bin"), b"VECB-bytes")?;
        std::fs::write(dir.path().join("empty.bin"), b"")?;
        let fetcher = BlobFetcher::new(FetchConfig {
            base_dir: Some(dir.path().to_path_buf()),
            ..FetchConfig::default()
        })?;

        let bytes = fetcher.fetch("v.bin").await?;
        assert!(matches!(bytes, BlobBytes::Mapped(_)));
        assert_eq!(&bytes[..], b"VECB-bytes");

        let url = format!("file://{}", dir.path().join("v.bin").display());
        assert_eq!(&fetcher.fetch(&url).await?[..], b"VECB-bytes");

        assert!(fetcher.fetch("empty.bin").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_is_io_error() -> anyhow::Result<()> {
        let fetcher = BlobFetcher::new(FetchConfig::default())?;
        let err = fetcher.fetch("/no/such/vectors.bin").await.unwrap_err();
        assert!(matches!(err, FetchError::Io { .. }));
        assert!(err.to_string().contains("/no/such/vectors.bin"));
        Ok(())
    }

    #[tokio::test]
    async fn downloads_over_http() -> anyhow::Result<()> {
        let body = b"VECB\x01\x01\x00\x00";
        let mut response =
            format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n", body.len())
                .into_bytes();
        response.extend_from_slice(body);
        let url = serve_once(response).await?;

        let fetcher = BlobFetcher::new(FetchConfig::default())?;
        let bytes = fetcher.fetch(&url).await?;
        assert_eq!(&bytes[..], body);
        Ok(())
    }

    #[tokio::test]
    async fn http_error_status_is_surfaced() -> anyhow::Result<()> {
        let url = serve_once(
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec(),
        )
        .await?;
        let fetcher = BlobFetcher::new(FetchConfig::default())?;
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
        Ok(())
    }
}
