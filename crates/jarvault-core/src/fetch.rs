//! HTTP fetch layer.
//!
//! A thin wrapper over `reqwest` shared by every remote repository client.
//! The 404 / transport-error distinction matters to callers: a definitive
//! 404 maps to `Ok(None)` (the resource is absent, do not retry), while
//! transport failures and other non-2xx statuses map to `Err` (transient,
//! eligible for retry on the next actualization).

use crate::error::{BundleError, Result};
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// HTTP client with jarvault defaults: 30 second timeout, crate-identifying
/// user agent.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let client = Client::builder()
            .user_agent(concat!("jarvault/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("failed to create HTTP client");
        Self { client }
    }

    /// Fetches a resource body. Returns `Ok(None)` on 404.
    pub async fn get(&self, url: &str) -> Result<Option<Vec<u8>>> {
        tracing::debug!("fetching {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BundleError::Http {
                url: url.to_string(),
                source: e,
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(BundleError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| BundleError::Http {
            url: url.to_string(),
            source: e,
        })?;
        Ok(Some(body.to_vec()))
    }

    /// Fetches a resource as UTF-8 text. Returns `Ok(None)` on 404.
    pub async fn get_text(&self, url: &str) -> Result<Option<String>> {
        match self.get(url).await? {
            Some(body) => {
                let text = String::from_utf8(body)
                    .map_err(|e| BundleError::Manifest(format!("invalid UTF-8 from {url}: {e}")))?;
                Ok(Some(text))
            }
            None => Ok(None),
        }
    }

    /// Streams a resource to `dest`, returning the number of bytes written.
    ///
    /// Returns `Ok(None)` on 404 without touching `dest`. An empty response
    /// body is an error: a zero-byte artifact is never valid, and writing
    /// one would poison the disk cache. Callers are expected to download to
    /// a temporary name and rename into place; this method does not clean
    /// up `dest` on failure.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<Option<u64>> {
        tracing::debug!("downloading {} -> {}", url, dest.display());
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BundleError::Http {
                url: url.to_string(),
                source: e,
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(BundleError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| BundleError::Http {
                url: url.to_string(),
                source: e,
            })?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        if written == 0 {
            return Err(BundleError::EmptyDownload(url.to_string()));
        }
        Ok(Some(written))
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}
