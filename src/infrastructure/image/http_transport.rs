//! HTTP transport built on `reqwest`.

use std::time::Duration;

use bytes::Bytes;
use tokio::runtime::Runtime;
use tracing::debug;

use crate::domain::entities::ResourceId;
use crate::domain::errors::FetchError;
use crate::domain::ports::Transport;

/// Default request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Downloads resources over HTTP(S).
///
/// Owns a small tokio runtime so that worker threads, which are plain OS
/// threads, can call [`Transport::fetch`] as a blocking operation. Must not
/// be used or dropped from inside another tokio runtime.
pub struct HttpTransport {
    client: reqwest::Client,
    runtime: Runtime,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport").finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Creates a transport with the given request timeout.
    ///
    /// # Errors
    /// Returns error if the HTTP client or its runtime cannot be created.
    pub fn new(timeout_secs: u64) -> Result<Self, FetchError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("imgtier-http")
            .enable_all()
            .build()
            .map_err(|e| FetchError::transport(format!("Failed to start HTTP runtime: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| FetchError::transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, runtime })
    }

    async fn download(&self, url: &str) -> Result<Bytes, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::transport(format!("Request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(FetchError::transport(format!(
                "HTTP {}: {}",
                response.status(),
                response.status().canonical_reason().unwrap_or("Unknown")
            )));
        }

        response
            .bytes()
            .await
            .map_err(|e| FetchError::transport(format!("Failed to read body: {e}")))
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, id: &ResourceId) -> Result<Bytes, FetchError> {
        debug!(id = %id, "Downloading image from network");
        let bytes = self.runtime.block_on(self.download(id.as_str()))?;
        debug!(id = %id, size = bytes.len(), "Downloaded image");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_creation() {
        assert!(HttpTransport::new(DEFAULT_TIMEOUT_SECS).is_ok());
    }

    #[test]
    fn test_invalid_url_is_transport_error() {
        let transport = HttpTransport::new(1).unwrap();
        let err = transport
            .fetch(&ResourceId::new("not a url"))
            .unwrap_err();
        assert!(err.is_network_error());
    }
}
