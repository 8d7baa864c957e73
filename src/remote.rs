//! Transport seam for remote resources ingested through `put`.

use bytes::Bytes;
use http::{header, HeaderMap, StatusCode};

use crate::StorageError;

/// Facts learned from a `HEAD`-style probe of a remote resource.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteInfo {
    /// Reported `Content-Type`, empty when absent.
    pub content_type: String,
    /// Reported `Content-Length`, `0` when absent or malformed.
    pub content_length: u64,
}

impl RemoteInfo {
    /// Builds probe facts from a response status and headers.
    ///
    /// Only `200 OK` counts as a usable resource.
    pub fn from_response(status: StatusCode, headers: &HeaderMap) -> Result<Self, StorageError> {
        if status != StatusCode::OK {
            return Err(StorageError::new(format!(
                "remote resource answered with status {status}"
            )));
        }

        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        let content_length = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or_default();

        Ok(Self {
            content_type,
            content_length,
        })
    }
}

/// Async abstraction over the network transport used for remote resources.
#[async_trait::async_trait]
pub trait RemoteFetcher: Send + Sync + 'static {
    /// Probes the resource without downloading its body.
    async fn head(&self, url: &str) -> Result<RemoteInfo, StorageError>;

    /// Downloads the full resource body.
    async fn fetch(&self, url: &str) -> Result<Bytes, StorageError>;
}

/// Placeholder fetcher used when no transport is available.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopFetcher;

#[async_trait::async_trait]
impl RemoteFetcher for NoopFetcher {
    async fn head(&self, _url: &str) -> Result<RemoteInfo, StorageError> {
        Err(StorageError::new(
            "no remote fetcher configured; enable the `http` feature or supply one",
        ))
    }

    async fn fetch(&self, _url: &str) -> Result<Bytes, StorageError> {
        Err(StorageError::new(
            "no remote fetcher configured; enable the `http` feature or supply one",
        ))
    }
}

#[cfg(feature = "http")]
pub use self::http_fetcher::HttpFetcher;

#[cfg(feature = "http")]
mod http_fetcher {
    use std::time::Duration;

    use bytes::{Bytes, BytesMut};
    use futures::StreamExt;

    use super::{RemoteFetcher, RemoteInfo};
    use crate::{config::DriverConfig, StorageError};

    /// [`RemoteFetcher`] over a shared `reqwest` client.
    #[derive(Debug, Clone)]
    pub struct HttpFetcher {
        client: reqwest::Client,
    }

    impl HttpFetcher {
        /// Builds a fetcher honoring the driver's timeout and user agent.
        pub fn new(config: &DriverConfig) -> Result<Self, StorageError> {
            let mut builder = reqwest::Client::builder();
            if let Some(secs) = config.timeout_secs {
                builder = builder.timeout(Duration::from_secs(secs));
            }
            if let Some(agent) = &config.user_agent {
                builder = builder.user_agent(agent.clone());
            }
            let client = builder
                .build()
                .map_err(|err| StorageError::new(format!("failed to build HTTP client: {err}")))?;
            Ok(Self { client })
        }

        /// Wraps an existing client.
        pub fn with_client(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    #[async_trait::async_trait]
    impl RemoteFetcher for HttpFetcher {
        async fn head(&self, url: &str) -> Result<RemoteInfo, StorageError> {
            #[cfg(feature = "tracing")]
            tracing::debug!(url = url, "http fetcher: probing resource");

            let response = self
                .client
                .head(url)
                .send()
                .await
                .map_err(|err| StorageError::new(format!("remote probe failed: {err}")))?;
            RemoteInfo::from_response(response.status(), response.headers())
        }

        async fn fetch(&self, url: &str) -> Result<Bytes, StorageError> {
            #[cfg(feature = "tracing")]
            tracing::debug!(url = url, "http fetcher: downloading resource");

            let response = self
                .client
                .get(url)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
                .map_err(|err| StorageError::new(format!("remote download failed: {err}")))?;

            let mut body = BytesMut::new();
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk
                    .map_err(|err| StorageError::new(format!("remote download failed: {err}")))?;
                body.extend_from_slice(&chunk);
            }
            Ok(body.freeze())
        }
    }
}
