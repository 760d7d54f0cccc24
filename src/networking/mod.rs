use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use log::{debug, warn};
use reqwest::Client;
use thiserror::Error;

#[cfg(test)]
pub mod memory;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

pub type ByteStream = BoxStream<'static, Result<Bytes, FetchError>>;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("download {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("download {url}: timed out")]
    Timeout { url: String },
    #[error("download {url} responded {status} (not 200)")]
    Status { url: String, status: u16 },
}

/// Retrieves the bytes of a named remote resource.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Start retrieving `url`. A non-2xx answer is an error before any byte is yielded.
    async fn fetch(&self, url: &str) -> Result<ByteStream, FetchError>;

    /// Retrieve `url` and collect the whole body.
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut stream = self.fetch(url).await?;
        let mut body = Vec::new();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk?);
        }
        Ok(body)
    }
}

/// Shared HTTP client used for the manifest, patch files and self-update.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(read_timeout: Duration) -> Self {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(read_timeout)
            .user_agent(concat!("starteq/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|err| {
                warn!("network client: falling back to default HTTP client configuration ({err})");
                Client::new()
            });
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_READ_TIMEOUT)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<ByteStream, FetchError> {
        debug!("fetch: GET {url}");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| classify(url, err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_owned(),
                status: status.as_u16(),
            });
        }

        let owned_url = url.to_owned();
        Ok(response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|err| classify(&owned_url, err)))
            .boxed())
    }
}

fn classify(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_owned(),
        }
    } else {
        FetchError::Request {
            url: url.to_owned(),
            source: err,
        }
    }
}

/// `{download_prefix}/{client_tag}/{entry_name}`
pub fn entry_url(download_prefix: &str, client_tag: &str, entry_name: &str) -> String {
    format!(
        "{}/{}/{}",
        download_prefix.trim_end_matches('/'),
        client_tag,
        entry_name.trim_start_matches('/')
    )
}
