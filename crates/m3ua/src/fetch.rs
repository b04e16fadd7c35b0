use std::{future::Future, time::Duration};

use bytes::Bytes;
use reqwest::Client;

use crate::error::{M3uaError, M3uaResult};

/// Network boundary of the pipeline.
///
/// Implementations only distinguish success from failure; a non-success HTTP
/// status must surface as [M3uaError::Fetch].
pub trait Fetcher {
    fn fetch_playlist(&self, url: &str) -> impl Future<Output = M3uaResult<Bytes>> + Send;

    fn fetch_resource(&self, url: &str) -> impl Future<Output = M3uaResult<Bytes>> + Send;
}

impl<F> Fetcher for &F
where
    F: Fetcher + Sync,
{
    fn fetch_playlist(&self, url: &str) -> impl Future<Output = M3uaResult<Bytes>> + Send {
        (**self).fetch_playlist(url)
    }

    fn fetch_resource(&self, url: &str) -> impl Future<Output = M3uaResult<Bytes>> + Send {
        (**self).fetch_resource(url)
    }
}

impl<F> Fetcher for std::sync::Arc<F>
where
    F: Fetcher + Send + Sync,
{
    fn fetch_playlist(&self, url: &str) -> impl Future<Output = M3uaResult<Bytes>> + Send {
        self.as_ref().fetch_playlist(url)
    }

    fn fetch_resource(&self, url: &str) -> impl Future<Output = M3uaResult<Bytes>> + Send {
        self.as_ref().fetch_resource(url)
    }
}

/// [Fetcher] backed by a [reqwest::Client].
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: Client,
    /// Extra attempts after the first failure.
    retries: u32,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self { client, retries: 0 }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    async fn get(&self, url: &str) -> M3uaResult<Bytes> {
        let mut retries = self.retries;
        let mut delay = Duration::from_millis(500);
        loop {
            match self.get_once(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if retries > 0 => {
                    tracing::warn!("Failed to fetch {url}, retry later. {e}");
                    retries -= 1;
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_once(&self, url: &str) -> M3uaResult<Bytes> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            if let Ok(body) = response.text().await {
                tracing::debug!("Error body: {body}");
            }
            return Err(M3uaError::Fetch {
                url: url.to_string(),
                status,
            });
        }

        Ok(response.bytes().await?)
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch_playlist(&self, url: &str) -> M3uaResult<Bytes> {
        tracing::info!("Start fetching M3U8 file.");
        let bytes = self.get(url).await?;
        tracing::info!("M3U8 file fetched.");
        Ok(bytes)
    }

    async fn fetch_resource(&self, url: &str) -> M3uaResult<Bytes> {
        self.get(url).await
    }
}

/// Address a playlist entry: absolute http(s) uris are kept, anything else is
/// appended to `prefix`.
pub fn resolve_url(prefix: &str, uri: &str) -> String {
    match url::Url::parse(uri) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => uri.to_string(),
        _ => format!("{prefix}{uri}"),
    }
}
