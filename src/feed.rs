//! Feed sources: where the ordered list of media comes from.

use std::future::Future;

use serde::Deserialize;
use url::Url;

use crate::error::FetchError;
use crate::media::MediaItem;

/// Supplies the full, ordered media list for the feed.
///
/// Every fetch is a complete replacement, never a diff.
pub trait MediaListSource: Send + 'static {
    fn fetch_media_list(&self) -> impl Future<Output = Result<Vec<MediaItem>, FetchError>> + Send;
}

/// Manifest body served by the feed endpoint.
#[derive(Debug, Deserialize)]
struct Manifest {
    videos: Vec<String>,
}

/// Fetches the JSON manifest over HTTP.
#[derive(Debug, Clone)]
pub struct HttpFeedSource {
    client: reqwest::Client,
    manifest_url: Url,
}

impl HttpFeedSource {
    pub fn new(client: reqwest::Client, manifest_url: Url) -> Self {
        Self {
            client,
            manifest_url,
        }
    }

    pub async fn fetch(&self) -> Result<Vec<MediaItem>, FetchError> {
        let url = self.manifest_url.to_string();
        tracing::debug!("Fetching manifest from {}", url);

        let response = self
            .client
            .get(self.manifest_url.clone())
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::InvalidResponse { url, status });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| FetchError::Request {
                url: url.clone(),
                source,
            })?;

        let items = parse_manifest(&self.manifest_url, &body)?;
        tracing::info!("Fetched {} media items", items.len());
        Ok(items)
    }
}

impl MediaListSource for HttpFeedSource {
    fn fetch_media_list(&self) -> impl Future<Output = Result<Vec<MediaItem>, FetchError>> + Send {
        self.fetch()
    }
}

/// A fixed list, for feeds assembled locally.
#[derive(Debug, Clone, Default)]
pub struct StaticFeed(pub Vec<MediaItem>);

impl MediaListSource for StaticFeed {
    fn fetch_media_list(&self) -> impl Future<Output = Result<Vec<MediaItem>, FetchError>> + Send {
        let items = self.0.clone();
        async move { Ok(items) }
    }
}

/// Parse a manifest body, resolving relative addresses against `base`.
///
/// One invalid address rejects the whole manifest, so every index keeps
/// its position in the list.
pub fn parse_manifest(base: &Url, body: &[u8]) -> Result<Vec<MediaItem>, FetchError> {
    let manifest: Manifest = serde_json::from_slice(body).map_err(|e| FetchError::BadData {
        url: base.to_string(),
        reason: e.to_string(),
    })?;

    manifest
        .videos
        .iter()
        .enumerate()
        .map(|(position, entry)| {
            base.join(entry)
                .map(MediaItem::new)
                .map_err(|e| FetchError::BadData {
                    url: base.to_string(),
                    reason: format!("entry {position} ({entry:?}): {e}"),
                })
        })
        .collect()
}
