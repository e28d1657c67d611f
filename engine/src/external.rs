//! External Map Source
//!
//! Fetches import maps from URLs, caches them for the process lifetime and
//! assembles the page's default map. Fetch failures are never surfaced:
//! a bad URL behaves like an empty map and lands on the invalid list.

use crate::errors::{ImoError, Result};
use crate::host::{MapSourceBody, PageContext};
use crate::import_map::{ImportMap, expand_map, expand_url, merge};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::OnceCell;

/// Raw HTTP response handed back by a [`MapFetcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// Final URL after redirects
    pub url: String,
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

/// Asynchronous source of external import maps.
#[async_trait]
pub trait MapFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> std::result::Result<FetchResponse, FetchError>;
}

/// [`MapFetcher`] over a shared `reqwest` client.
#[derive(Debug, Clone, Default)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MapFetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<FetchResponse, FetchError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let body = resp.text().await?;
        Ok(FetchResponse {
            url: final_url,
            status,
            body,
        })
    }
}

type SharedMap = Shared<BoxFuture<'static, ImportMap>>;

/// Cached, deduplicated access to external import maps.
pub struct ExternalMapSource {
    fetcher: Arc<dyn MapFetcher>,
    in_flight: Mutex<HashMap<String, SharedMap>>,
    invalid: Arc<Mutex<Vec<String>>>,
    default_map: OnceCell<ImportMap>,
}

impl ExternalMapSource {
    pub fn new(fetcher: Arc<dyn MapFetcher>) -> Self {
        Self {
            fetcher,
            in_flight: Mutex::new(HashMap::new()),
            invalid: Arc::new(Mutex::new(Vec::new())),
            default_map: OnceCell::new(),
        }
    }

    /// Fetch `url` once per process and share the result.
    ///
    /// Inside a Tokio runtime the download runs on its own task, so it
    /// completes and fills the cache even if every caller stops waiting.
    pub async fn fetch_map(&self, url: &str) -> ImportMap {
        let shared = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match in_flight.get(url) {
                Some(existing) => {
                    tracing::debug!(url = %url, "external map cache hit");
                    existing.clone()
                }
                None => {
                    let fetch = spawn_fetch(self.fetcher.clone(), self.invalid.clone(), url);
                    in_flight.insert(url.to_string(), fetch.clone());
                    fetch
                }
            }
        };
        shared.await
    }

    /// Merge the maps behind `urls`, later URLs winning.
    pub async fn external_map(&self, urls: &[String]) -> ImportMap {
        let maps = futures::future::join_all(urls.iter().map(|url| self.fetch_map(url))).await;
        maps.iter()
            .fold(ImportMap::empty(), |acc, map| merge(&acc, map))
    }

    /// Whether `url` downloads and parses. Reuses the cache.
    pub async fn is_map_valid(&self, url: &str) -> bool {
        self.fetch_map(url).await;
        !self.is_invalid(url)
    }

    pub fn is_invalid(&self, url: &str) -> bool {
        self.invalid
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|invalid| invalid == url)
    }

    /// URLs whose fetch failed, in failure order.
    pub fn invalid_maps(&self) -> Vec<String> {
        self.invalid
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Forget every cached external map and the invalid list.
    pub fn reset_cache(&self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.invalid
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// The page's declared default maps merged left to right. Memoized once
    /// it succeeds; engine-injected sources and scripts of other types are
    /// skipped.
    pub async fn default_map(&self, page: &PageContext, import_map_type: &str) -> Result<ImportMap> {
        self.default_map
            .get_or_try_init(|| self.load_default_map(page, import_map_type))
            .await
            .cloned()
    }

    async fn load_default_map(&self, page: &PageContext, import_map_type: &str) -> Result<ImportMap> {
        let loads = page
            .default_maps
            .iter()
            .filter(|source| source.counts_as_default(import_map_type))
            .map(|source| async move {
                match &source.body {
                    MapSourceBody::Inline(text) => parse_inline(text),
                    MapSourceBody::Remote(url) => {
                        let url = match &page.base_url {
                            Some(base) => expand_url(url, base),
                            None => url.clone(),
                        };
                        Ok(self.fetch_map(&url).await)
                    }
                }
            });

        let maps = futures::future::try_join_all(loads).await?;
        tracing::debug!(sources = maps.len(), "assembled default import map");
        Ok(maps
            .iter()
            .fold(ImportMap::empty(), |acc, map| merge(&acc, map)))
    }
}

/// Parse an inline map; blank text is an empty map.
pub(crate) fn parse_inline(text: &str) -> Result<ImportMap> {
    if text.trim().is_empty() {
        return Ok(ImportMap::empty());
    }
    ImportMap::parse(text).map_err(|source| ImoError::InvalidInlineMap { source })
}

fn spawn_fetch(fetcher: Arc<dyn MapFetcher>, invalid: Arc<Mutex<Vec<String>>>, url: &str) -> SharedMap {
    let url = url.to_string();
    let task_url = url.clone();
    let load = async move { load_map(fetcher.as_ref(), &invalid, task_url).await };

    // Without a runtime the first poller drives the fetch itself.
    let Ok(runtime) = Handle::try_current() else {
        return load.boxed().shared();
    };
    let handle = runtime.spawn(load);

    async move {
        handle.await.unwrap_or_else(|err| {
            tracing::warn!(url = %url, error = %err, "external map task failed");
            ImportMap::empty()
        })
    }
    .boxed()
    .shared()
}

async fn load_map(fetcher: &dyn MapFetcher, invalid: &Mutex<Vec<String>>, url: String) -> ImportMap {
    match download(fetcher, &url).await {
        Ok(map) => {
            tracing::debug!(url = %url, imports = map.imports.len(), "fetched external map");
            expand_map(&map, &url)
        }
        Err(err) => {
            tracing::warn!(
                url = %url,
                category = err.category().as_str(),
                error = %err,
                "treating external import map as empty"
            );
            invalid
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(url);
            ImportMap::empty()
        }
    }
}

async fn download(fetcher: &dyn MapFetcher, url: &str) -> Result<ImportMap> {
    let resp = fetcher.fetch(url).await.map_err(|e| {
        ImoError::fetch_with_source(format!("unable to download external import map at '{url}'"), e)
    })?;

    if !resp.is_success() {
        return Err(ImoError::fetch(format!(
            "unable to download external import map from {}: status {}",
            resp.url, resp.status
        )));
    }

    ImportMap::parse(&resp.body).map_err(|e| {
        ImoError::fetch_with_source(
            format!("invalid JSON in external import map from {}", resp.url),
            e,
        )
    })
}
