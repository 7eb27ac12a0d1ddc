//! Caching strategies.
//!
//! Each strategy is a strictly sequential fallback chain for one request and
//! always ends in a [`FetchResponse`]. Store locks are never held across a
//! network attempt.

use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

use citypulse_common::with_timeout;
use citypulse_core::PlaceholderMap;
use citypulse_net::{Fetcher, Request};

use crate::cache::{CacheEntry, CacheStorage, FetchResponse, ResponseSource};
use crate::classify::Strategy;
use crate::Result;

/// Everything a strategy needs for one request.
pub struct StrategyContext<'a> {
    pub fetcher: &'a dyn Fetcher,
    pub caches: &'a RwLock<CacheStorage>,
    /// Store that reads and writes go to.
    pub cache_name: &'a str,
    pub origin: &'a Url,
    pub app_shell: &'a str,
    pub placeholders: &'a PlaceholderMap,
    /// Bound on each network attempt; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl StrategyContext<'_> {
    /// Run `strategy` for `request`.
    pub async fn run(&self, strategy: Strategy, request: Request) -> FetchResponse {
        match strategy {
            Strategy::NetworkFirst => self.network_first(request).await,
            Strategy::CacheFirstWithPlaceholder => self.cache_first(request, true).await,
            Strategy::CacheFirst => self.cache_first(request, false).await,
            Strategy::NetworkFirstWithCacheFallback => {
                self.network_first_with_cache_fallback(request).await
            }
        }
    }

    async fn network_first(&self, request: Request) -> FetchResponse {
        let url = request.url.clone();
        match self.network(request).await {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %url, error = %e, "Network failed, serving app shell");
                self.app_shell().await
            }
        }
    }

    async fn cache_first(&self, request: Request, placeholder: bool) -> FetchResponse {
        let key = request.url.to_string();

        if let Some(hit) = self.lookup(&key, ResponseSource::Cache).await {
            debug!(url = %key, "Cache hit");
            return hit;
        }

        match self.network(request).await {
            Ok(response) => {
                self.store(&key, &response).await;
                response
            }
            Err(e) if placeholder => {
                debug!(url = %key, error = %e, "Image unavailable, serving placeholder");
                self.placeholder(&key).await
            }
            Err(e) => {
                warn!(url = %key, error = %e, "Asset unavailable offline");
                FetchResponse::network_error()
            }
        }
    }

    async fn network_first_with_cache_fallback(&self, request: Request) -> FetchResponse {
        let key = request.url.to_string();

        match self.network(request).await {
            Ok(response) => {
                self.store(&key, &response).await;
                response
            }
            Err(e) => {
                debug!(url = %key, error = %e, "Network failed, trying cache");
                match self.lookup(&key, ResponseSource::Cache).await {
                    Some(hit) => hit,
                    None => self.app_shell().await,
                }
            }
        }
    }

    /// One network attempt, bounded by the configured timeout.
    pub(crate) async fn network(&self, request: Request) -> Result<FetchResponse> {
        let response = match self.timeout {
            Some(timeout) => with_timeout(timeout, || self.fetcher.fetch(request)).await??,
            None => self.fetcher.fetch(request).await?,
        };
        Ok(FetchResponse::from_network(response))
    }

    async fn lookup(&self, url: &str, source: ResponseSource) -> Option<FetchResponse> {
        let caches = self.caches.read().await;
        caches
            .match_in(self.cache_name, url)
            .map(|entry| FetchResponse::from_cache(entry, source))
    }

    /// Store a copy of a successful response; the caller keeps the original.
    /// Nothing is written once the store has been evicted.
    async fn store(&self, url: &str, response: &FetchResponse) {
        if !response.ok() {
            debug!(url, status = response.status, "Not caching unsuccessful response");
            return;
        }
        let entry = CacheEntry::from_response(url, response);
        match self.caches.write().await.get_mut(self.cache_name) {
            Some(cache) => cache.put(entry),
            None => debug!(url, cache = self.cache_name, "Store evicted, not caching"),
        }
    }

    async fn app_shell(&self) -> FetchResponse {
        self.cached_fallback(self.app_shell, ResponseSource::AppShell)
            .await
    }

    async fn placeholder(&self, url: &str) -> FetchResponse {
        self.cached_fallback(self.placeholders.select(url), ResponseSource::Placeholder)
            .await
    }

    async fn cached_fallback(&self, path: &str, source: ResponseSource) -> FetchResponse {
        let url = match self.origin.join(path) {
            Ok(url) => url,
            Err(e) => {
                warn!(path, error = %e, "Invalid fallback path");
                return FetchResponse::network_error();
            }
        };

        match self.lookup(url.as_str(), source).await {
            Some(response) => response,
            None => {
                warn!(url = %url, "Fallback is not cached");
                FetchResponse::network_error()
            }
        }
    }
}
