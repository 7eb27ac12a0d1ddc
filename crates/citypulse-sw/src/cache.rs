//! Cache storage: named stores of request URL → stored response.

use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::now_millis;

// ==================== Cache Entry ====================

/// A cached request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method (always GET for stored entries).
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers in arrival order; repeated names keep every value.
    pub headers: Vec<(String, Vec<u8>)>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a response for storage under `url`.
    pub fn from_response(url: &str, response: &FetchResponse) -> Self {
        Self {
            url: url.to_string(),
            method: "GET".to_string(),
            status: response.status,
            headers: response
                .headers
                .iter()
                .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
                .collect(),
            body: response.body.to_vec(),
            cached_at: now_millis(),
        }
    }
}

// ==================== Cache ====================

/// A single named store.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name (the version tag that owns it).
    pub name: String,

    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Exact match on the request URL.
    pub fn match_request(&self, url: &str) -> Option<&CacheEntry> {
        self.entries.get(url)
    }

    /// Insert or overwrite; last write wins.
    pub fn put(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.url.clone(), entry);
    }

    /// Delete entry.
    pub fn delete(&mut self, url: &str) -> bool {
        self.entries.remove(url).is_some()
    }

    /// Get all keys (URLs).
    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache Storage ====================

/// All stores visible to the proxy.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Get a cache without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Get a cache for writing without creating it.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Cache> {
        self.caches.get_mut(name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// All cache names, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.keys().cloned().collect();
        names.sort();
        names
    }

    /// Match `url` in the store called `name`.
    pub fn match_in(&self, name: &str, url: &str) -> Option<&CacheEntry> {
        self.caches.get(name)?.match_request(url)
    }

    /// Delete every store except `keep`. Returns the deleted names, sorted.
    pub fn retain_only(&mut self, keep: &str) -> Vec<String> {
        let stale: Vec<String> = self.keys().into_iter().filter(|n| n != keep).collect();
        for name in &stale {
            self.caches.remove(name);
        }
        stale
    }
}

// ==================== Fetch Response ====================

/// Where a response handed back to the caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseSource {
    Network,
    Cache,
    /// The cached app shell served in place of the requested resource.
    AppShell,
    /// A cached placeholder image served in place of the requested image.
    Placeholder,
    /// Synthesized network error; nothing else was available.
    Error,
}

/// Response returned for an intercepted request.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Status code; 0 for a network error.
    pub status: u16,

    pub status_text: String,

    pub headers: HeaderMap,

    /// Reference-counted, so handing one copy to a store and one to the
    /// caller never consumes either.
    pub body: Bytes,

    pub source: ResponseSource,
}

impl FetchResponse {
    /// Create a network error response.
    pub fn network_error() -> Self {
        Self {
            status: 0,
            status_text: "Network Error".to_string(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            source: ResponseSource::Error,
        }
    }

    /// Create a response from a cache entry.
    pub fn from_cache(entry: &CacheEntry, source: ResponseSource) -> Self {
        Self {
            status: entry.status,
            status_text: status_text(entry.status),
            headers: entry_headers(entry),
            body: Bytes::from(entry.body.clone()),
            source,
        }
    }

    /// Convert a network response.
    pub fn from_network(response: citypulse_net::Response) -> Self {
        Self {
            status: response.status.as_u16(),
            status_text: status_text(response.status.as_u16()),
            headers: response.headers,
            body: response.body,
            source: ResponseSource::Network,
        }
    }

    /// 2xx status.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First value of a header, if it is valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

fn entry_headers(entry: &CacheEntry) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(entry.headers.len());
    for (name, value) in &entry.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_bytes(value),
        ) {
            headers.append(name, value);
        }
    }
    headers
}

fn status_text(status: u16) -> String {
    http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(url: &str, body: &[u8]) -> CacheEntry {
        CacheEntry {
            url: url.to_string(),
            method: "GET".to_string(),
            status: 200,
            headers: Vec::new(),
            body: body.to_vec(),
            cached_at: 0,
        }
    }

    #[test]
    fn test_cache_put_and_match() {
        let mut cache = Cache::new("v1");
        cache.put(entry("https://citypulse.example/style.css", b"body{}"));

        assert!(cache.match_request("https://citypulse.example/style.css").is_some());
        assert!(cache.match_request("https://citypulse.example/other.css").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_last_write_wins() {
        let mut cache = Cache::new("v1");
        cache.put(entry("https://citypulse.example/a.png", b"first"));
        cache.put(entry("https://citypulse.example/a.png", b"second"));

        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.match_request("https://citypulse.example/a.png").unwrap().body,
            b"second"
        );
    }

    #[test]
    fn test_cache_delete() {
        let mut cache = Cache::new("v1");
        cache.put(entry("https://citypulse.example/style.css", b""));
        assert!(cache.delete("https://citypulse.example/style.css"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_storage() {
        let mut storage = CacheStorage::new();
        assert!(!storage.has("v1"));

        storage.open("v1");
        assert!(storage.has("v1"));

        assert!(storage.delete("v1"));
        assert!(!storage.has("v1"));
    }

    #[test]
    fn test_retain_only() {
        let mut storage = CacheStorage::new();
        storage.open("citypulse-v0");
        storage.open("citypulse-v1");
        storage.open("legacy-images");

        let evicted = storage.retain_only("citypulse-v1");
        assert_eq!(evicted, vec!["citypulse-v0", "legacy-images"]);
        assert_eq!(storage.keys(), vec!["citypulse-v1"]);
    }

    #[test]
    fn test_match_in_named_store_only() {
        let mut storage = CacheStorage::new();
        storage
            .open("old")
            .put(entry("https://citypulse.example/index.html", b"old"));

        assert!(storage
            .match_in("old", "https://citypulse.example/index.html")
            .is_some());
        assert!(storage
            .match_in("new", "https://citypulse.example/index.html")
            .is_none());
    }

    #[test]
    fn test_fetch_response_from_cache() {
        let response = FetchResponse::from_cache(
            &entry("https://citypulse.example/data.json", b"{}"),
            ResponseSource::Cache,
        );
        assert_eq!(response.status, 200);
        assert_eq!(response.status_text, "OK");
        assert_eq!(response.source, ResponseSource::Cache);
        assert!(response.ok());
    }

    #[test]
    fn test_network_error_response() {
        let response = FetchResponse::network_error();
        assert_eq!(response.status, 0);
        assert!(!response.ok());
        assert_eq!(response.source, ResponseSource::Error);
    }

    #[test]
    fn test_entry_snapshot_is_independent() {
        let mut response = FetchResponse::from_cache(
            &entry("https://citypulse.example/a.js", b"let a;"),
            ResponseSource::Network,
        );
        let stored = CacheEntry::from_response("https://citypulse.example/a.js", &response);
        response.body = Bytes::from_static(b"changed");

        assert_eq!(stored.body, b"let a;");
        assert!(stored.cached_at > 0);
    }

    #[test]
    fn test_repeated_headers_survive_storage() {
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", HeaderValue::from_static("a=1; Path=/"));
        headers.append("set-cookie", HeaderValue::from_static("b=2; Path=/"));
        headers.append("x-raw", HeaderValue::from_bytes(b"caf\xe9").unwrap());
        let response = FetchResponse {
            status: 200,
            status_text: "OK".to_string(),
            headers,
            body: Bytes::from_static(b"ok"),
            source: ResponseSource::Network,
        };

        let stored = CacheEntry::from_response("https://citypulse.example/api/me", &response);
        let replayed = FetchResponse::from_cache(&stored, ResponseSource::Cache);

        let cookies: Vec<_> = replayed.headers.get_all("set-cookie").iter().collect();
        assert_eq!(cookies, vec!["a=1; Path=/", "b=2; Path=/"]);
        assert_eq!(replayed.headers["x-raw"].as_bytes(), b"caf\xe9");
        assert_eq!(replayed.header("x-raw"), None);
    }
}
