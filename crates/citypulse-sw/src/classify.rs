//! Request classification.
//!
//! The routing policy is data: an ordered list of routes, each a set of URL
//! patterns (any of which matches) plus the strategy to run. The first route
//! that matches wins, so categories are mutually exclusive by construction.

use serde::Serialize;
use url::Url;

use citypulse_core::ProxyConfig;
use citypulse_net::{host_matches, Request, UrlPattern};

use crate::Result;

pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "svg", "webp", "avif", "tiff", "bmp",
];
pub const FONT_EXTENSIONS: &[&str] = &["woff", "woff2", "ttf", "eot"];
pub const STATIC_EXTENSIONS: &[&str] = &["js", "css", "html", "json", "ico"];

/// Resource category of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RequestCategory {
    Api,
    Image,
    Font,
    StaticAsset,
    Other,
}

/// Caching policy applied to a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Strategy {
    /// Network; on failure the cached app shell.
    NetworkFirst,
    /// Cache; on miss network (stored); on failure a placeholder image.
    CacheFirstWithPlaceholder,
    /// Cache; on miss network (stored); on failure a network error.
    CacheFirst,
    /// Network (stored); on failure the exact cached entry, then the app shell.
    NetworkFirstWithCacheFallback,
}

/// One row of the routing table.
#[derive(Debug, Clone)]
pub struct Route {
    pub category: RequestCategory,
    pub strategy: Strategy,
    pub patterns: Vec<UrlPattern>,
}

impl Route {
    pub fn new(category: RequestCategory, strategy: Strategy, patterns: Vec<UrlPattern>) -> Self {
        Self {
            category,
            strategy,
            patterns,
        }
    }

    pub fn matches(&self, url: &Url) -> bool {
        self.patterns.iter().any(|p| p.matches(url))
    }
}

/// Outcome of classifying a request the proxy intercepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedRequest {
    pub category: RequestCategory,
    pub strategy: Strategy,
}

/// Ordered routes plus the interception scope.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    origin: Url,
    cross_origin_hosts: Vec<String>,
    routes: Vec<Route>,
}

impl RoutingTable {
    /// Build the CityPulse routing table from configuration.
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        let origin = config.origin_url()?;

        let mut api = vec![UrlPattern::path_contains("/api/")];
        api.extend(config.api_hosts.iter().map(|h| UrlPattern::host(h)));

        let mut fonts = vec![UrlPattern::extensions(FONT_EXTENSIONS)];
        fonts.extend(config.font_hosts.iter().map(|h| UrlPattern::host(h)));

        let routes = vec![
            Route::new(RequestCategory::Api, Strategy::NetworkFirst, api),
            Route::new(
                RequestCategory::Image,
                Strategy::CacheFirstWithPlaceholder,
                vec![UrlPattern::extensions(IMAGE_EXTENSIONS)],
            ),
            Route::new(RequestCategory::Font, Strategy::CacheFirst, fonts),
            Route::new(
                RequestCategory::StaticAsset,
                Strategy::CacheFirst,
                vec![UrlPattern::extensions(STATIC_EXTENSIONS)],
            ),
            Route::new(
                RequestCategory::Other,
                Strategy::NetworkFirstWithCacheFallback,
                vec![UrlPattern::Any],
            ),
        ];

        let cross_origin_hosts = config
            .api_hosts
            .iter()
            .chain(config.font_hosts.iter())
            .cloned()
            .collect();

        Ok(Self::new(origin, cross_origin_hosts, routes))
    }

    /// Build a table from explicit parts.
    pub fn new(origin: Url, cross_origin_hosts: Vec<String>, routes: Vec<Route>) -> Self {
        Self {
            origin,
            cross_origin_hosts,
            routes,
        }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Same origin, or one of the known cross-origin API and font hosts.
    pub fn in_scope(&self, url: &Url) -> bool {
        if url.origin() == self.origin.origin() {
            return true;
        }
        url.host_str().is_some_and(|host| {
            self.cross_origin_hosts
                .iter()
                .any(|pattern| host_matches(host, pattern))
        })
    }

    /// Classify a request. `None` means the proxy leaves it alone.
    pub fn classify(&self, request: &Request) -> Option<ClassifiedRequest> {
        if !request.is_get() || !self.in_scope(&request.url) {
            return None;
        }

        self.routes
            .iter()
            .find(|route| route.matches(&request.url))
            .map(|route| ClassifiedRequest {
                category: route.category,
                strategy: route.strategy,
            })
    }
}
