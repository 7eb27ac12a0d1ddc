//! Offline proxy configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;
use url::Url;

use crate::error::{CoreError, CoreResult};

/// Offline proxy configuration.
///
/// Everything the proxy needs to know about a deployment lives here, so the
/// manifest and version can change at deploy time without touching the
/// routing logic. Bump `version_tag` whenever the manifest or routing changes
/// so that stale stores are evicted on activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Origin the proxy sits in front of (scheme, host and port)
    pub origin: String,

    /// Version tag; also the name of the current cache store
    pub version_tag: String,

    /// Path of the app shell document used as the universal fallback
    pub app_shell: String,

    /// Paths fetched into the current store during install
    pub precache_manifest: Vec<String>,

    /// Image placeholders served when an image is neither cached nor reachable
    pub placeholders: PlaceholderMap,

    /// Cross-origin hosts treated as API traffic (suffix match on the hostname)
    pub api_hosts: Vec<String>,

    /// Cross-origin font CDN hosts (suffix match on the hostname)
    pub font_hosts: Vec<String>,

    /// Upper bound on each network attempt in milliseconds; `None` waits forever
    pub fetch_timeout_ms: Option<u64>,

    /// Attempts per precache entry (1 = no retries)
    pub precache_retries: u32,

    /// Activate right after install instead of waiting for `SKIP_WAITING`
    pub skip_waiting_on_install: bool,

    /// Push notification presentation
    pub notification: NotificationConfig,
}

/// Placeholder image paths keyed by the substring that selects them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaceholderMap {
    /// Used for URLs containing `deal`
    pub deal: String,

    /// Used for URLs containing `event`
    pub event: String,

    /// Used for every other image
    pub default: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub default_title: String,
    pub default_body: String,
    pub default_url: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:5000".to_string(),
            version_tag: "citypulse-v1.0.0".to_string(),
            app_shell: "/index.html".to_string(),
            precache_manifest: vec![
                "/".to_string(),
                "/index.html".to_string(),
                "/manifest.json".to_string(),
                "/icons/icon-192x192.png".to_string(),
                "/icons/icon-512x512.png".to_string(),
                "/icons/badge-72x72.png".to_string(),
                "/images/placeholder.jpg".to_string(),
                "/images/deal-placeholder.jpg".to_string(),
                "/images/event-placeholder.jpg".to_string(),
            ],
            placeholders: PlaceholderMap::default(),
            api_hosts: vec![
                "supabase.co".to_string(),
                "maps.googleapis.com".to_string(),
                "citypulse-data.onrender.com".to_string(),
            ],
            font_hosts: vec![
                "fonts.googleapis.com".to_string(),
                "fonts.gstatic.com".to_string(),
            ],
            fetch_timeout_ms: Some(10_000),
            precache_retries: 1,
            skip_waiting_on_install: true,
            notification: NotificationConfig::default(),
        }
    }
}

impl Default for PlaceholderMap {
    fn default() -> Self {
        Self {
            deal: "/images/deal-placeholder.jpg".to_string(),
            event: "/images/event-placeholder.jpg".to_string(),
            default: "/images/placeholder.jpg".to_string(),
        }
    }
}

impl PlaceholderMap {
    /// Pick the placeholder for an image URL: `deal` wins over `event`.
    pub fn select(&self, url: &str) -> &str {
        if url.contains("deal") {
            &self.deal
        } else if url.contains("event") {
            &self.event
        } else {
            &self.default
        }
    }

    /// All three paths, deal first.
    pub fn paths(&self) -> [&str; 3] {
        [&self.deal, &self.event, &self.default]
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            icon: "/icons/icon-192x192.png".to_string(),
            badge: "/icons/badge-72x72.png".to_string(),
            vibrate: vec![100, 50, 100],
            default_title: "CityPulse Notification".to_string(),
            default_body: "You have a new notification from CityPulse".to_string(),
            default_url: "/".to_string(),
        }
    }
}

impl ProxyConfig {
    /// Parse a configuration from JSON and validate it.
    pub fn from_json_str(json: &str) -> CoreResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file and validate it.
    pub fn from_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    /// Parsed origin.
    pub fn origin_url(&self) -> CoreResult<Url> {
        let url = Url::parse(&self.origin)?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(CoreError::config(format!(
                "origin must be http or https, got '{other}'"
            ))),
        }
    }

    /// Name of the store owned by this version.
    pub fn cache_name(&self) -> &str {
        &self.version_tag
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms.map(Duration::from_millis)
    }

    /// Placeholders that are not part of the precache manifest.
    pub fn missing_placeholders(&self) -> Vec<&str> {
        self.placeholders
            .paths()
            .into_iter()
            .filter(|path| !self.precache_manifest.iter().any(|p| p == path))
            .collect()
    }

    /// Reject configurations the proxy cannot run with.
    ///
    /// Placeholders missing from the manifest only degrade the image
    /// fallback, so they are logged rather than rejected.
    pub fn validate(&self) -> CoreResult<()> {
        if self.version_tag.trim().is_empty() {
            return Err(CoreError::config("version_tag must not be empty"));
        }

        self.origin_url()?;

        if !self.app_shell.starts_with('/') {
            return Err(CoreError::config(format!(
                "app_shell must be an absolute path, got '{}'",
                self.app_shell
            )));
        }

        if !self.precache_manifest.contains(&self.app_shell) {
            return Err(CoreError::config(format!(
                "app_shell '{}' is not in the precache manifest",
                self.app_shell
            )));
        }

        if self.fetch_timeout_ms == Some(0) {
            return Err(CoreError::config(
                "fetch_timeout_ms must be positive (use null to disable)",
            ));
        }

        for path in self.missing_placeholders() {
            warn!(path, "Placeholder is not precached; image fallback will fail for it");
        }

        Ok(())
    }
}
