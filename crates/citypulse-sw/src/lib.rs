//! # CityPulse Offline Proxy
//!
//! The offline cache proxy that sits between the CityPulse web app and the
//! network (a service worker in the browser build).
//!
//! ## Features
//!
//! - **Lifecycle**: install (precache), activate (evict stale stores, claim
//!   clients, broadcast), with optional skip-waiting
//! - **Cache storage**: versioned named stores of request → response
//! - **Routing**: an ordered `(pattern, strategy)` table, first match wins
//! - **Strategies**: network-first, cache-first, cache-first with placeholder,
//!   network-first with cache fallback
//! - **Push**: tolerant payload parsing, notification descriptors, click handling
//! - **Messages**: `SKIP_WAITING` and `CHECK_VERSION`
//!
//! ## Architecture
//!
//! ```text
//! OfflineCacheProxy::handle(InboundEvent) -> Effect
//!     │
//!     ├── RoutingTable ── classify(Request) -> ClassifiedRequest
//!     ├── strategy ────── run(ClassifiedRequest) -> FetchResponse
//!     └── ProxyContext
//!             ├── Registration (installing / waiting / active)
//!             ├── CacheStorage
//!             │       └── Cache (one per version tag)
//!             ├── Clients
//!             └── NotificationCenter
//! ```

use std::time::Duration;
use thiserror::Error;

pub mod cache;
pub mod classify;
pub mod clients;
pub mod lifecycle;
pub mod message;
pub mod proxy;
pub mod push;
pub mod strategy;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{Cache, CacheEntry, CacheStorage, FetchResponse, ResponseSource};
pub use classify::{ClassifiedRequest, RequestCategory, Route, RoutingTable, Strategy};
pub use clients::{Client, ClientMatchOptions, ClientType, Clients};
pub use lifecycle::{Registration, ServiceWorker, ServiceWorkerId, ServiceWorkerState};
pub use message::{InboundMessage, OutboundMessage, ReplyPort};
pub use proxy::{
    ActivationReport, Effect, InboundEvent, InstallReport, OfflineCacheProxy, ProxyContext,
    ProxyEvent,
};
pub use push::{
    ClickOutcome, Notification, NotificationAction, NotificationCenter, NotificationClickEvent,
    NotificationData, PushPayload,
};

// ==================== Errors ====================

/// Errors that can occur in offline proxy operations.
#[derive(Error, Debug, Clone)]
pub enum ServiceWorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Client error: {0}")]
    ClientError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<citypulse_core::CoreError> for ServiceWorkerError {
    fn from(e: citypulse_core::CoreError) -> Self {
        Self::ConfigError(e.to_string())
    }
}

impl From<citypulse_net::NetError> for ServiceWorkerError {
    fn from(e: citypulse_net::NetError) -> Self {
        match e {
            citypulse_net::NetError::Timeout(d) => Self::Timeout(d),
            other => Self::NetworkError(other.to_string()),
        }
    }
}

impl From<citypulse_common::PulseError> for ServiceWorkerError {
    fn from(e: citypulse_common::PulseError) -> Self {
        match e {
            citypulse_common::PulseError::Timeout(d) => Self::Timeout(d),
            other => Self::StateError(other.to_string()),
        }
    }
}

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ServiceWorkerError>;

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
