//! The offline cache proxy and its event dispatch.

use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use citypulse_common::{retry_with_backoff, RetryConfig};
use citypulse_core::ProxyConfig;
use citypulse_net::{Fetcher, Request};

use crate::cache::{CacheEntry, CacheStorage, FetchResponse};
use crate::classify::RoutingTable;
use crate::clients::{ClientMatchOptions, ClientType, Clients};
use crate::lifecycle::{Registration, ServiceWorker, ServiceWorkerId, ServiceWorkerState};
use crate::message::{InboundMessage, OutboundMessage, ReplyPort};
use crate::push::{
    ClickOutcome, Notification, NotificationAction, NotificationCenter, NotificationClickEvent,
};
use crate::strategy::StrategyContext;
use crate::{now_millis, Result, ServiceWorkerError};

// ==================== Events & Effects ====================

/// Everything the host can deliver to the proxy.
#[derive(Debug)]
pub enum InboundEvent {
    Install,
    Activate,
    Fetch(Request),
    /// Raw push body, if the push carried one.
    Push(Option<Bytes>),
    NotificationClick(NotificationClickEvent),
    /// A message from a page, with the port to answer on.
    Message {
        data: serde_json::Value,
        reply: Option<ReplyPort>,
    },
}

/// What the host should do (or what already happened) after an event.
#[derive(Debug)]
pub enum Effect {
    Installed(InstallReport),
    Activated(ActivationReport),
    /// Answer the intercepted request with this response.
    Respond(FetchResponse),
    /// Not intercepted; the host performs the request itself.
    Passthrough,
    /// Display this notification.
    ShowNotification(Notification),
    NotificationHandled(ClickOutcome),
    /// A reply was posted on the provided port.
    Replied,
    Ignored,
    Failed(ServiceWorkerError),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InstallReport {
    pub version: String,
    /// Manifest paths stored in the current cache.
    pub cached: Vec<String>,
    /// Manifest paths that could not be fetched.
    pub failed: Vec<String>,
    /// Present when activation followed install immediately.
    pub activation: Option<ActivationReport>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivationReport {
    pub version: String,
    /// Stale stores deleted.
    pub evicted: Vec<String>,
    pub clients_claimed: usize,
    /// Clients that received `SW_ACTIVATED`.
    pub clients_notified: usize,
}

/// Observable proxy events.
#[derive(Debug, Clone)]
pub enum ProxyEvent {
    StateChange {
        version: String,
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    StoresEvicted {
        names: Vec<String>,
    },
    NotificationShown {
        id: u64,
    },
}

// ==================== Context ====================

/// State shared by every proxy version running against the same origin.
#[derive(Debug, Clone)]
pub struct ProxyContext {
    pub caches: Arc<RwLock<CacheStorage>>,
    pub clients: Arc<RwLock<Clients>>,
    pub registration: Arc<RwLock<Registration>>,
    pub notifications: Arc<RwLock<NotificationCenter>>,
}

impl ProxyContext {
    pub fn new(scope: Url) -> Self {
        Self {
            caches: Arc::new(RwLock::new(CacheStorage::new())),
            clients: Arc::new(RwLock::new(Clients::new())),
            registration: Arc::new(RwLock::new(Registration::new(scope))),
            notifications: Arc::new(RwLock::new(NotificationCenter::new())),
        }
    }
}

// ==================== Proxy ====================

/// One deployed version of the offline cache proxy.
pub struct OfflineCacheProxy {
    config: Arc<ProxyConfig>,
    origin: Url,
    routes: RoutingTable,
    retry: RetryConfig,
    fetcher: Arc<dyn Fetcher>,
    context: ProxyContext,
    event_tx: mpsc::UnboundedSender<ProxyEvent>,
}

impl OfflineCacheProxy {
    /// Create a proxy with a fresh context.
    pub fn new(
        config: ProxyConfig,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ProxyEvent>)> {
        let origin = config.origin_url()?;
        Self::with_context(config, fetcher, ProxyContext::new(origin))
    }

    /// Create a proxy that shares stores, clients and registration with
    /// other versions.
    pub fn with_context(
        config: ProxyConfig,
        fetcher: Arc<dyn Fetcher>,
        context: ProxyContext,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ProxyEvent>)> {
        config.validate()?;
        let origin = config.origin_url()?;
        let routes = RoutingTable::from_config(&config)?;
        let retry = RetryConfig::attempts(config.precache_retries);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok((
            Self {
                config: Arc::new(config),
                origin,
                routes,
                retry,
                fetcher,
                context,
                event_tx,
            },
            event_rx,
        ))
    }

    pub fn version(&self) -> &str {
        &self.config.version_tag
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn context(&self) -> &ProxyContext {
        &self.context
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    /// Lifecycle state of this version, if registered.
    pub async fn state(&self) -> Option<ServiceWorkerState> {
        self.context
            .registration
            .read()
            .await
            .state_of(self.version())
    }

    /// Whether this version is active and intercepting fetches.
    pub async fn is_controlling(&self) -> bool {
        self.context
            .registration
            .read()
            .await
            .is_controlling(self.version())
    }

    /// Dispatch one event.
    pub async fn handle(&self, event: InboundEvent) -> Effect {
        match event {
            InboundEvent::Install => match self.install().await {
                Ok(report) => Effect::Installed(report),
                Err(e) => Effect::Failed(e),
            },
            InboundEvent::Activate => match self.activate().await {
                Ok(report) => Effect::Activated(report),
                Err(e) => Effect::Failed(e),
            },
            InboundEvent::Fetch(request) => self.handle_fetch(request).await,
            InboundEvent::Push(data) => {
                Effect::ShowNotification(self.handle_push(data.as_deref()).await)
            }
            InboundEvent::NotificationClick(click) => {
                match self.handle_notification_click(click).await {
                    Ok(outcome) => Effect::NotificationHandled(outcome),
                    Err(e) => Effect::Failed(e),
                }
            }
            InboundEvent::Message { data, reply } => self.handle_message(&data, reply).await,
        }
    }

    // ==================== Lifecycle ====================

    /// Precache the manifest into this version's store.
    ///
    /// Entries that cannot be fetched are logged and skipped. Activation
    /// follows immediately when `skip_waiting_on_install` is set.
    pub async fn install(&self) -> Result<InstallReport> {
        let version = self.version();
        {
            let mut registration = self.context.registration.write().await;
            if let Some(replaced) = registration.update(version) {
                self.emit_state(&replaced);
            }
            if let Some(worker) = registration.installing.as_ref() {
                self.emit_state(worker);
            }
        }

        info!(
            version,
            entries = self.config.precache_manifest.len(),
            "Installing"
        );
        self.context.caches.write().await.open(self.cache_name());

        let results = join_all(
            self.config
                .precache_manifest
                .iter()
                .map(|path| self.precache_one(path)),
        )
        .await;

        let mut report = InstallReport {
            version: version.to_string(),
            ..Default::default()
        };
        {
            let mut caches = self.context.caches.write().await;
            let cache = caches.open(self.cache_name());
            for (path, result) in results {
                match result {
                    Ok(entry) => {
                        cache.put(entry);
                        report.cached.push(path);
                    }
                    Err(e) => {
                        warn!(version, path = %path, error = %e, "Precache failed");
                        report.failed.push(path);
                    }
                }
            }
        }

        {
            let mut registration = self.context.registration.write().await;
            if let Some(displaced) = registration.install_complete(version)? {
                self.emit_state(&displaced);
            }
            if let Some(worker) = registration.waiting.as_ref() {
                self.emit_state(worker);
            }
        }

        info!(
            version,
            cached = report.cached.len(),
            failed = report.failed.len(),
            "Installed"
        );

        if self.config.skip_waiting_on_install {
            report.activation = Some(self.activate().await?);
        }

        Ok(report)
    }

    /// Activate the waiting worker of this version: evict every other
    /// store, claim all clients and broadcast `SW_ACTIVATED`.
    pub async fn activate(&self) -> Result<ActivationReport> {
        let version = self.version();
        {
            let mut registration = self.context.registration.write().await;
            if let Some(old) = registration.begin_activation(version)? {
                self.emit_state(&old);
            }
            if let Some(worker) = registration.active.as_ref() {
                self.emit_state(worker);
            }
        }

        let evicted = {
            let mut caches = self.context.caches.write().await;
            caches.open(self.cache_name());
            caches.retain_only(self.cache_name())
        };
        if !evicted.is_empty() {
            info!(version, evicted = ?evicted, "Evicted stale stores");
            let _ = self.event_tx.send(ProxyEvent::StoresEvicted {
                names: evicted.clone(),
            });
        }

        {
            let mut registration = self.context.registration.write().await;
            registration.finish_activation(version)?;
            if let Some(worker) = registration.active.as_ref() {
                self.emit_state(worker);
            }
        }

        let (clients_claimed, controlled) = {
            let mut clients = self.context.clients.write().await;
            let claimed = clients.claim(version, &self.origin);
            let controlled: Vec<_> = clients
                .match_all(&ClientMatchOptions {
                    include_uncontrolled: false,
                    client_type: ClientType::All,
                })
                .into_iter()
                .cloned()
                .collect();
            (claimed, controlled)
        };

        let mut clients_notified = 0;
        for client in &controlled {
            let message = OutboundMessage::SwActivated {
                version: version.to_string(),
            };
            match client.post_message(message) {
                Ok(()) => clients_notified += 1,
                Err(e) => debug!(client = %client.id, error = %e, "Activation broadcast skipped"),
            }
        }

        info!(version, clients_claimed, clients_notified, "Activated");

        Ok(ActivationReport {
            version: version.to_string(),
            evicted,
            clients_claimed,
            clients_notified,
        })
    }

    async fn precache_one(&self, path: &str) -> (String, Result<CacheEntry>) {
        let result: Result<CacheEntry> = async {
            let url = self
                .origin
                .join(path)
                .map_err(|e| ServiceWorkerError::ConfigError(format!("{path}: {e}")))?;

            let response =
                retry_with_backoff(&self.retry, || self.fetch_for_precache(url.clone())).await?;
            Ok(CacheEntry::from_response(url.as_str(), &response))
        }
        .await;

        (path.to_string(), result)
    }

    async fn fetch_for_precache(&self, url: Url) -> Result<FetchResponse> {
        let response = self.strategies().network(Request::get(url.clone())).await?;
        if !response.ok() {
            return Err(ServiceWorkerError::NetworkError(format!(
                "{url} returned {}",
                response.status
            )));
        }
        Ok(response)
    }

    // ==================== Fetch ====================

    /// Route an intercepted request through its strategy.
    pub async fn handle_fetch(&self, request: Request) -> Effect {
        if !self.is_controlling().await {
            return Effect::Passthrough;
        }

        let Some(classified) = self.routes.classify(&request) else {
            return Effect::Passthrough;
        };

        debug!(
            url = %request.url,
            category = ?classified.category,
            strategy = ?classified.strategy,
            "Intercepted"
        );

        let response = self.strategies().run(classified.strategy, request).await;
        Effect::Respond(response)
    }

    fn strategies(&self) -> StrategyContext<'_> {
        StrategyContext {
            fetcher: self.fetcher.as_ref(),
            caches: &self.context.caches,
            cache_name: self.cache_name(),
            origin: &self.origin,
            app_shell: &self.config.app_shell,
            placeholders: &self.config.placeholders,
            timeout: self.config.fetch_timeout(),
        }
    }

    // ==================== Push ====================

    /// Build and record the notification for a push body.
    pub async fn handle_push(&self, data: Option<&[u8]>) -> Notification {
        let notification = Notification::from_push(data, &self.config.notification, now_millis());

        self.context
            .notifications
            .write()
            .await
            .show(notification.clone());
        let _ = self.event_tx.send(ProxyEvent::NotificationShown {
            id: notification.id,
        });

        debug!(id = notification.id, title = %notification.title, "Showing notification");
        notification
    }

    /// Close the clicked notification, then open or focus its target.
    pub async fn handle_notification_click(
        &self,
        click: NotificationClickEvent,
    ) -> Result<ClickOutcome> {
        self.context
            .notifications
            .write()
            .await
            .close(click.notification.id);

        let target = self.origin.join(&click.notification.data.url).map_err(|e| {
            ServiceWorkerError::ClientError(format!("{}: {e}", click.notification.data.url))
        })?;
        let controller = if target.origin() == self.origin.origin() && self.is_controlling().await
        {
            Some(self.version())
        } else {
            None
        };

        let action = click.action.as_deref().and_then(NotificationAction::from_name);
        let mut clients = self.context.clients.write().await;

        match action {
            Some(NotificationAction::Close) => Ok(ClickOutcome::Closed),
            Some(NotificationAction::View) => {
                Ok(ClickOutcome::Opened(clients.open_window(target, controller)))
            }
            None => {
                let existing = clients
                    .match_all(&ClientMatchOptions {
                        include_uncontrolled: true,
                        client_type: ClientType::Window,
                    })
                    .into_iter()
                    .find(|c| c.url == target)
                    .map(|c| c.id.clone());

                match existing {
                    Some(id) => {
                        clients.focus(&id)?;
                        Ok(ClickOutcome::Focused(id))
                    }
                    None => Ok(ClickOutcome::Opened(clients.open_window(target, controller))),
                }
            }
        }
    }

    // ==================== Messages ====================

    /// Handle a message from a page.
    pub async fn handle_message(&self, data: &serde_json::Value, reply: Option<ReplyPort>) -> Effect {
        match InboundMessage::parse(data) {
            InboundMessage::SkipWaiting => {
                let waiting = self
                    .context
                    .registration
                    .read()
                    .await
                    .is_waiting(self.version());
                if !waiting {
                    debug!(version = self.version(), "SKIP_WAITING with nothing waiting");
                    return Effect::Ignored;
                }
                match self.activate().await {
                    Ok(report) => Effect::Activated(report),
                    Err(e) => Effect::Failed(e),
                }
            }
            InboundMessage::CheckVersion => {
                let Some(port) = reply else {
                    debug!("CHECK_VERSION without a reply port");
                    return Effect::Ignored;
                };
                let info = OutboundMessage::VersionInfo {
                    version: self.version().to_string(),
                };
                match port.send(info) {
                    Ok(()) => Effect::Replied,
                    Err(_) => {
                        debug!("CHECK_VERSION reply port closed");
                        Effect::Ignored
                    }
                }
            }
            InboundMessage::Unknown => {
                debug!(message = %data, "Ignoring unrecognized message");
                Effect::Ignored
            }
        }
    }

    // ==================== Helpers ====================

    fn cache_name(&self) -> &str {
        self.config.cache_name()
    }

    fn emit_state(&self, worker: &ServiceWorker) {
        let _ = self.event_tx.send(ProxyEvent::StateChange {
            version: worker.version.clone(),
            worker_id: worker.id,
            new_state: worker.state,
        });
    }
}
