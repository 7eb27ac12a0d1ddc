//! End-to-end lifecycle tests: one version going offline, then a second
//! version taking over the same origin.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde_json::json;
use tokio::sync::mpsc;
use url::Url;

use citypulse_core::ProxyConfig;
use citypulse_net::{Fetcher, NetError, Request, Response};
use citypulse_sw::{
    Client, Effect, InboundEvent, OfflineCacheProxy, OutboundMessage, ProxyContext, ProxyEvent,
    ResponseSource, ServiceWorkerState,
};

const ORIGIN: &str = "https://citypulse.test";

/// Serves a fixed site until switched offline.
#[derive(Clone, Default)]
struct Site {
    pages: Arc<Mutex<HashMap<String, &'static str>>>,
    offline: Arc<Mutex<bool>>,
}

impl Site {
    fn new() -> Self {
        let site = Self::default();
        for (path, body) in [
            ("/", "<root v1>"),
            ("/index.html", "<shell v1>"),
            ("/images/placeholder.jpg", "generic"),
            ("/images/deal-placeholder.jpg", "deal"),
            ("/images/event-placeholder.jpg", "event"),
            ("/api/deals", "[{\"id\":1}]"),
        ] {
            site.serve(path, body);
        }
        site
    }

    fn serve(&self, path: &str, body: &'static str) {
        self.pages
            .lock()
            .unwrap()
            .insert(format!("{ORIGIN}{path}"), body);
    }

    fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap() = offline;
    }
}

#[async_trait]
impl Fetcher for Site {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        if *self.offline.lock().unwrap() {
            return Err(NetError::RequestFailed("offline".to_string()));
        }
        let body = self.pages.lock().unwrap().get(request.url.as_str()).copied();
        let (status, body) = match body {
            Some(body) => (StatusCode::OK, body),
            None => (StatusCode::NOT_FOUND, ""),
        };
        Ok(Response {
            request_id: request.id,
            url: request.url,
            status,
            headers: HeaderMap::new(),
            body: Bytes::from_static(body.as_bytes()),
        })
    }
}

fn config(version: &str, skip_waiting: bool) -> ProxyConfig {
    ProxyConfig {
        origin: ORIGIN.to_string(),
        version_tag: version.to_string(),
        precache_manifest: vec![
            "/".to_string(),
            "/index.html".to_string(),
            "/images/placeholder.jpg".to_string(),
            "/images/deal-placeholder.jpg".to_string(),
            "/images/event-placeholder.jpg".to_string(),
        ],
        fetch_timeout_ms: Some(500),
        skip_waiting_on_install: skip_waiting,
        ..Default::default()
    }
}

fn get(path: &str) -> InboundEvent {
    InboundEvent::Fetch(Request::get(Url::parse(&format!("{ORIGIN}{path}")).unwrap()))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("citypulse_sw=debug")
        .try_init();
}

#[tokio::test]
async fn test_offline_after_install() {
    init_tracing();
    let site = Site::new();
    let (proxy, _events) =
        OfflineCacheProxy::new(config("citypulse-v1", true), Arc::new(site.clone())).unwrap();

    assert!(matches!(proxy.handle(InboundEvent::Install).await, Effect::Installed(_)));

    // Online: API goes to the network and is not stored.
    let Effect::Respond(response) = proxy.handle(get("/api/deals")).await else {
        panic!("expected a response");
    };
    assert_eq!(response.source, ResponseSource::Network);

    site.set_offline(true);

    let Effect::Respond(response) = proxy.handle(get("/api/deals")).await else {
        panic!("expected a response");
    };
    assert_eq!(response.source, ResponseSource::AppShell);
    assert_eq!(&response.body[..], b"<shell v1>");

    let Effect::Respond(response) = proxy.handle(get("/uploads/deal-7.jpg")).await else {
        panic!("expected a response");
    };
    assert_eq!(response.source, ResponseSource::Placeholder);
    assert_eq!(&response.body[..], b"deal");

    let Effect::Respond(response) = proxy.handle(get("/")).await else {
        panic!("expected a response");
    };
    assert_eq!(response.source, ResponseSource::Cache);
    assert_eq!(&response.body[..], b"<root v1>");

    let Effect::Respond(response) = proxy.handle(get("/assets/app.js")).await else {
        panic!("expected a response");
    };
    assert_eq!(response.status, 0);
}

#[tokio::test]
async fn test_upgrade_waits_for_skip_waiting() {
    init_tracing();
    let site = Site::new();
    let context = ProxyContext::new(Url::parse(ORIGIN).unwrap());

    let (v1, _v1_events) = OfflineCacheProxy::with_context(
        config("citypulse-v1", true),
        Arc::new(site.clone()),
        context.clone(),
    )
    .unwrap();
    v1.install().await.unwrap();

    let (tx, mut page) = mpsc::unbounded_channel();
    let mut client = Client::window(Url::parse(ORIGIN).unwrap(), Some(tx));
    client.controller = Some("citypulse-v1".to_string());
    context.clients.write().await.add(client);

    site.serve("/", "<root v2>");
    site.serve("/index.html", "<shell v2>");
    let (v2, mut v2_events) = OfflineCacheProxy::with_context(
        config("citypulse-v2", false),
        Arc::new(site.clone()),
        context.clone(),
    )
    .unwrap();

    let report = v2.install().await.unwrap();
    assert!(report.activation.is_none());
    assert_eq!(v2.state().await, Some(ServiceWorkerState::Installed));

    // v1 keeps serving until the page opts in.
    assert!(v1.is_controlling().await);
    assert!(matches!(v2.handle(get("/")).await, Effect::Passthrough));
    assert_eq!(
        context.caches.read().await.keys(),
        vec!["citypulse-v1", "citypulse-v2"]
    );

    let effect = v2
        .handle(InboundEvent::Message {
            data: json!({"type": "SKIP_WAITING"}),
            reply: None,
        })
        .await;
    let Effect::Activated(activation) = effect else {
        panic!("expected activation");
    };
    assert_eq!(activation.evicted, vec!["citypulse-v1"]);
    assert_eq!(activation.clients_notified, 1);

    assert_eq!(context.caches.read().await.keys(), vec!["citypulse-v2"]);
    assert!(!v1.is_controlling().await);
    assert!(matches!(v1.handle(get("/")).await, Effect::Passthrough));
    assert_eq!(
        page.try_recv().unwrap(),
        OutboundMessage::SwActivated {
            version: "citypulse-v2".to_string()
        }
    );

    site.set_offline(true);
    let Effect::Respond(response) = v2.handle(get("/deals/3")).await else {
        panic!("expected a response");
    };
    assert_eq!(&response.body[..], b"<shell v2>");

    let mut retired = false;
    while let Ok(event) = v2_events.try_recv() {
        if let ProxyEvent::StateChange {
            version,
            new_state: ServiceWorkerState::Redundant,
            ..
        } = event
        {
            assert_eq!(version, "citypulse-v1");
            retired = true;
        }
    }
    assert!(retired);
}

#[tokio::test]
async fn test_check_version_reports_running_version() {
    let site = Site::new();
    let (proxy, _events) =
        OfflineCacheProxy::new(config("citypulse-v1.2.0", true), Arc::new(site)).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let effect = proxy
        .handle(InboundEvent::Message {
            data: json!({"type": "CHECK_VERSION"}),
            reply: Some(tx),
        })
        .await;

    assert!(matches!(effect, Effect::Replied));
    let reply = serde_json::to_value(rx.try_recv().unwrap()).unwrap();
    assert_eq!(reply, json!({"type": "VERSION_INFO", "version": "citypulse-v1.2.0"}));
}
