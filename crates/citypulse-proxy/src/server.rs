//! HTTP front end for the offline cache proxy.
//!
//! Page traffic is routed through [`OfflineCacheProxy::handle`]; requests the
//! proxy does not intercept are forwarded to the origin unchanged. A small
//! control surface under `/__citypulse/` delivers messages, pushes and
//! notification clicks.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Json, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use citypulse_net::{Fetcher, Request};
use citypulse_sw::{
    ClickOutcome, Effect, FetchResponse, InboundEvent, Notification, NotificationClickEvent,
    OfflineCacheProxy, ProxyEvent, ResponseSource,
};

/// Response header naming where a proxied response came from.
pub const SOURCE_HEADER: &str = "x-citypulse-source";

/// Request headers that belong to the client connection, not the origin.
const HOP_BY_HOP: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailer",
    "content-length",
];

#[derive(Clone)]
pub struct AppState {
    proxy: Arc<OfflineCacheProxy>,
    upstream: Arc<dyn Fetcher>,
}

impl AppState {
    pub fn new(proxy: OfflineCacheProxy, upstream: Arc<dyn Fetcher>) -> Self {
        Self {
            proxy: Arc::new(proxy),
            upstream,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/__citypulse/health", get(health))
        .route("/__citypulse/message", post(message))
        .route("/__citypulse/push", post(push))
        .route("/__citypulse/notificationclick", post(notification_click))
        .fallback(forward)
        // Uploads pass through to the origin whatever their size.
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

/// Log proxy events until the proxy is dropped.
pub async fn log_events(mut events: mpsc::UnboundedReceiver<ProxyEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ProxyEvent::StateChange {
                version,
                worker_id,
                new_state,
            } => info!(version, ?worker_id, ?new_state, "Worker state changed"),
            ProxyEvent::StoresEvicted { names } => info!(?names, "Stores evicted"),
            ProxyEvent::NotificationShown { id } => debug!(id, "Notification shown"),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: String,
    controlling: bool,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: state.proxy.version().to_string(),
        controlling: state.proxy.is_controlling().await,
    })
}

async fn message(State(state): State<AppState>, Json(data): Json<Value>) -> Response {
    let (reply, mut replies) = mpsc::unbounded_channel();
    let effect = state
        .proxy
        .handle(InboundEvent::Message {
            data,
            reply: Some(reply),
        })
        .await;

    match effect {
        Effect::Replied => match replies.try_recv() {
            Ok(message) => Json(message).into_response(),
            Err(_) => StatusCode::NO_CONTENT.into_response(),
        },
        Effect::Activated(report) => Json(report).into_response(),
        Effect::Failed(e) => error_response(StatusCode::CONFLICT, &e.to_string()),
        _ => (StatusCode::ACCEPTED, Json(json!({"status": "ignored"}))).into_response(),
    }
}

async fn push(State(state): State<AppState>, body: Bytes) -> Response {
    let data = (!body.is_empty()).then_some(body);
    match state.proxy.handle(InboundEvent::Push(data)).await {
        Effect::ShowNotification(notification) => Json(notification).into_response(),
        other => unexpected(other),
    }
}

#[derive(Deserialize)]
struct ClickRequest {
    notification: Notification,
    #[serde(default)]
    action: Option<String>,
}

async fn notification_click(
    State(state): State<AppState>,
    Json(click): Json<ClickRequest>,
) -> Response {
    let event = InboundEvent::NotificationClick(NotificationClickEvent {
        notification: click.notification,
        action: click.action,
    });

    match state.proxy.handle(event).await {
        Effect::NotificationHandled(ClickOutcome::Closed) => {
            Json(json!({"outcome": "closed"})).into_response()
        }
        Effect::NotificationHandled(ClickOutcome::Opened(client)) => {
            // No window exists behind the front end, so the record is dropped
            // once reported.
            state.proxy.context().clients.write().await.remove(&client.id);
            Json(json!({
                "outcome": "opened",
                "client": client.id,
                "url": client.url,
            }))
            .into_response()
        }
        Effect::NotificationHandled(ClickOutcome::Focused(id)) => {
            Json(json!({"outcome": "focused", "client": id})).into_response()
        }
        Effect::Failed(e) => error_response(StatusCode::BAD_REQUEST, &e.to_string()),
        other => unexpected(other),
    }
}

async fn forward(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut request = Request::new(method, request_url(&state, &uri));
    for (name, value) in headers.iter() {
        if !HOP_BY_HOP.contains(&name.as_str()) {
            request.headers.append(name.clone(), value.clone());
        }
    }
    if !body.is_empty() {
        request = request.body(body);
    }

    match state.proxy.handle(InboundEvent::Fetch(request.clone())).await {
        Effect::Respond(response) => into_http(response),
        Effect::Passthrough => passthrough(&state, request).await,
        other => unexpected(other),
    }
}

/// Place the request path and query on the origin. The path is taken
/// verbatim, so a target such as `//other-host/x` never leaves the origin.
fn request_url(state: &AppState, uri: &Uri) -> Url {
    let mut url = state.proxy.origin().clone();
    url.set_path(uri.path());
    url.set_query(uri.query());
    url
}

async fn passthrough(state: &AppState, request: Request) -> Response {
    let url = request.url.clone();
    match state.upstream.fetch(request).await {
        Ok(response) => into_http(FetchResponse::from_network(response)),
        Err(e) => {
            warn!(url = %url, error = %e, "Passthrough failed");
            error_response(StatusCode::BAD_GATEWAY, &e.to_string())
        }
    }
}

/// Convert a proxy response into an HTTP response. A network error becomes
/// `502 Bad Gateway`.
fn into_http(response: FetchResponse) -> Response {
    if response.source == ResponseSource::Error {
        return error_response(StatusCode::BAD_GATEWAY, "offline and not cached");
    }

    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut headers = response.headers;
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
    headers.insert(
        HeaderName::from_static(SOURCE_HEADER),
        HeaderValue::from_static(source_label(response.source)),
    );

    (status, headers, response.body).into_response()
}

fn source_label(source: ResponseSource) -> &'static str {
    match source {
        ResponseSource::Network => "network",
        ResponseSource::Cache => "cache",
        ResponseSource::AppShell => "app-shell",
        ResponseSource::Placeholder => "placeholder",
        ResponseSource::Error => "error",
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": message}))).into_response()
}

fn unexpected(effect: Effect) -> Response {
    warn!(?effect, "Unexpected proxy effect");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "unexpected proxy effect")
}
