//! Scripted network for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};

use citypulse_net::{Fetcher, NetError, Request, Response};

use crate::cache::CacheEntry;

pub const ORIGIN: &str = "https://citypulse.example";

#[derive(Debug, Clone)]
enum Script {
    Respond(u16, &'static str),
    /// Respond once the gate is opened.
    Gated(Arc<Notify>, u16, &'static str),
    Fail,
    Hang,
}

/// Answers by exact URL; unknown URLs fail as if offline.
#[derive(Clone, Default)]
pub struct ScriptedFetcher {
    scripts: Arc<Mutex<HashMap<String, Script>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, status: u16, body: &'static str) {
        self.set(url, Script::Respond(status, body));
    }

    /// Hold the response until the returned gate is notified.
    pub fn gate(&self, url: &str, status: u16, body: &'static str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.set(url, Script::Gated(gate.clone(), status, body));
        gate
    }

    pub fn fail(&self, url: &str) {
        self.set(url, Script::Fail);
    }

    pub fn hang(&self, url: &str) {
        self.set(url, Script::Hang);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn set(&self, url: &str, script: Script) {
        self.scripts.lock().unwrap().insert(url.to_string(), script);
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: Request) -> Result<Response, NetError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(request.url.as_str())
            .cloned()
            .unwrap_or(Script::Fail);

        match script {
            Script::Respond(status, body) => Ok(respond(request, status, body)),
            Script::Gated(gate, status, body) => {
                gate.notified().await;
                Ok(respond(request, status, body))
            }
            Script::Fail => Err(NetError::RequestFailed("offline".to_string())),
            Script::Hang => std::future::pending().await,
        }
    }
}

fn respond(request: Request, status: u16, body: &'static str) -> Response {
    Response {
        request_id: request.id,
        url: request.url,
        status: StatusCode::from_u16(status).unwrap(),
        headers: HeaderMap::new(),
        body: Bytes::from_static(body.as_bytes()),
    }
}

pub fn cached(url: &str, body: &str) -> CacheEntry {
    CacheEntry {
        url: url.to_string(),
        method: "GET".to_string(),
        status: 200,
        headers: Default::default(),
        body: body.as_bytes().to_vec(),
        cached_at: 0,
    }
}
