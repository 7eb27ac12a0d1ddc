//! Clients API: pages the proxy controls.

use hashbrown::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

use crate::message::{OutboundMessage, ReplyPort};
use crate::{Result, ServiceWorkerError};

/// A client (controlled page).
#[derive(Debug, Clone)]
pub struct Client {
    pub id: String,

    pub url: Url,

    pub client_type: ClientType,

    /// Whether focused.
    pub focused: bool,

    /// Version tag of the controlling proxy, if any.
    pub controller: Option<String>,

    /// Channel to the page; `None` for clients that cannot receive messages.
    pub port: Option<ReplyPort>,
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

impl Client {
    /// A window client with no controller.
    pub fn window(url: Url, port: Option<ReplyPort>) -> Self {
        Self {
            id: format!("client-{}", next_client_id()),
            url,
            client_type: ClientType::Window,
            focused: false,
            controller: None,
            port,
        }
    }

    /// Post message to client.
    pub fn post_message(&self, message: OutboundMessage) -> Result<()> {
        let port = self.port.as_ref().ok_or_else(|| {
            ServiceWorkerError::ClientError(format!("{} has no message port", self.id))
        })?;
        port.send(message)
            .map_err(|_| ServiceWorkerError::ClientError(format!("{} is gone", self.id)))
    }
}

// ==================== Clients ====================

/// Clients API.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

/// Options for `Clients::match_all`.
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

impl Clients {
    /// Create new clients manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Clients matching `options`, ordered by ID.
    pub fn match_all(&self, options: &ClientMatchOptions) -> Vec<&Client> {
        let mut matched: Vec<&Client> = self
            .clients
            .values()
            .filter(|c| options.include_uncontrolled || c.controller.is_some())
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        matched
    }

    /// Open a new focused window controlled by `controller`.
    pub fn open_window(&mut self, url: Url, controller: Option<&str>) -> Client {
        for client in self.clients.values_mut() {
            client.focused = false;
        }

        let mut client = Client::window(url, None);
        client.focused = true;
        client.controller = controller.map(str::to_string);

        self.clients.insert(client.id.clone(), client.clone());
        client
    }

    /// Focus a window client.
    pub fn focus(&mut self, id: &str) -> Result<()> {
        match self.clients.get(id) {
            Some(c) if c.client_type == ClientType::Window => {}
            Some(_) => {
                return Err(ServiceWorkerError::ClientError(
                    "Can only focus window clients".to_string(),
                ))
            }
            None => return Err(ServiceWorkerError::NotFound(id.to_string())),
        }

        for client in self.clients.values_mut() {
            client.focused = client.id == id;
        }
        Ok(())
    }

    /// Make `controller` the controller of every client on the scope's
    /// origin. Returns how many changed.
    pub fn claim(&mut self, controller: &str, scope: &Url) -> usize {
        let mut claimed = 0;
        for client in self.clients.values_mut() {
            if client.url.origin() != scope.origin() {
                continue;
            }
            if client.controller.as_deref() != Some(controller) {
                client.controller = Some(controller.to_string());
                claimed += 1;
            }
        }
        claimed
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

fn next_client_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}
