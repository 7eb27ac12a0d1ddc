//! Push messages and notifications.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use citypulse_core::NotificationConfig;

use crate::clients::Client;

/// Decoded push payload. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
    pub url: Option<String>,
}

impl PushPayload {
    /// Decode a push body. Each field is read on its own: a missing or
    /// non-string field is `None`, and a body that is not a JSON object
    /// yields the empty payload.
    pub fn parse(data: Option<&[u8]>) -> Self {
        let Some(value) = data.and_then(|bytes| serde_json::from_slice::<Value>(bytes).ok())
        else {
            return Self::default();
        };
        let field = |name: &str| value.get(name).and_then(Value::as_str).map(str::to_string);

        Self {
            title: field("title"),
            body: field("body"),
            url: field("url"),
        }
    }
}

/// Button shown on a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationAction {
    View,
    Close,
}

impl NotificationAction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "view" => Some(Self::View),
            "close" => Some(Self::Close),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub action: NotificationAction,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    /// Page to open when the notification is clicked.
    pub url: String,
    /// When the push was received (ms since epoch).
    pub timestamp: u64,
}

/// Notification descriptor handed to the host for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
    pub actions: Vec<ActionDescriptor>,
}

impl Notification {
    /// Build the descriptor for a push body.
    pub fn from_push(data: Option<&[u8]>, config: &NotificationConfig, timestamp: u64) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);

        let payload = PushPayload::parse(data);
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            title: payload.title.unwrap_or_else(|| config.default_title.clone()),
            body: payload.body.unwrap_or_else(|| config.default_body.clone()),
            icon: config.icon.clone(),
            badge: config.badge.clone(),
            vibrate: config.vibrate.clone(),
            data: NotificationData {
                url: payload.url.unwrap_or_else(|| config.default_url.clone()),
                timestamp,
            },
            actions: vec![
                ActionDescriptor {
                    action: NotificationAction::View,
                    title: "View".to_string(),
                },
                ActionDescriptor {
                    action: NotificationAction::Close,
                    title: "Close".to_string(),
                },
            ],
        }
    }
}

/// A click on a displayed notification.
#[derive(Debug, Clone)]
pub struct NotificationClickEvent {
    pub notification: Notification,
    /// Name of the clicked action button; `None` for the notification body.
    pub action: Option<String>,
}

/// What a notification click resulted in.
#[derive(Debug, Clone)]
pub enum ClickOutcome {
    /// Closed with nothing else to do.
    Closed,
    /// A new window was opened.
    Opened(Client),
    /// An existing window already showing the URL was focused.
    Focused(String),
}

/// Notifications kept on screen before the oldest is dropped.
pub const DEFAULT_MAX_SHOWN: usize = 32;

/// Notifications currently on screen, oldest evicted past the limit.
#[derive(Debug)]
pub struct NotificationCenter {
    shown: HashMap<u64, Notification>,
    max_shown: usize,
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_SHOWN)
    }
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(max_shown: usize) -> Self {
        Self {
            shown: HashMap::new(),
            max_shown: max_shown.max(1),
        }
    }

    /// Show a notification. Returns the id of a notification evicted to
    /// stay within the limit.
    pub fn show(&mut self, notification: Notification) -> Option<u64> {
        self.shown.insert(notification.id, notification);
        if self.shown.len() <= self.max_shown {
            return None;
        }

        // Ids are allocated in increasing order.
        let oldest = self.shown.keys().min().copied()?;
        self.shown.remove(&oldest);
        debug!(id = oldest, "Dropped oldest notification");
        Some(oldest)
    }

    /// Close a notification. Returns whether it was on screen.
    pub fn close(&mut self, id: u64) -> bool {
        self.shown.remove(&id).is_some()
    }

    pub fn is_shown(&self, id: u64) -> bool {
        self.shown.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.shown.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shown.is_empty()
    }
}
