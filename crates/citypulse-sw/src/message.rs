//! Message protocol between the app and the proxy.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Channel a reply (or broadcast) is delivered on.
pub type ReplyPort = mpsc::UnboundedSender<OutboundMessage>;

/// Messages the app may send to the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundMessage {
    /// Activate a waiting proxy right away.
    SkipWaiting,
    /// Ask for the running version; answered with `VERSION_INFO`.
    CheckVersion,
    /// Anything else. Ignored.
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    /// Parse a message, mapping anything unrecognizable to `Unknown`.
    pub fn parse(value: &serde_json::Value) -> Self {
        Self::deserialize(value).unwrap_or(Self::Unknown)
    }
}

/// Messages the proxy sends to the app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundMessage {
    /// Broadcast to every controlled client after activation.
    SwActivated { version: String },
    /// Reply to `CHECK_VERSION`.
    VersionInfo { version: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_known_messages() {
        assert_eq!(
            InboundMessage::parse(&json!({"type": "SKIP_WAITING"})),
            InboundMessage::SkipWaiting
        );
        assert_eq!(
            InboundMessage::parse(&json!({"type": "CHECK_VERSION", "extra": 1})),
            InboundMessage::CheckVersion
        );
    }

    #[test]
    fn test_parse_unknown_and_malformed() {
        assert_eq!(
            InboundMessage::parse(&json!({"type": "CLEAR_CACHE"})),
            InboundMessage::Unknown
        );
        assert_eq!(InboundMessage::parse(&json!({"kind": "x"})), InboundMessage::Unknown);
        assert_eq!(InboundMessage::parse(&json!("SKIP_WAITING")), InboundMessage::Unknown);
    }

    #[test]
    fn test_outbound_wire_format() {
        let activated = OutboundMessage::SwActivated {
            version: "citypulse-v1.0.0".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&activated).unwrap(),
            json!({"type": "SW_ACTIVATED", "version": "citypulse-v1.0.0"})
        );

        let info = OutboundMessage::VersionInfo {
            version: "citypulse-v1.0.0".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&info).unwrap(),
            json!({"type": "VERSION_INFO", "version": "citypulse-v1.0.0"})
        );
    }
}
