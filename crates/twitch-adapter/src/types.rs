//! Protocol types for the Twitch EventSub WebSocket and Helix REST APIs
//!
//! # Design Principles
//! 1. Unknown fields are preserved through `#[serde(flatten)] extra`
//! 2. Event bodies stay as `Value`; callers pick a typed shape when they need one
//! 3. Field names match the official documentation exactly
//!
//! # Sources
//! - WebSocket messages: https://dev.twitch.tv/docs/eventsub/websocket-reference
//! - Subscription object: https://dev.twitch.tv/docs/api/reference/#create-eventsub-subscription
//! - Helix reference: https://dev.twitch.tv/docs/api/reference

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::eventsub::classify::{self, MessageKind};

// ============================================================================
// EventSub WebSocket Frames (Inbound)
// ============================================================================

/// Metadata envelope carried by every EventSub frame
/// Source: https://dev.twitch.tv/docs/eventsub/websocket-reference
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Unique message id; a redelivered frame repeats it
    pub message_id: String,
    /// session_welcome, session_keepalive, notification, session_reconnect, revocation
    pub message_type: String,
    /// UTC timestamp the message was sent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_timestamp: Option<String>,
    /// Notification/revocation only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_type: Option<String>,
    /// Notification/revocation only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_version: Option<String>,
}

/// Decoded inbound frame; the payload shape depends on `metadata.message_type`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Frame {
    pub metadata: FrameMetadata,
    #[serde(default)]
    pub payload: Value,
}

impl Frame {
    /// Decode a text frame
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Lifecycle category, `None` for a message type this client does not know
    pub fn kind(&self) -> Option<MessageKind> {
        MessageKind::from_message_type(&self.metadata.message_type)
    }

    pub fn message_id(&self) -> &str {
        &self.metadata.message_id
    }

    /// `payload.session` of a welcome or reconnect frame
    pub fn session(&self) -> Result<SessionInfo, serde_json::Error> {
        self.payload_field("session")
    }

    /// `payload.subscription` of a notification or revocation frame
    pub fn subscription(&self) -> Result<SubscriptionInfo, serde_json::Error> {
        self.payload_field("subscription")
    }

    /// `payload.event` of a notification frame
    pub fn event(&self) -> Value {
        self.payload.get("event").cloned().unwrap_or(Value::Null)
    }

    fn payload_field<T: DeserializeOwned>(&self, field: &str) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.get(field).cloned().unwrap_or(Value::Null))
    }
}

/// Session object from welcome and reconnect payloads
/// Source: https://dev.twitch.tv/docs/eventsub/websocket-reference/#welcome-message
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionInfo {
    /// Session id used in the websocket transport of subscription requests
    pub id: String,
    /// connected, reconnecting
    pub status: String,
    /// UTC timestamp of the session's original connection
    pub connected_at: String,
    /// Null in reconnect payloads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keepalive_timeout_seconds: Option<u64>,
    /// Only set in reconnect payloads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_url: Option<String>,
    /// Extra fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Subscription object, as found in notification/revocation payloads and
/// in Helix EventSub responses
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionInfo {
    pub id: String,
    /// enabled, authorization_revoked, user_removed, version_removed, ...
    pub status: String,
    #[serde(rename = "type")]
    pub subscription_type: String,
    pub version: String,
    #[serde(default)]
    pub cost: u64,
    #[serde(default)]
    pub condition: Map<String, Value>,
    pub transport: Transport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Extra fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ============================================================================
// Subscription Descriptors (Outbound, Helix POST /eventsub/subscriptions)
// ============================================================================

/// Transport binding of a subscription
/// Source: https://dev.twitch.tv/docs/api/reference/#create-eventsub-subscription
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum Transport {
    /// HTTP callback delivery (the secret is write-only, absent in responses)
    Webhook {
        callback: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret: Option<String>,
    },
    /// Delivery over an EventSub WebSocket session
    Websocket {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        connected_at: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        disconnected_at: Option<String>,
    },
    /// Fan-out delivery through a conduit's shards
    Conduit { conduit_id: String },
    /// Method this client does not know yet
    #[serde(other)]
    Unknown,
}

impl Transport {
    pub fn websocket(session_id: impl Into<String>) -> Self {
        Transport::Websocket { session_id: session_id.into(), connected_at: None, disconnected_at: None }
    }

    pub fn webhook(callback: impl Into<String>, secret: impl Into<String>) -> Self {
        Transport::Webhook { callback: callback.into(), secret: Some(secret.into()) }
    }

    pub fn conduit(conduit_id: impl Into<String>) -> Self {
        Transport::Conduit { conduit_id: conduit_id.into() }
    }

    /// Session id when this is a websocket binding
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Transport::Websocket { session_id, .. } => Some(session_id),
            _ => None,
        }
    }
}

/// "What to subscribe to": body of a subscription registration request
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionDescriptor {
    #[serde(rename = "type")]
    pub subscription_type: String,
    pub version: String,
    pub condition: Map<String, Value>,
    pub transport: Transport,
}

// ============================================================================
// Helix Envelopes and Resources
// Source: https://dev.twitch.tv/docs/api/reference
// ============================================================================

/// Standard Helix response wrapper: `{ data: [...], pagination?, total? }`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataEnvelope<T> {
    pub data: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    /// e.g. total_cost / max_total_cost on EventSub responses
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Cursor for the next page, absent on the last page
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pagination {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// A list result with its paging cursor
#[derive(Clone, Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub cursor: Option<String>,
    pub total: Option<u64>,
}

/// Error body returned by Helix and the OAuth service
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
}

/// GET https://id.twitch.tv/oauth2/validate
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TokenValidation {
    pub client_id: String,
    /// Absent for app access tokens
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub expires_in: u64,
}

/// GET /users
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub login: String,
    pub display_name: String,
    #[serde(rename = "type", default)]
    pub user_type: String,
    #[serde(default)]
    pub broadcaster_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub profile_image_url: String,
    #[serde(default)]
    pub created_at: Option<String>,
    /// Extra fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// GET /streams
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Stream {
    pub id: String,
    pub user_id: String,
    pub user_login: String,
    pub user_name: String,
    #[serde(default)]
    pub game_id: String,
    #[serde(default)]
    pub game_name: String,
    #[serde(rename = "type", default)]
    pub stream_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub viewer_count: u64,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Extra fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// GET /channels
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelInformation {
    pub broadcaster_id: String,
    pub broadcaster_login: String,
    pub broadcaster_name: String,
    #[serde(default)]
    pub broadcaster_language: String,
    #[serde(default)]
    pub game_id: String,
    #[serde(default)]
    pub game_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub delay: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Extra fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// POST /chat/messages
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessageSent {
    pub message_id: String,
    pub is_sent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drop_reason: Option<Value>,
}

// ============================================================================
// Statistics Tracking
// ============================================================================

/// Per-type frame counts for a session
#[derive(Clone, Debug, Default)]
pub struct MessageStats {
    pub total_messages: u64,
    pub parsed_ok: u64,
    pub parse_error_count: u64,
    /// Notifications whose (type, version) is not in the known table
    pub unknown_type_count: u64,
    pub type_counts: HashMap<String, u64>,
    pub last_message_type: Option<String>,
}

impl MessageStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a frame under its message type, or its subscription type for
    /// notifications
    pub fn record(&mut self, frame: &Frame) {
        self.total_messages += 1;
        self.parsed_ok += 1;

        let label = match frame.kind() {
            Some(MessageKind::Notification) => {
                if classify::notification_type(frame).is_none() {
                    self.unknown_type_count += 1;
                }
                frame
                    .metadata
                    .subscription_type
                    .clone()
                    .unwrap_or_else(|| "_no_type".to_string())
            }
            _ => frame.metadata.message_type.clone(),
        };

        *self.type_counts.entry(label.clone()).or_insert(0) += 1;
        self.last_message_type = Some(label);
    }

    pub fn record_parse_error(&mut self) {
        self.total_messages += 1;
        self.parse_error_count += 1;
    }
}
