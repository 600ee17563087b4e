//! Twitch API Adapter
//!
//! Two halves:
//! - `helix`: timed request executor + REST client for the Helix API
//! - `eventsub`: persistent EventSub WebSocket session with keepalive
//!   watchdog and transparent reconnect handoff
//!
//! # Official Documentation
//! - Helix Reference: https://dev.twitch.tv/docs/api/reference
//! - EventSub WebSockets: https://dev.twitch.tv/docs/eventsub/handling-websocket-events
//! - Subscription Types: https://dev.twitch.tv/docs/eventsub/eventsub-subscription-types
//! - Authentication: https://dev.twitch.tv/docs/authentication

pub mod error;
pub mod eventsub;
pub mod helix;
pub mod types;

pub use error::{HelixError, RequestError};
pub use types::*;

/// Helix REST API base URL
/// Source: https://dev.twitch.tv/docs/api/reference
pub const HELIX_API_BASE: &str = "https://api.twitch.tv/helix";

/// OAuth2 identity service base URL (authorize, validate)
/// Source: https://dev.twitch.tv/docs/authentication
pub const OAUTH_BASE: &str = "https://id.twitch.tv/oauth2";

/// EventSub WebSocket endpoint for fresh sessions
/// Source: https://dev.twitch.tv/docs/eventsub/handling-websocket-events
/// Note: reconnects go to the `reconnect_url` handed out by the server instead
pub const EVENTSUB_WSS_ENDPOINT: &str = "wss://eventsub.wss.twitch.tv/ws";
