//! EventSub WebSocket side
//!
//! - [`classify`]: frame categories and the known subscription types
//! - [`subscription`]: descriptor builders for subscription registration
//! - [`handlers`]: caller callbacks
//! - [`connector`]: physical connection seam
//! - [`session`]: the session state machine and its handle

pub mod classify;
pub mod connector;
pub mod handlers;
pub mod session;
pub mod subscription;

#[cfg(test)]
mod mock;

pub use classify::{MessageKind, SubscriptionType};
pub use connector::{Connection, Connector, TungsteniteConnector};
pub use handlers::{CloseEvent, Notification, SessionHandlers, WelcomeEvent};
pub use session::{EventSubSession, SessionConfig, SessionHandle, SessionState, SessionStatus};
pub use subscription::Condition;
