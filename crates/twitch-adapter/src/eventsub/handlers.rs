//! Lifecycle callbacks for an EventSub session
//!
//! Every hook is optional and async. For each frame the session awaits
//! [`on_message`](SessionHandlers::on_message) before the hook for the
//! frame's category, and never runs two hooks concurrently.
//!
//! ```rust,no_run
//! use twitch_adapter::eventsub::SessionHandlers;
//!
//! let handlers = SessionHandlers::new()
//!     .on_welcome(|welcome| async move {
//!         if !welcome.is_reconnect {
//!             println!("new session {}", welcome.session.id);
//!         }
//!     })
//!     .on_close(|close| async move {
//!         println!("closed: {}", close);
//!     });
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::classify::SubscriptionType;
use crate::types::{Frame, FrameMetadata, SessionInfo, SubscriptionInfo, Transport};

/// Synthetic close for a missing welcome or a missed keepalive
pub const CLOSE_CODE_TIMEOUT: u16 = 4005;
pub const CLOSE_REASON_TIMEOUT: &str = "No message received in time";

/// Caller-initiated close
pub const CLOSE_CODE_CLIENT: u16 = 1000;
pub const CLOSE_REASON_CLIENT: &str = "Session closed by client";

/// Transport lost without a close frame, or connect failed
pub const CLOSE_CODE_ABNORMAL: u16 = 1006;

/// Passed to `on_welcome`
#[derive(Debug, Clone)]
pub struct WelcomeEvent {
    pub session: SessionInfo,
    /// True when this welcome completes a server-requested reconnect. The
    /// session keeps its subscriptions; do not register them again.
    pub is_reconnect: bool,
}

impl WelcomeEvent {
    /// Websocket transport binding for subscription requests
    pub fn transport(&self) -> Transport {
        Transport::websocket(self.session.id.clone())
    }
}

/// Passed to `on_notification`
#[derive(Debug, Clone)]
pub struct Notification {
    pub metadata: FrameMetadata,
    pub subscription: SubscriptionInfo,
    pub event: Value,
    /// `None` when the (type, version) pair is not in the known table
    pub kind: Option<SubscriptionType>,
}

impl Notification {
    /// Decode the event body into a caller-chosen shape
    pub fn event_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.event.clone())
    }
}

/// Passed to `on_close`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub code: u16,
    pub reason: String,
}

impl CloseEvent {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self { code, reason: reason.into() }
    }

    pub fn timeout() -> Self {
        Self::new(CLOSE_CODE_TIMEOUT, CLOSE_REASON_TIMEOUT)
    }

    pub fn client() -> Self {
        Self::new(CLOSE_CODE_CLIENT, CLOSE_REASON_CLIENT)
    }

    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_CODE_ABNORMAL, reason)
    }

    /// Fabricated locally rather than received from the server
    pub fn is_timeout(&self) -> bool {
        self.code == CLOSE_CODE_TIMEOUT && self.reason == CLOSE_REASON_TIMEOUT
    }
}

impl fmt::Display for CloseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.reason, self.code)
    }
}

type Handler<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

fn boxed<T, F, Fut>(f: F) -> Handler<T>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |arg| Box::pin(f(arg)))
}

/// Session lifecycle hooks
#[derive(Clone, Default)]
pub struct SessionHandlers {
    /// Every decoded, non-duplicate frame, before the specific hook
    on_message: Option<Handler<Frame>>,
    on_welcome: Option<Handler<WelcomeEvent>>,
    on_keepalive: Option<Handler<Frame>>,
    on_notification: Option<Handler<Notification>>,
    /// New session descriptor from a reconnect request
    on_reconnect: Option<Handler<SessionInfo>>,
    on_revocation: Option<Handler<SubscriptionInfo>>,
    on_close: Option<Handler<CloseEvent>>,
}

impl fmt::Debug for SessionHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandlers")
            .field("on_message", &self.on_message.is_some())
            .field("on_welcome", &self.on_welcome.is_some())
            .field("on_keepalive", &self.on_keepalive.is_some())
            .field("on_notification", &self.on_notification.is_some())
            .field("on_reconnect", &self.on_reconnect.is_some())
            .field("on_revocation", &self.on_revocation.is_some())
            .field("on_close", &self.on_close.is_some())
            .finish()
    }
}

impl SessionHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_message<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Frame) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_message = Some(boxed(f));
        self
    }

    /// Register subscriptions here when `is_reconnect` is false
    pub fn on_welcome<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(WelcomeEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_welcome = Some(boxed(f));
        self
    }

    pub fn on_keepalive<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Frame) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_keepalive = Some(boxed(f));
        self
    }

    pub fn on_notification<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Notification) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_notification = Some(boxed(f));
        self
    }

    pub fn on_reconnect<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(SessionInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_reconnect = Some(boxed(f));
        self
    }

    pub fn on_revocation<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(SubscriptionInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_revocation = Some(boxed(f));
        self
    }

    /// Fires once per lost connection and once for the final close
    pub fn on_close<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(CloseEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_close = Some(boxed(f));
        self
    }

    // ---------------------------------------------------------------
    // Dispatch
    // ---------------------------------------------------------------

    pub(crate) async fn emit_message(&self, frame: Frame) {
        if let Some(cb) = &self.on_message {
            cb(frame).await;
        }
    }

    pub(crate) async fn emit_welcome(&self, event: WelcomeEvent) {
        if let Some(cb) = &self.on_welcome {
            cb(event).await;
        }
    }

    pub(crate) async fn emit_keepalive(&self, frame: Frame) {
        if let Some(cb) = &self.on_keepalive {
            cb(frame).await;
        }
    }

    pub(crate) async fn emit_notification(&self, notification: Notification) {
        if let Some(cb) = &self.on_notification {
            cb(notification).await;
        }
    }

    pub(crate) async fn emit_reconnect(&self, session: SessionInfo) {
        if let Some(cb) = &self.on_reconnect {
            cb(session).await;
        }
    }

    pub(crate) async fn emit_revocation(&self, subscription: SubscriptionInfo) {
        if let Some(cb) = &self.on_revocation {
            cb(subscription).await;
        }
    }

    pub(crate) async fn emit_close(&self, event: CloseEvent) {
        if let Some(cb) = &self.on_close {
            cb(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_debug_shows_registered_hooks() {
        let handlers = SessionHandlers::new().on_close(|_| async {});
        let text = format!("{:?}", handlers);
        assert!(text.contains("on_close: true"));
        assert!(text.contains("on_welcome: false"));
    }

    #[tokio::test]
    async fn test_emit_awaits_callback() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let handlers = SessionHandlers::new().on_close(move |event| {
            let seen = seen.clone();
            async move {
                assert_eq!(event.code, CLOSE_CODE_CLIENT);
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        handlers.emit_close(CloseEvent::client()).await;
        handlers.emit_welcome(WelcomeEvent {
            session: serde_json::from_value(serde_json::json!({
                "id": "s", "status": "connected", "connected_at": "2023-07-19T14:56:51Z"
            }))
            .unwrap(),
            is_reconnect: false,
        })
        .await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_event_kinds() {
        assert!(CloseEvent::timeout().is_timeout());
        assert!(!CloseEvent::client().is_timeout());
        assert_eq!(CloseEvent::abnormal("reset").code, 1006);
        assert_eq!(CloseEvent::client().to_string(), "Session closed by client (code: 1000)");
    }
}
