//! In-memory connector for session tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::channel::mpsc as fmpsc;
use futures::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use super::connector::{Connection, Connector};

/// Server side of one accepted connection
pub struct MockServer {
    pub url: String,
    inbound: fmpsc::UnboundedSender<Result<Message, WsError>>,
    outbound: fmpsc::UnboundedReceiver<Message>,
}

impl MockServer {
    pub fn send(&self, frame: Value) {
        let _ = self.inbound.unbounded_send(Ok(Message::Text(frame.to_string().into())));
    }

    pub fn send_raw(&self, message: Message) {
        let _ = self.inbound.unbounded_send(Ok(message));
    }

    /// End the inbound stream without a close frame
    pub fn drop_connection(&self) {
        self.inbound.close_channel();
    }

    /// Next message the session wrote, `None` once the session dropped the sink
    pub async fn next_outbound(&mut self) -> Option<Message> {
        self.outbound.next().await
    }
}

#[derive(Clone)]
pub struct MockConnector {
    accepted: mpsc::UnboundedSender<MockServer>,
    attempts: Arc<Mutex<Vec<(String, Instant)>>>,
    refuse: Arc<AtomicBool>,
    stall: Arc<Mutex<Option<String>>>,
}

impl MockConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockServer>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let connector = Self {
            accepted,
            attempts: Arc::new(Mutex::new(Vec::new())),
            refuse: Arc::new(AtomicBool::new(false)),
            stall: Arc::new(Mutex::new(None)),
        };
        (connector, rx)
    }

    /// Every connect call so far, accepted or not
    pub fn attempts(&self) -> Vec<(String, Instant)> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Connects to `url` never complete
    pub fn stall_connections_to(&self, url: &str) {
        *self.stall.lock().unwrap() = Some(url.to_string());
    }
}

impl Connector for MockConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Connection, WsError>> {
        self.attempts.lock().unwrap().push((url.to_string(), Instant::now()));

        if self.refuse.load(Ordering::SeqCst) {
            return Box::pin(async { Err(WsError::ConnectionClosed) });
        }
        if self.stall.lock().unwrap().as_deref() == Some(url) {
            return Box::pin(futures::future::pending());
        }

        let (inbound_tx, inbound_rx) = fmpsc::unbounded();
        let (outbound_tx, outbound_rx) = fmpsc::unbounded();
        let server = MockServer { url: url.to_string(), inbound: inbound_tx, outbound: outbound_rx };
        let _ = self.accepted.send(server);

        let sink = outbound_tx.sink_map_err(|_| WsError::ConnectionClosed);
        let connection = Connection::from_parts(Box::pin(sink), inbound_rx.boxed());
        Box::pin(async move { Ok(connection) })
    }
}

// ----------------------------------------------------------------------------
// Frame fixtures
// ----------------------------------------------------------------------------

pub fn welcome(message_id: &str, session_id: &str, keepalive: u64) -> Value {
    json!({
        "metadata": {
            "message_id": message_id,
            "message_type": "session_welcome",
            "message_timestamp": "2023-07-19T14:56:51.634234626Z"
        },
        "payload": {
            "session": {
                "id": session_id,
                "status": "connected",
                "connected_at": "2023-07-19T14:56:51.616329898Z",
                "keepalive_timeout_seconds": keepalive,
                "reconnect_url": null,
                "recovery_url": null
            }
        }
    })
}

pub fn keepalive(message_id: &str) -> Value {
    json!({
        "metadata": {"message_id": message_id, "message_type": "session_keepalive"},
        "payload": {}
    })
}

pub fn notification(message_id: &str, subscription_type: &str, version: &str) -> Value {
    json!({
        "metadata": {
            "message_id": message_id,
            "message_type": "notification",
            "subscription_type": subscription_type,
            "subscription_version": version
        },
        "payload": {
            "subscription": {
                "id": "f1c2a387-161a-49f9-a165-0f21d7a4e1c4",
                "status": "enabled",
                "type": subscription_type,
                "version": version,
                "cost": 0,
                "condition": {"broadcaster_user_id": "1337"},
                "transport": {"method": "websocket", "session_id": "s-1"},
                "created_at": "2023-07-19T14:56:51.634234626Z"
            },
            "event": {"broadcaster_user_id": "1337", "broadcaster_user_login": "cool_user"}
        }
    })
}

pub fn reconnect(message_id: &str, session_id: &str, reconnect_url: &str) -> Value {
    json!({
        "metadata": {"message_id": message_id, "message_type": "session_reconnect"},
        "payload": {
            "session": {
                "id": session_id,
                "status": "reconnecting",
                "connected_at": "2023-07-19T14:56:51.616329898Z",
                "keepalive_timeout_seconds": null,
                "reconnect_url": reconnect_url,
                "recovery_url": null
            }
        }
    })
}

pub fn revocation(message_id: &str, subscription_type: &str) -> Value {
    json!({
        "metadata": {
            "message_id": message_id,
            "message_type": "revocation",
            "subscription_type": subscription_type,
            "subscription_version": "1"
        },
        "payload": {
            "subscription": {
                "id": "f1c2a387-161a-49f9-a165-0f21d7a4e1c4",
                "status": "authorization_revoked",
                "type": subscription_type,
                "version": "1",
                "cost": 0,
                "condition": {"broadcaster_user_id": "1337"},
                "transport": {"method": "websocket", "session_id": "s-1"},
                "created_at": "2023-07-19T14:56:51.634234626Z"
            }
        }
    })
}
