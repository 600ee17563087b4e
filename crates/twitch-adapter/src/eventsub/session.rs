//! EventSub WebSocket session
//!
//! One logical session over one or more physical connections. The session
//! runs as a single spawned task, so frames, timers and commands are handled
//! strictly one at a time. Callers hold a [`SessionHandle`].
//!
//! # Lifecycle
//! - `Connecting`: connection open, waiting up to 10s for `session_welcome`
//! - `Active`: welcome received; the keepalive watchdog is re-armed for
//!   `keepalive_timeout_seconds + 2s` after every frame
//! - `Reconnecting`: server sent `session_reconnect`; the new connection is
//!   open and the old one is no longer read. The next welcome closes the
//!   old connection and reports `is_reconnect = true`.
//! - `Closed`: caller closed the session, or the connection was lost with
//!   reconnection disabled
//!
//! A lost connection (network error, server close, missed welcome or
//! keepalive) fires `on_close` and, unless the reconnect delay is zero,
//! starts over from the default endpoint after the delay.
//!
//! # Source
//! - https://dev.twitch.tv/docs/eventsub/handling-websocket-events

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::classify::{self, MessageKind};
use super::connector::{Connection, Connector, TungsteniteConnector};
use super::handlers::{
    CloseEvent, Notification, SessionHandlers, WelcomeEvent, CLOSE_CODE_ABNORMAL, CLOSE_CODE_CLIENT,
    CLOSE_REASON_CLIENT,
};
use crate::helix::request::{build_url, Params};
use crate::types::{Frame, SessionInfo, Transport};
use crate::EVENTSUB_WSS_ENDPOINT;

/// Budget for the first frame on a fresh connection
pub const WELCOME_TIMEOUT: Duration = Duration::from_secs(10);

/// Added to the server's keepalive interval
pub const KEEPALIVE_GRACE: Duration = Duration::from_secs(2);

pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 500;

const COMMAND_CAPACITY: usize = 8;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    /// Set for the lifetime of a session task, hooks included
    static CURRENT_SESSION: u64;
}

/// Session configuration
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Endpoint for fresh connections; server reconnect URLs override it
    pub endpoint: String,
    /// Delay before starting over after a lost connection; 0 disables
    pub reconnect_delay_ms: u64,
    /// Requested keepalive interval (10-600), sent on fresh connections only
    pub keepalive_timeout_secs: Option<u32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: EVENTSUB_WSS_ENDPOINT.to_string(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            keepalive_timeout_secs: None,
        }
    }
}

impl SessionConfig {
    pub fn reconnect_delay(&self) -> Option<Duration> {
        (self.reconnect_delay_ms > 0).then(|| Duration::from_millis(self.reconnect_delay_ms))
    }

    /// Endpoint plus the keepalive request, if any
    pub fn connect_url(&self) -> String {
        let query = Params::new().with("keepalive_timeout_seconds", self.keepalive_timeout_secs);
        build_url(&self.endpoint, &query, &Params::new())
    }
}

/// Observable session state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Reconnecting,
    Closed,
}

/// Snapshot published after every transition
#[derive(Clone, Debug, PartialEq)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Set once a welcome (or reconnect request) carried one
    pub session_id: Option<String>,
    pub keepalive_timeout: Option<Duration>,
    /// `connected_at` of the first welcome; never reset
    pub first_connected_at: Option<DateTime<Utc>>,
}

impl SessionStatus {
    fn connecting() -> Self {
        Self { state: SessionState::Connecting, session_id: None, keepalive_timeout: None, first_connected_at: None }
    }
}

enum Command {
    Close { ack: oneshot::Sender<()> },
}

impl Command {
    fn into_ack(self) -> oneshot::Sender<()> {
        match self {
            Command::Close { ack } => ack,
        }
    }
}

/// Caller's handle on a running session. Dropping every clone closes the
/// session.
#[derive(Clone)]
pub struct SessionHandle {
    id: u64,
    cmd_tx: mpsc::Sender<Command>,
    status_rx: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    pub fn status(&self) -> SessionStatus {
        self.status_rx.borrow().clone()
    }

    pub fn session_id(&self) -> Option<String> {
        self.status_rx.borrow().session_id.clone()
    }

    /// Websocket transport binding for subscription requests
    pub fn transport(&self) -> Option<Transport> {
        self.session_id().map(Transport::websocket)
    }

    /// Close the session; resolves after `on_close` has returned.
    ///
    /// Called from one of this session's own hooks, the close is queued and
    /// this returns at once; it takes effect when the hook returns.
    pub async fn close(&self) {
        let (ack, done) = oneshot::channel();

        if self.in_own_task() {
            if let Err(mpsc::error::TrySendError::Full(_)) = self.cmd_tx.try_send(Command::Close { ack }) {
                debug!("Close already queued");
            }
            return;
        }

        if self.cmd_tx.send(Command::Close { ack }).await.is_err() {
            return;
        }
        let _ = done.await;
    }

    fn in_own_task(&self) -> bool {
        CURRENT_SESSION.try_with(|id| *id == self.id).unwrap_or(false)
    }

    /// Resolves once the session is closed for any reason
    pub async fn closed(&self) {
        let mut rx = self.status_rx.clone();
        let _ = rx.wait_for(|status| status.state == SessionState::Closed).await;
    }
}

/// EventSub session builder
pub struct EventSubSession<C: Connector = TungsteniteConnector> {
    config: SessionConfig,
    handlers: SessionHandlers,
    connector: Arc<C>,
}

impl EventSubSession<TungsteniteConnector> {
    pub fn new(config: SessionConfig, handlers: SessionHandlers) -> Self {
        Self::with_connector(config, handlers, TungsteniteConnector)
    }
}

impl<C: Connector> EventSubSession<C> {
    pub fn with_connector(config: SessionConfig, handlers: SessionHandlers, connector: C) -> Self {
        Self { config, handlers, connector: Arc::new(connector) }
    }

    /// Spawn the session task; must be called inside a tokio runtime
    pub fn start(self) -> SessionHandle {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (status_tx, status_rx) = watch::channel(SessionStatus::connecting());

        let actor = Actor {
            config: self.config,
            handlers: self.handlers,
            connector: self.connector,
            cmd_rx,
            status_tx,
            welcome_deadline: None,
            watchdog_deadline: None,
            keepalive: None,
            last_message_id: None,
            first_connected_at: None,
        };
        tokio::spawn(CURRENT_SESSION.scope(id, actor.run()));

        SessionHandle { id, cmd_tx, status_rx }
    }
}

// ============================================================================
// Session task
// ============================================================================

/// Connections owned by a live session
enum Phase {
    Connecting { conn: Connection },
    Active { conn: Connection, session: SessionInfo },
    Reconnecting { old: Connection, new: Connection, session: SessionInfo },
}

impl Phase {
    /// The connection frames are read from
    fn current(&mut self) -> &mut Connection {
        match self {
            Phase::Connecting { conn } | Phase::Active { conn, .. } => conn,
            Phase::Reconnecting { new, .. } => new,
        }
    }

    fn into_connections(self) -> Vec<Connection> {
        match self {
            Phase::Connecting { conn } | Phase::Active { conn, .. } => vec![conn],
            Phase::Reconnecting { old, new, .. } => vec![old, new],
        }
    }
}

enum Exit {
    /// Close requested; `ack` is `None` when every handle was dropped
    Client { ack: Option<oneshot::Sender<()>>, connections: Vec<Connection> },
    Dropped(CloseEvent),
}

enum Opened {
    Conn(Connection),
    Cancelled(Option<oneshot::Sender<()>>),
    Failed(CloseEvent),
}

enum Event {
    Command(Option<Command>),
    Inbound(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
    WelcomeTimeout,
    WatchdogExpired,
}

struct Actor<C: Connector> {
    config: SessionConfig,
    handlers: SessionHandlers,
    connector: Arc<C>,
    cmd_rx: mpsc::Receiver<Command>,
    status_tx: watch::Sender<SessionStatus>,
    welcome_deadline: Option<Instant>,
    watchdog_deadline: Option<Instant>,
    keepalive: Option<Duration>,
    last_message_id: Option<String>,
    first_connected_at: Option<DateTime<Utc>>,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Close connections; `None` drops them without a close frame
async fn close_connections(connections: Vec<Connection>, event: Option<&CloseEvent>) {
    for conn in connections {
        match event {
            Some(event) if event.code != CLOSE_CODE_ABNORMAL => conn.close(event.code, &event.reason).await,
            _ => drop(conn),
        }
    }
}

impl<C: Connector> Actor<C> {
    async fn run(mut self) {
        loop {
            self.keepalive = None;
            self.watchdog_deadline = None;
            self.welcome_deadline = Some(Instant::now() + WELCOME_TIMEOUT);
            self.publish(SessionState::Connecting, None);

            let url = self.config.connect_url();
            let exit = match self.open(&url).await {
                Opened::Conn(conn) => self.drive(Phase::Connecting { conn }).await,
                Opened::Cancelled(ack) => Exit::Client { ack, connections: Vec::new() },
                Opened::Failed(event) => Exit::Dropped(event),
            };

            match exit {
                Exit::Client { ack, connections } => {
                    self.shutdown(connections, ack).await;
                    return;
                }
                Exit::Dropped(event) => {
                    self.welcome_deadline = None;
                    self.watchdog_deadline = None;
                    warn!("EventSub connection lost: {}", event);
                    self.handlers.emit_close(event).await;

                    let Some(delay) = self.config.reconnect_delay() else {
                        info!("Reconnect disabled, session closed");
                        self.publish(SessionState::Closed, None);
                        return;
                    };

                    info!("Reconnecting in {:?}", delay);
                    tokio::select! {
                        cmd = self.cmd_rx.recv() => {
                            self.shutdown(Vec::new(), cmd.map(Command::into_ack)).await;
                            return;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Open a connection while still honoring commands and deadlines
    async fn open(&mut self, url: &str) -> Opened {
        debug!("Connecting to {}", url);
        let connect = self.connector.connect(url);

        tokio::select! {
            biased;
            cmd = self.cmd_rx.recv() => Opened::Cancelled(cmd.map(Command::into_ack)),
            result = connect => match result {
                Ok(conn) => Opened::Conn(conn),
                Err(e) => Opened::Failed(CloseEvent::abnormal(e.to_string())),
            },
            _ = sleep_until_opt(self.welcome_deadline) => Opened::Failed(CloseEvent::timeout()),
            _ = sleep_until_opt(self.watchdog_deadline) => Opened::Failed(CloseEvent::timeout()),
        }
    }

    /// Run one physical session until the caller closes it or it is lost
    async fn drive(&mut self, mut phase: Phase) -> Exit {
        loop {
            let event = {
                let conn = phase.current();
                tokio::select! {
                    biased;
                    cmd = self.cmd_rx.recv() => Event::Command(cmd),
                    msg = conn.stream.next() => Event::Inbound(msg),
                    _ = sleep_until_opt(self.welcome_deadline) => Event::WelcomeTimeout,
                    _ = sleep_until_opt(self.watchdog_deadline) => Event::WatchdogExpired,
                }
            };

            match event {
                Event::Command(cmd) => {
                    return Exit::Client {
                        ack: cmd.map(Command::into_ack),
                        connections: phase.into_connections(),
                    };
                }
                Event::WelcomeTimeout | Event::WatchdogExpired => {
                    let timeout = CloseEvent::timeout();
                    warn!("No message received in time, closing connection");
                    close_connections(phase.into_connections(), Some(&timeout)).await;
                    return Exit::Dropped(timeout);
                }
                Event::Inbound(Some(Ok(Message::Text(text)))) => {
                    match self.handle_text(phase, text.as_str()).await {
                        ControlFlow::Continue(next) => phase = next,
                        ControlFlow::Break(exit) => return exit,
                    }
                }
                Event::Inbound(Some(Ok(Message::Ping(data)))) => {
                    if let Err(e) = phase.current().sink.send(Message::Pong(data)).await {
                        warn!("Failed to send pong: {}", e);
                    }
                }
                Event::Inbound(Some(Ok(Message::Close(frame)))) => {
                    let event = match frame {
                        Some(frame) => CloseEvent::new(u16::from(frame.code), frame.reason.to_string()),
                        None => CloseEvent::new(1005, "Closed without status"),
                    };
                    info!("Server closed connection: {}", event);
                    close_connections(phase.into_connections(), None).await;
                    return Exit::Dropped(event);
                }
                Event::Inbound(Some(Ok(_))) => {
                    // Binary and pong frames carry nothing for us
                }
                Event::Inbound(Some(Err(e))) => {
                    close_connections(phase.into_connections(), None).await;
                    return Exit::Dropped(CloseEvent::abnormal(e.to_string()));
                }
                Event::Inbound(None) => {
                    close_connections(phase.into_connections(), None).await;
                    return Exit::Dropped(CloseEvent::abnormal("Connection closed without close frame"));
                }
            }
        }
    }

    async fn handle_text(&mut self, phase: Phase, text: &str) -> ControlFlow<Exit, Phase> {
        let received = Instant::now();
        self.watchdog_deadline = None;

        let frame = match Frame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping malformed frame: {}", e);
                self.rearm_watchdog(received);
                return ControlFlow::Continue(phase);
            }
        };

        if self.last_message_id.as_deref() == Some(frame.message_id()) {
            debug!("Dropping redelivered message {}", frame.message_id());
            self.rearm_watchdog(received);
            return ControlFlow::Continue(phase);
        }
        self.last_message_id = Some(frame.message_id().to_string());

        self.handlers.emit_message(frame.clone()).await;

        let flow = match frame.kind() {
            Some(MessageKind::Welcome) => self.on_welcome(phase, &frame).await,
            Some(MessageKind::Keepalive) => {
                self.handlers.emit_keepalive(frame).await;
                ControlFlow::Continue(phase)
            }
            Some(MessageKind::Notification) => {
                self.on_notification(frame).await;
                ControlFlow::Continue(phase)
            }
            Some(MessageKind::Reconnect) => self.on_reconnect_request(phase, &frame).await,
            Some(MessageKind::Revocation) => {
                match frame.subscription() {
                    Ok(subscription) => {
                        info!("Subscription {} revoked: {}", subscription.subscription_type, subscription.status);
                        self.handlers.emit_revocation(subscription).await;
                    }
                    Err(e) => warn!("Revocation {} without subscription: {}", frame.message_id(), e),
                }
                ControlFlow::Continue(phase)
            }
            None => {
                debug!("Unhandled message type {}", frame.metadata.message_type);
                ControlFlow::Continue(phase)
            }
        };

        if flow.is_continue() {
            self.rearm_watchdog(received);
        }
        flow
    }

    async fn on_welcome(&mut self, phase: Phase, frame: &Frame) -> ControlFlow<Exit, Phase> {
        let session = match frame.session() {
            Ok(session) => session,
            Err(e) => {
                warn!("Welcome {} without session: {}", frame.message_id(), e);
                return ControlFlow::Continue(phase);
            }
        };
        self.welcome_deadline = None;

        let (conn, is_reconnect) = match phase {
            Phase::Reconnecting { old, new, .. } => {
                old.close(CLOSE_CODE_CLIENT, "Reconnected").await;
                (new, true)
            }
            Phase::Connecting { conn } | Phase::Active { conn, .. } => (conn, false),
        };

        if let Some(secs) = session.keepalive_timeout_seconds {
            self.keepalive = Some(Duration::from_secs(secs));
        }
        if self.first_connected_at.is_none() {
            self.first_connected_at =
                DateTime::parse_from_rfc3339(&session.connected_at).ok().map(|t| t.with_timezone(&Utc));
        }

        info!(
            "EventSub session {} ready (keepalive: {:?}s, reconnect: {})",
            session.id, session.keepalive_timeout_seconds, is_reconnect
        );
        self.publish(SessionState::Active, Some(&session));
        self.handlers.emit_welcome(WelcomeEvent { session: session.clone(), is_reconnect }).await;

        ControlFlow::Continue(Phase::Active { conn, session })
    }

    async fn on_notification(&self, frame: Frame) {
        let subscription = match frame.subscription() {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!("Notification {} without subscription: {}", frame.message_id(), e);
                return;
            }
        };

        let kind = classify::notification_type(&frame);
        if kind.is_none() {
            debug!(
                "Unknown subscription type {:?} v{:?}",
                frame.metadata.subscription_type, frame.metadata.subscription_version
            );
        }

        let event = frame.event();
        self.handlers
            .emit_notification(Notification { metadata: frame.metadata, subscription, event, kind })
            .await;
    }

    async fn on_reconnect_request(&mut self, phase: Phase, frame: &Frame) -> ControlFlow<Exit, Phase> {
        let session = match frame.session() {
            Ok(session) => session,
            Err(e) => {
                warn!("Reconnect {} without session: {}", frame.message_id(), e);
                return ControlFlow::Continue(phase);
            }
        };
        let Some(url) = session.reconnect_url.clone() else {
            warn!("Reconnect {} without reconnect_url", frame.message_id());
            return ControlFlow::Continue(phase);
        };

        let current = match phase {
            Phase::Connecting { conn } | Phase::Active { conn, .. } => conn,
            Phase::Reconnecting { old, new, .. } => {
                old.close(CLOSE_CODE_CLIENT, "Reconnected").await;
                new
            }
        };

        info!("Server requested reconnect to {}", url);
        self.publish(SessionState::Reconnecting, Some(&session));
        // The new connection gets the same budget as a fresh one to open and welcome
        self.welcome_deadline = Some(Instant::now() + WELCOME_TIMEOUT);

        match self.open(&url).await {
            Opened::Conn(new) => {
                self.handlers.emit_reconnect(session.clone()).await;
                ControlFlow::Continue(Phase::Reconnecting { old: current, new, session })
            }
            Opened::Cancelled(ack) => ControlFlow::Break(Exit::Client { ack, connections: vec![current] }),
            Opened::Failed(event) => {
                close_connections(vec![current], Some(&event)).await;
                ControlFlow::Break(Exit::Dropped(event))
            }
        }
    }

    fn rearm_watchdog(&mut self, from: Instant) {
        let Some(keepalive) = self.keepalive else { return };
        let deadline = keepalive.checked_add(KEEPALIVE_GRACE).and_then(|d| from.checked_add(d));
        if deadline.is_none() {
            debug!("Keepalive timeout {:?} out of range, watchdog disarmed", keepalive);
        }
        self.watchdog_deadline = deadline;
    }

    async fn shutdown(&mut self, connections: Vec<Connection>, ack: Option<oneshot::Sender<()>>) {
        self.welcome_deadline = None;
        self.watchdog_deadline = None;

        info!("Closing EventSub session");
        self.handlers.emit_close(CloseEvent::client()).await;
        for conn in connections {
            conn.close(CLOSE_CODE_CLIENT, CLOSE_REASON_CLIENT).await;
        }
        self.publish(SessionState::Closed, None);

        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }

    fn publish(&self, state: SessionState, session: Option<&SessionInfo>) {
        self.status_tx.send_replace(SessionStatus {
            state,
            session_id: session.map(|s| s.id.clone()),
            keepalive_timeout: self.keepalive,
            first_connected_at: self.first_connected_at,
        });
    }
}
