//! Physical WebSocket connections
//!
//! The session only sees a [`Connection`]: a boxed sink and stream of
//! tungstenite messages. [`Connector`] opens them, so tests can swap the
//! network for an in-memory pair.

use std::pin::Pin;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::debug;

/// Upper bound on sending our close frame
const CLOSE_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Outbound half of a connection
pub type MessageSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

/// Inbound half of a connection
pub type MessageStream = BoxStream<'static, Result<Message, WsError>>;

/// One open physical connection
pub struct Connection {
    pub sink: MessageSink,
    pub stream: MessageStream,
}

impl Connection {
    pub fn from_parts(sink: MessageSink, stream: MessageStream) -> Self {
        Self { sink, stream }
    }

    /// Send a close frame and drop the connection; send errors are ignored
    pub async fn close(mut self, code: u16, reason: &str) {
        let frame = CloseFrame { code: CloseCode::from(code), reason: reason.to_string().into() };
        match tokio::time::timeout(CLOSE_SEND_TIMEOUT, self.sink.send(Message::Close(Some(frame)))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Close frame not sent: {}", e),
            Err(_) => debug!("Close frame send timed out"),
        }
    }
}

/// Opens physical connections for a session
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Connection, WsError>>;
}

/// Real network connector
#[derive(Clone, Debug, Default)]
pub struct TungsteniteConnector;

impl Connector for TungsteniteConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Connection, WsError>> {
        let url = url.to_string();
        Box::pin(async move {
            let (ws_stream, response) = connect_async(url).await?;
            debug!("WebSocket connected, status: {}", response.status());

            let (write, read) = ws_stream.split();
            Ok(Connection::from_parts(Box::pin(write), read.boxed()))
        })
    }
}
