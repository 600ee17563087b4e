//! Error types for the Helix side of the adapter.
//!
//! The EventSub session has no error type of its own: every failure there is
//! folded into a close event and reported through the `on_close` callback.

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Failure of a single timed request/response exchange.
#[derive(Error, Debug)]
pub enum RequestError {
    /// The executor's own timeout guard fired before the exchange completed
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// A caller-supplied cancellation token was triggered
    #[error("request cancelled by caller")]
    Cancelled,

    /// Target could not be turned into a URL
    #[error("invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// Connection, TLS or body read failure
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl RequestError {
    /// Check whether this failure came from the timeout guard
    pub fn is_timeout(&self) -> bool {
        matches!(self, RequestError::Timeout(_))
    }
}

/// Uniform REST failure: every Helix wrapper returns `Result<T, HelixError>`
/// and never lets transport or decoding errors escape in another shape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Helix request failed ({}): {message}", status_label(.status))]
pub struct HelixError {
    /// HTTP status when a response was received
    pub status: Option<StatusCode>,
    /// Platform-supplied message, or a local description of the failure
    pub message: String,
}

impl HelixError {
    pub fn new(status: Option<StatusCode>, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    /// Failure with a received HTTP status
    pub fn status(status: StatusCode, message: impl Into<String>) -> Self {
        Self::new(Some(status), message)
    }
}

fn status_label(status: &Option<StatusCode>) -> String {
    match status {
        Some(s) => s.as_u16().to_string(),
        None => "no status".to_string(),
    }
}

impl From<RequestError> for HelixError {
    fn from(err: RequestError) -> Self {
        let status = match &err {
            RequestError::Transport(e) => e.status(),
            _ => None,
        };
        Self::new(status, err.to_string())
    }
}

impl From<serde_json::Error> for HelixError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(None, format!("failed to decode response: {}", err))
    }
}
