//! Authentication for Helix and EventSub
//!
//! # Token Types
//! - User access token: acts on behalf of a user; required for EventSub
//!   WebSocket subscriptions
//! - App access token: client-credentials grant; webhook/conduit only
//!
//! Every Helix call carries `Authorization: Bearer <token>` and
//! `Client-Id: <client id>`. The token must belong to that client id.
//!
//! # Source
//! - Authentication: https://dev.twitch.tv/docs/authentication
//! - Implicit grant flow: https://dev.twitch.tv/docs/authentication/getting-tokens-oauth/#implicit-grant-flow

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};

use super::request::{build_url, Params};
use crate::error::HelixError;
use crate::OAUTH_BASE;

/// Bearer token + the client id it was issued to
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// Application client id
    pub client_id: String,
    /// OAuth access token, without the `Bearer ` / `oauth:` prefix
    pub access_token: String,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        let access_token = access_token.into();
        let access_token = access_token
            .strip_prefix("oauth:")
            .map(str::to_string)
            .unwrap_or(access_token);
        Self { client_id: client_id.into(), access_token }
    }

    /// Create credentials from environment variables
    ///
    /// Expected env vars:
    /// - TWITCH_CLIENT_ID
    /// - TWITCH_ACCESS_TOKEN
    pub fn from_env() -> Option<Self> {
        let client_id = std::env::var("TWITCH_CLIENT_ID").ok()?;
        let access_token = std::env::var("TWITCH_ACCESS_TOKEN").ok()?;

        Some(Self::new(client_id, access_token))
    }

    /// Check if credentials are present (non-empty)
    pub fn is_valid(&self) -> bool {
        !self.client_id.is_empty() && !self.access_token.is_empty()
    }

    /// `Authorization` + `Client-Id` headers
    ///
    /// Fails before any request is made when either value is not a valid
    /// header value (control characters, newlines).
    pub fn headers(&self) -> Result<HeaderMap, HelixError> {
        let token = HeaderValue::from_str(&format!("Bearer {}", self.access_token))
            .map_err(|e| HelixError::new(None, format!("invalid access token: {}", e)))?;
        let client_id = HeaderValue::from_str(&self.client_id)
            .map_err(|e| HelixError::new(None, format!("invalid client id: {}", e)))?;

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, token);
        headers.insert("Client-Id", client_id);
        Ok(headers)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field(
                "access_token",
                &format!("{}...", &self.access_token.chars().take(4).collect::<String>()),
            )
            .finish()
    }
}

/// `response_type` of the authorize page
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseType {
    /// Implicit grant: token comes back in the redirect fragment
    Token,
    /// Authorization code grant
    Code,
}

impl ResponseType {
    fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Token => "token",
            ResponseType::Code => "code",
        }
    }
}

/// Link to the user-facing authorize page
///
/// Endpoint: GET https://id.twitch.tv/oauth2/authorize
pub fn authorize_url(
    client_id: &str,
    redirect_uri: &str,
    response_type: ResponseType,
    scopes: &[&str],
    state: Option<&str>,
    force_verify: bool,
) -> String {
    let query = Params::new()
        .with("client_id", client_id)
        .with("redirect_uri", redirect_uri)
        .with("response_type", response_type.as_str())
        .with("scope", scopes.join(" "))
        .with("state", state)
        .with("force_verify", force_verify);

    build_url(&format!("{}/authorize", OAUTH_BASE), &query, &Params::new())
}
