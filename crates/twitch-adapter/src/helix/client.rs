//! REST client for the Helix API
//!
//! Base URL: https://api.twitch.tv/helix
//!
//! Only a representative slice of endpoints is wrapped; everything goes
//! through [`HelixClient::send`], which callers can use directly for the rest.
//! Every wrapper returns `Result<_, HelixError>`: transport failures, non-2xx
//! responses and undecodable bodies all come back in that one shape.
//!
//! # Source
//! - Endpoints: https://dev.twitch.tv/docs/api/reference

use std::marker::PhantomData;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::auth::Credentials;
use super::request::{ExecutorConfig, Params, RequestExecutor, RequestOptions, TimedResponse};
use crate::error::HelixError;
use crate::types::{
    ChannelInformation, ChatMessageSent, DataEnvelope, ErrorBody, Page, Stream, SubscriptionDescriptor,
    SubscriptionInfo, TokenValidation, User,
};
use crate::{HELIX_API_BASE, OAUTH_BASE};

// ============================================================================
// Response Cardinality
// ============================================================================

/// Expected shape of a response body, chosen at the call site
pub trait ResponseShape {
    type Output;

    fn extract(response: &TimedResponse) -> Result<Self::Output, HelixError>;
}

/// `{ data: [x] }` unwrapped to `x`; an empty `data` is an error
pub struct One<T>(PhantomData<T>);

/// `{ data: [...], pagination }` as a [`Page`]
pub struct Many<T>(PhantomData<T>);

/// Body is `T` itself, no envelope (OAuth endpoints)
pub struct Bare<T>(PhantomData<T>);

/// Body is ignored (204 responses)
pub struct Empty;

impl<T: DeserializeOwned> ResponseShape for One<T> {
    type Output = T;

    fn extract(response: &TimedResponse) -> Result<T, HelixError> {
        let envelope: DataEnvelope<T> = response.json()?;
        envelope
            .data
            .into_iter()
            .next()
            .ok_or_else(|| HelixError::status(response.status, "response contained no data"))
    }
}

impl<T: DeserializeOwned> ResponseShape for Many<T> {
    type Output = Page<T>;

    fn extract(response: &TimedResponse) -> Result<Page<T>, HelixError> {
        let envelope: DataEnvelope<T> = response.json()?;
        Ok(Page {
            items: envelope.data,
            cursor: envelope.pagination.and_then(|p| p.cursor).filter(|c| !c.is_empty()),
            total: envelope.total,
        })
    }
}

impl<T: DeserializeOwned> ResponseShape for Bare<T> {
    type Output = T;

    fn extract(response: &TimedResponse) -> Result<T, HelixError> {
        Ok(response.json()?)
    }
}

impl ResponseShape for Empty {
    type Output = ();

    fn extract(_response: &TimedResponse) -> Result<(), HelixError> {
        Ok(())
    }
}

/// Map a non-2xx response to the uniform failure
fn normalize_failure(response: &TimedResponse) -> HelixError {
    let message = serde_json::from_str::<ErrorBody>(&response.body)
        .ok()
        .and_then(|body| body.message.or(body.error))
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            response.status.canonical_reason().unwrap_or("request failed").to_string()
        });
    HelixError::status(response.status, message)
}

// ============================================================================
// Client
// ============================================================================

/// Filter for `GET /eventsub/subscriptions`; the API accepts at most one
#[derive(Clone, Debug, Default)]
pub struct SubscriptionFilter {
    pub status: Option<String>,
    pub subscription_type: Option<String>,
    pub user_id: Option<String>,
    pub after: Option<String>,
}

/// REST client for Helix
#[derive(Clone)]
pub struct HelixClient {
    executor: RequestExecutor,
    credentials: Credentials,
    base_url: String,
    oauth_url: String,
}

impl HelixClient {
    /// Create a new client with default base URLs
    pub fn new(credentials: Credentials) -> Result<Self, HelixError> {
        Self::with_base_url(credentials, HELIX_API_BASE, OAUTH_BASE)
    }

    /// Create a new client with custom base URLs (for testing)
    pub fn with_base_url(credentials: Credentials, base_url: &str, oauth_url: &str) -> Result<Self, HelixError> {
        Self::with_config(credentials, base_url, oauth_url, ExecutorConfig::default())
    }

    pub fn with_config(
        credentials: Credentials,
        base_url: &str,
        oauth_url: &str,
        config: ExecutorConfig,
    ) -> Result<Self, HelixError> {
        let executor = RequestExecutor::with_config(config)?;
        Ok(Self {
            executor,
            credentials,
            base_url: base_url.trim_end_matches('/').to_string(),
            oauth_url: oauth_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Authenticated Helix call with a typed response shape
    pub async fn send<S: ResponseShape>(
        &self,
        method: Method,
        path: &str,
        query: Params,
        body: Option<Value>,
    ) -> Result<S::Output, HelixError> {
        let url = format!("{}{}", self.base_url, path);
        self.send_to::<S>(method, &url, self.credentials.headers()?, query, body).await
    }

    async fn send_to<S: ResponseShape>(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        query: Params,
        body: Option<Value>,
    ) -> Result<S::Output, HelixError> {
        let response = self
            .executor
            .execute(method, url, headers, body.as_ref(), RequestOptions::new().query(query))
            .await?;

        if !response.is_success() {
            let err = normalize_failure(&response);
            debug!("{} for {}: {}", response.status, url, err.message);
            return Err(err);
        }

        S::extract(&response)
    }

    /// Validate the access token and report who it belongs to
    ///
    /// Endpoint: GET https://id.twitch.tv/oauth2/validate
    pub async fn validate_token(&self) -> Result<TokenValidation, HelixError> {
        let url = format!("{}/validate", self.oauth_url);
        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(&format!("OAuth {}", self.credentials.access_token))
            .map_err(|e| HelixError::new(None, format!("invalid access token: {}", e)))?;
        headers.insert(AUTHORIZATION, value);
        let validation = self
            .send_to::<Bare<TokenValidation>>(Method::GET, &url, headers, Params::new(), None)
            .await?;
        info!(
            "Token valid for client {} (login: {:?}, expires in {}s)",
            validation.client_id, validation.login, validation.expires_in
        );
        Ok(validation)
    }

    /// Get users by id and/or login (up to 100 combined); no filter = token owner
    ///
    /// Endpoint: GET /users?id={id}&login={login}
    pub async fn get_users(&self, ids: &[&str], logins: &[&str]) -> Result<Vec<User>, HelixError> {
        let query = Params::new().with("id", ids.to_vec()).with("login", logins.to_vec());
        Ok(self.send::<Many<User>>(Method::GET, "/users", query, None).await?.items)
    }

    /// Get a single user by login
    ///
    /// Endpoint: GET /users?login={login}
    pub async fn get_user_by_login(&self, login: &str) -> Result<User, HelixError> {
        self.send::<One<User>>(Method::GET, "/users", Params::new().with("login", login), None).await
    }

    /// Get live streams for the given user ids
    ///
    /// Endpoint: GET /streams?user_id={id}&first={first}&after={cursor}
    pub async fn get_streams(
        &self,
        user_ids: &[&str],
        first: Option<u32>,
        after: Option<&str>,
    ) -> Result<Page<Stream>, HelixError> {
        let query = Params::new().with("user_id", user_ids.to_vec()).with("first", first).with("after", after);
        self.send::<Many<Stream>>(Method::GET, "/streams", query, None).await
    }

    /// Get channel information for one broadcaster
    ///
    /// Endpoint: GET /channels?broadcaster_id={id}
    pub async fn get_channel_information(&self, broadcaster_id: &str) -> Result<ChannelInformation, HelixError> {
        let query = Params::new().with("broadcaster_id", broadcaster_id);
        self.send::<One<ChannelInformation>>(Method::GET, "/channels", query, None).await
    }

    /// Send a chat message as `sender_id` into `broadcaster_id`'s chat
    ///
    /// Endpoint: POST /chat/messages
    pub async fn send_chat_message(
        &self,
        broadcaster_id: &str,
        sender_id: &str,
        message: &str,
        reply_parent_message_id: Option<&str>,
    ) -> Result<ChatMessageSent, HelixError> {
        let mut body = json!({
            "broadcaster_id": broadcaster_id,
            "sender_id": sender_id,
            "message": message,
        });
        if let Some(parent) = reply_parent_message_id {
            body["reply_parent_message_id"] = Value::String(parent.to_string());
        }
        self.send::<One<ChatMessageSent>>(Method::POST, "/chat/messages", Params::new(), Some(body)).await
    }

    /// Register an EventSub subscription
    ///
    /// Endpoint: POST /eventsub/subscriptions
    pub async fn create_eventsub_subscription(
        &self,
        descriptor: &SubscriptionDescriptor,
    ) -> Result<SubscriptionInfo, HelixError> {
        let body = serde_json::to_value(descriptor)?;
        let created = self
            .send::<One<SubscriptionInfo>>(Method::POST, "/eventsub/subscriptions", Params::new(), Some(body))
            .await?;
        info!("Subscribed to {} v{} ({})", created.subscription_type, created.version, created.status);
        Ok(created)
    }

    /// List EventSub subscriptions owned by this client id
    ///
    /// Endpoint: GET /eventsub/subscriptions?status=&type=&user_id=&after=
    pub async fn get_eventsub_subscriptions(
        &self,
        filter: &SubscriptionFilter,
    ) -> Result<Page<SubscriptionInfo>, HelixError> {
        let query = Params::new()
            .with("status", filter.status.as_ref())
            .with("type", filter.subscription_type.as_ref())
            .with("user_id", filter.user_id.as_ref())
            .with("after", filter.after.as_ref());
        self.send::<Many<SubscriptionInfo>>(Method::GET, "/eventsub/subscriptions", query, None).await
    }

    /// Delete an EventSub subscription
    ///
    /// Endpoint: DELETE /eventsub/subscriptions?id={id}
    pub async fn delete_eventsub_subscription(&self, id: &str) -> Result<(), HelixError> {
        let query = Params::new().with("id", id);
        self.send::<Empty>(Method::DELETE, "/eventsub/subscriptions", query, None).await
    }
}

/// 404 check for callers that treat "missing" as a normal outcome
pub fn is_not_found(err: &HelixError) -> bool {
    err.status == Some(StatusCode::NOT_FOUND)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Transport;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> HelixClient {
        HelixClient::with_base_url(
            Credentials::new("cid", "tok"),
            &server.uri(),
            &format!("{}/oauth2", server.uri()),
        )
        .unwrap()
    }

    #[test]
    fn test_custom_base_url() {
        let client = HelixClient::with_base_url(Credentials::new("a", "b"), "https://example.com/", "https://id.example.com/")
            .unwrap();
        assert_eq!(client.base_url, "https://example.com");
        assert_eq!(client.oauth_url, "https://id.example.com");
    }

    #[tokio::test]
    async fn test_get_users_sends_auth_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .and(query_param("login", "twitchdev"))
            .and(header("Authorization", "Bearer tok"))
            .and(header("Client-Id", "cid"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{
                    "id": "141981764",
                    "login": "twitchdev",
                    "display_name": "TwitchDev",
                    "type": "",
                    "broadcaster_type": "partner",
                    "description": "Supporting third-party developers",
                    "profile_image_url": "https://example.com/p.png",
                    "created_at": "2016-12-14T20:32:28Z"
                }]
            })))
            .mount(&server)
            .await;

        let users = client(&server).await.get_users(&[], &["twitchdev"]).await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, "141981764");
        assert_eq!(users[0].broadcaster_type, "partner");
    }

    #[tokio::test]
    async fn test_one_with_empty_data_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;

        let err = client(&server).await.get_user_by_login("nobody").await.unwrap_err();
        assert_eq!(err.status, Some(StatusCode::OK));
        assert!(err.message.contains("no data"));
    }

    #[tokio::test]
    async fn test_failure_is_normalized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/channels"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "Unauthorized",
                "status": 401,
                "message": "Invalid OAuth token"
            })))
            .mount(&server)
            .await;

        let err = client(&server).await.get_channel_information("1").await.unwrap_err();
        assert_eq!(err.status, Some(StatusCode::UNAUTHORIZED));
        assert_eq!(err.message, "Invalid OAuth token");
    }

    #[tokio::test]
    async fn test_failure_without_body_uses_reason() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client(&server).await.delete_eventsub_subscription("nope").await.unwrap_err();
        assert!(is_not_found(&err));
        assert_eq!(err.message, "Not Found");
    }

    #[tokio::test]
    async fn test_create_subscription_posts_websocket_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/eventsub/subscriptions"))
            .and(body_partial_json(json!({
                "type": "stream.online",
                "version": "1",
                "transport": {"method": "websocket", "session_id": "sess-1"}
            })))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({
                "data": [{
                    "id": "26b1c993-bfcf-44d9-b876-379dacafe75a",
                    "status": "enabled",
                    "type": "stream.online",
                    "version": "1",
                    "condition": {"broadcaster_user_id": "1234"},
                    "created_at": "2020-11-10T14:32:18.730260295Z",
                    "transport": {"method": "websocket", "session_id": "sess-1", "connected_at": "2020-11-10T14:32:18Z"},
                    "cost": 0
                }],
                "total": 1,
                "total_cost": 0,
                "max_total_cost": 10
            })))
            .expect(1)
            .mount(&server)
            .await;

        let descriptor = SubscriptionDescriptor::stream_online("1234", Transport::websocket("sess-1"));
        let created = client(&server).await.create_eventsub_subscription(&descriptor).await.unwrap();
        assert_eq!(created.status, "enabled");
        assert_eq!(created.transport.session_id(), Some("sess-1"));
    }

    #[tokio::test]
    async fn test_list_subscriptions_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/eventsub/subscriptions"))
            .and(query_param("status", "enabled"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [],
                "total": 0,
                "pagination": {"cursor": "next-page"}
            })))
            .mount(&server)
            .await;

        let filter = SubscriptionFilter { status: Some("enabled".to_string()), ..Default::default() };
        let page = client(&server).await.get_eventsub_subscriptions(&filter).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.cursor.as_deref(), Some("next-page"));
        assert_eq!(page.total, Some(0));
    }

    #[tokio::test]
    async fn test_validate_token_bare_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth2/validate"))
            .and(header("Authorization", "OAuth tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "client_id": "cid",
                "login": "twitchdev",
                "scopes": ["user:read:chat"],
                "user_id": "141981764",
                "expires_in": 5520838
            })))
            .mount(&server)
            .await;

        let validation = client(&server).await.validate_token().await.unwrap();
        assert_eq!(validation.user_id.as_deref(), Some("141981764"));
        assert_eq!(validation.scopes, vec!["user:read:chat"]);
    }

    #[tokio::test]
    async fn test_transport_failure_has_no_status() {
        let client = HelixClient::with_base_url(Credentials::new("a", "b"), "http://127.0.0.1:9", "http://127.0.0.1:9")
            .unwrap();
        let err = client.get_users(&[], &[]).await.unwrap_err();
        assert_eq!(err.status, None);
    }

    #[tokio::test]
    async fn test_invalid_token_fails_before_request() {
        let server = MockServer::start().await;
        let client = HelixClient::with_base_url(Credentials::new("cid", "bad\ntoken"), &server.uri(), &server.uri())
            .unwrap();

        let err = client.get_users(&[], &["twitchdev"]).await.unwrap_err();
        assert_eq!(err.status, None);
        assert!(err.message.contains("invalid access token"));
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
