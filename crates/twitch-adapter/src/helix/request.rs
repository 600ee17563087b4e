//! Timed request executor
//!
//! One request/response exchange with an abort-on-timeout guarantee. Every
//! Helix wrapper goes through [`RequestExecutor::execute`].
//!
//! Timeout rules:
//! - a caller-supplied [`CancellationToken`] replaces the timeout guard
//!   entirely; only that token can abort the request
//! - otherwise the effective timeout is the per-request override, falling
//!   back to [`ExecutorConfig::timeout`]
//! - a zero timeout disables the guard and the request waits indefinitely

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::form_urlencoded::byte_serialize;

use crate::error::RequestError;

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Query / Fragment Parameters
// ============================================================================

/// A single parameter value
#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Expanded as one `key=value` pair per element
    List(Vec<ParamValue>),
    Null,
}

impl ParamValue {
    /// Falsy values are dropped from the serialized output: `""`, `0`,
    /// `0.0`, NaN, `false` and null. Lists are never falsy.
    pub fn is_falsy(&self) -> bool {
        match self {
            ParamValue::Str(s) => s.is_empty(),
            ParamValue::Int(n) => *n == 0,
            ParamValue::Float(f) => *f == 0.0 || f.is_nan(),
            ParamValue::Bool(b) => !*b,
            ParamValue::List(_) => false,
            ParamValue::Null => true,
        }
    }

    fn render(&self) -> String {
        match self {
            ParamValue::Str(s) => s.clone(),
            ParamValue::Int(n) => n.to_string(),
            ParamValue::Float(f) => f.to_string(),
            ParamValue::Bool(b) => b.to_string(),
            ParamValue::List(items) => {
                items.iter().map(ParamValue::render).collect::<Vec<_>>().join(",")
            }
            ParamValue::Null => "null".to_string(),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl From<&String> for ParamValue {
    fn from(value: &String) -> Self {
        ParamValue::Str(value.clone())
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        ParamValue::Int(i64::from(value))
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(values: Vec<T>) -> Self {
        ParamValue::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(ParamValue::Null)
    }
}

/// Parameters in insertion order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Params(Vec<(String, ParamValue)>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter (builder style)
    pub fn with(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.push(key, value);
        self
    }

    pub fn push(&mut self, key: &str, value: impl Into<ParamValue>) {
        self.0.push((key.to_string(), value.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `k=v&k=v...` in insertion order. Falsy values are skipped entirely,
    /// lists expand to repeated keys. Keys and values are percent-encoded.
    pub fn serialize(&self) -> String {
        let mut pairs = Vec::new();
        for (key, value) in &self.0 {
            if value.is_falsy() {
                continue;
            }
            match value {
                ParamValue::List(items) => {
                    for item in items {
                        pairs.push(encode_pair(key, &item.render()));
                    }
                }
                other => pairs.push(encode_pair(key, &other.render())),
            }
        }
        pairs.join("&")
    }
}

fn encode_pair(key: &str, value: &str) -> String {
    format!("{}={}", encode(key), encode(value))
}

fn encode(s: &str) -> String {
    byte_serialize(s.as_bytes()).collect()
}

/// Append serialized query and fragment parameters to `url`
pub fn build_url(url: &str, query: &Params, fragment: &Params) -> String {
    let mut out = url.to_string();

    let query_string = query.serialize();
    if !query_string.is_empty() {
        out.push(if out.contains('?') { '&' } else { '?' });
        out.push_str(&query_string);
    }

    let fragment_string = fragment.serialize();
    if !fragment_string.is_empty() {
        out.push('#');
        out.push_str(&fragment_string);
    }

    out
}

// ============================================================================
// Executor
// ============================================================================

/// Executor-wide settings, owned by the executor instance
#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    /// Applied when a request has no override; zero disables the guard
    pub timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { timeout: DEFAULT_TIMEOUT }
    }
}

/// Per-request options
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    pub query: Params,
    pub fragment: Params,
    /// Overrides [`ExecutorConfig::timeout`]; `Some(Duration::ZERO)` disables the guard
    pub timeout: Option<Duration>,
    /// Caller-owned cancellation; when set, no timeout guard is installed
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, query: Params) -> Self {
        self.query = query;
        self
    }

    pub fn fragment(mut self, fragment: Params) -> Self {
        self.fragment = fragment;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancel_with(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Fully read response
#[derive(Clone, Debug)]
pub struct TimedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl TimedResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Issues requests with a bounded wait
#[derive(Clone)]
pub struct RequestExecutor {
    client: Client,
    config: ExecutorConfig,
}

impl RequestExecutor {
    /// Create an executor with the default configuration
    pub fn new() -> Result<Self, RequestError> {
        Self::with_config(ExecutorConfig::default())
    }

    pub fn with_config(config: ExecutorConfig) -> Result<Self, RequestError> {
        let client = Client::builder().build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Perform one exchange. The guard covers sending, headers and reading
    /// the body.
    pub async fn execute(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Option<&Value>,
        options: RequestOptions,
    ) -> Result<TimedResponse, RequestError> {
        let target = build_url(url, &options.query, &options.fragment);
        let parsed = url::Url::parse(&target)
            .map_err(|source| RequestError::InvalidUrl { url: target.clone(), source })?;

        debug!("{} {}", method, parsed);

        let mut request = self.client.request(method, parsed).headers(headers);
        if let Some(body) = body {
            request = request.json(body);
        }

        let exchange = async move {
            let response = request.send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.text().await?;
            Ok::<_, RequestError>(TimedResponse { status, headers, body })
        };

        match options.cancel {
            Some(token) => {
                tokio::select! {
                    result = exchange => result,
                    _ = token.cancelled() => Err(RequestError::Cancelled),
                }
            }
            None => {
                let timeout = options.timeout.unwrap_or(self.config.timeout);
                if timeout.is_zero() {
                    return exchange.await;
                }

                let guard = CancellationToken::new();
                let trigger = guard.clone();
                let timer = tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    trigger.cancel();
                });

                let result = tokio::select! {
                    result = exchange => result,
                    _ = guard.cancelled() => Err(RequestError::Timeout(timeout)),
                };
                timer.abort();
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_falsy_values_skipped() {
        let params = Params::new()
            .with("a", 1i64)
            .with("b", 0i64)
            .with("c", "x")
            .with("d", vec![1i64, 2]);
        assert_eq!(params.serialize(), "a=1&c=x&d=1&d=2");
    }

    #[test]
    fn test_zero_as_string_is_kept() {
        let params = Params::new()
            .with("first", "0")
            .with("empty", "")
            .with("flag", false)
            .with("none", None::<String>);
        assert_eq!(params.serialize(), "first=0");
    }

    #[test]
    fn test_insertion_order_and_encoding() {
        let params = Params::new().with("z", "a b").with("a", "x&y").with("scope", vec!["chat:read", "user:bot"]);
        assert_eq!(params.serialize(), "z=a+b&a=x%26y&scope=chat%3Aread&scope=user%3Abot");
    }

    #[test]
    fn test_build_url() {
        let query = Params::new().with("id", "1");
        let fragment = Params::new().with("state", "abc");
        assert_eq!(build_url("https://x.test/a", &query, &fragment), "https://x.test/a?id=1#state=abc");
        assert_eq!(build_url("https://x.test/a?b=2", &query, &Params::new()), "https://x.test/a?b=2&id=1");
        assert_eq!(build_url("https://x.test/a", &Params::new(), &Params::new()), "https://x.test/a");
    }

    #[tokio::test]
    async fn test_query_params_reach_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .and(query_param("login", "twitchdev"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let executor = RequestExecutor::new().unwrap();
        let options = RequestOptions::new().query(Params::new().with("login", "twitchdev").with("id", ""));
        let response = executor
            .execute(Method::GET, &format!("{}/users", server.uri()), HeaderMap::new(), None, options)
            .await
            .unwrap();
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn test_timeout_rejects_with_timeout_reason() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let executor = RequestExecutor::new().unwrap();
        let started = Instant::now();
        let err = executor
            .execute(
                Method::GET,
                &server.uri(),
                HeaderMap::new(),
                None,
                RequestOptions::new().timeout(Duration::from_millis(50)),
            )
            .await
            .unwrap_err();

        assert!(err.is_timeout(), "unexpected error: {}", err);
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_caller_token_replaces_timeout_guard() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(200)))
            .mount(&server)
            .await;

        let executor = RequestExecutor::with_config(ExecutorConfig { timeout: Duration::from_millis(50) }).unwrap();
        let response = executor
            .execute(
                Method::GET,
                &server.uri(),
                HeaderMap::new(),
                None,
                RequestOptions::new().cancel_with(CancellationToken::new()),
            )
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_caller_token_cancels() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let executor = RequestExecutor::new().unwrap();
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let err = executor
            .execute(Method::GET, &server.uri(), HeaderMap::new(), None, RequestOptions::new().cancel_with(token))
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Cancelled));
    }

    #[tokio::test]
    async fn test_zero_timeout_disables_guard() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_millis(150)))
            .mount(&server)
            .await;

        let executor = RequestExecutor::with_config(ExecutorConfig { timeout: Duration::from_millis(20) }).unwrap();
        let response = executor
            .execute(
                Method::GET,
                &server.uri(),
                HeaderMap::new(),
                None,
                RequestOptions::new().timeout(Duration::ZERO),
            )
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let executor = RequestExecutor::new().unwrap();
        let err = executor
            .execute(Method::GET, "not a url", HeaderMap::new(), None, RequestOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::InvalidUrl { .. }));
    }
}
