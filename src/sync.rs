//! API Sync Module
//!
//! Handles HTTP communication with the PM REST API. Every call goes through
//! [`ApiClient::request`], which normalizes transport failures, non-2xx
//! statuses and loosely-typed JSON bodies into a single result shape.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

/// Message reported for any transport-level failure
pub const NETWORK_ERROR_MESSAGE: &str = "Network error: unable to reach API server.";

/// Per-call request options
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: Method,
    pub token: Option<String>,
    /// `None` sends no body at all, which differs from `Some(Value::Null)`
    pub body: Option<Value>,
    /// Entries with a `None` value are left out of the URL
    pub query: Vec<(String, Option<String>)>,
    pub headers: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post(body: Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::default()
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn token(mut self, token: Option<&str>) -> Self {
        self.token = token.map(str::to_string);
        self
    }

    pub fn query<V: ToString>(mut self, key: &str, value: Option<V>) -> Self {
        self.query
            .push((key.to_string(), value.map(|v| v.to_string())));
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// API client for the PM backend
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    /// Create a client using transport default timeouts
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, None)
    }

    /// Create a client with an optional overall request timeout
    pub fn with_timeout(base_url: &str, timeout: Option<Duration>) -> Result<Self, ApiError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        Url::parse(&base_url)
            .map_err(|e| ApiError::InvalidRequest(format!("bad base URL {base_url:?}: {e}")))?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ApiError::InvalidRequest(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve `path` against the base URL and apply query parameters
    pub fn build_url(
        &self,
        path: &str,
        query: &[(String, Option<String>)],
    ) -> Result<Url, ApiError> {
        let raw = if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        };
        let mut url = Url::parse(&raw)
            .map_err(|e| ApiError::InvalidRequest(format!("bad URL {raw:?}: {e}")))?;

        // Later entries replace earlier ones with the same key
        let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        for (key, value) in query {
            if let Some(value) = value {
                pairs.retain(|(existing, _)| existing != key);
                pairs.push((key.clone(), value.clone()));
            }
        }
        if !pairs.is_empty() {
            url.query_pairs_mut().clear().extend_pairs(&pairs);
        }

        Ok(url)
    }

    /// Perform a request and return the decoded payload (`Value::Null` when
    /// the body was empty or not JSON)
    pub async fn request(&self, path: &str, options: RequestOptions) -> Result<Value, ApiError> {
        let url = self.build_url(path, &options.query)?;
        let headers = build_headers(&options)?;

        debug!("{} {}", options.method, url.path());

        let mut builder = self
            .client
            .request(options.method.clone(), url)
            .headers(headers);

        if let Some(body) = &options.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            warn!("Transport failure for {} {}: {}", options.method, path, e);
            ApiError::Network {
                message: NETWORK_ERROR_MESSAGE.to_string(),
                details: e.to_string(),
            }
        })?;

        let status = response.status();
        let data = parse_json_safely(response).await;

        if !status.is_success() {
            let message = failure_message(&data).unwrap_or_else(|| {
                format!(
                    "Request failed with status {} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("")
                )
                .trim_end()
                .to_string()
            });
            debug!("{} {} failed with {}: {}", options.method, path, status, message);

            return Err(ApiError::Http {
                status: status.as_u16(),
                message,
                details: (!data.is_null()).then_some(data),
            });
        }

        Ok(data)
    }
}

fn build_headers(options: &RequestOptions) -> Result<HeaderMap, ApiError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    if options.body.is_some() {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }

    for (name, value) in &options.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ApiError::InvalidRequest(format!("bad header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ApiError::InvalidRequest(format!("bad value for header {name}: {e}")))?;
        headers.insert(name, value);
    }

    if let Some(token) = options.token.as_deref().filter(|t| !t.is_empty()) {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| ApiError::InvalidRequest("token is not a valid header value".into()))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    Ok(headers)
}

async fn parse_json_safely(response: reqwest::Response) -> Value {
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("application/json"))
        .unwrap_or(false);

    if !is_json {
        return Value::Null;
    }

    match response.bytes().await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            debug!("Discarding malformed JSON body: {}", e);
            Value::Null
        }),
        Err(e) => {
            debug!("Failed to read response body: {}", e);
            Value::Null
        }
    }
}

/// Server-provided message from an error payload (`error`, then `message`)
fn failure_message(data: &Value) -> Option<String> {
    ["error", "message"].iter().find_map(|key| {
        data.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

/// API errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// The transport could not complete the exchange
    #[error("{message}")]
    Network { message: String, details: String },

    /// The server answered with a non-2xx status
    #[error("{message}")]
    Http {
        status: u16,
        message: String,
        details: Option<Value>,
    },

    /// The request could not be built locally
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A 2xx payload did not have any accepted shape
    #[error("Unexpected response shape for {0}")]
    UnexpectedShape(String),
}

impl ApiError {
    pub fn human_message(&self) -> String {
        self.to_string()
    }

    /// HTTP status, or 0 when the failure did not come from an HTTP status
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::Http { status, .. } => *status,
            _ => 0,
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            ApiError::Network { details, .. } => Some(Value::String(details.clone())),
            ApiError::Http { details, .. } => details.clone(),
            _ => None,
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Network { .. })
    }
}
