//! Transport seam between the batch engine and the remote simulation service.
//!
//! [`SimulationApi`] is deliberately thin: it mirrors a cookie-keeping HTTP
//! session so every higher layer (session renewal, polling, analysis) can be
//! exercised against an in-memory implementation. HTTP statuses are data, not
//! errors; only transport failures surface as `Err`.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, LOCATION, RETRY_AFTER, WWW_AUTHENTICATE};
use reqwest::Method;
use serde_json::Value;
use tracing::debug;

use crate::config::{ApiConfig, Credentials};
use crate::errors::{AlphaBatchError, Result};

/// What the service answered to one call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Seconds to wait before asking again, from the `Retry-After` header.
    pub retry_after: Option<f64>,
    /// Job location from the `Location` header.
    pub location: Option<String>,
    pub www_authenticate: Option<String>,
    /// Parsed JSON body, `Value::Null` when empty or not JSON.
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            retry_after: None,
            location: None,
            www_authenticate: None,
            body,
        }
    }

    pub fn with_retry_after(mut self, seconds: f64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_www_authenticate(mut self, challenge: impl Into<String>) -> Self {
        self.www_authenticate = Some(challenge.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status / 100 == 2
    }

    /// String field of the body, if present.
    pub fn body_str(&self, key: &str) -> Option<&str> {
        self.body.get(key).and_then(Value::as_str)
    }
}

/// Calls the batch engine needs from the simulation service.
#[async_trait]
pub trait SimulationApi: Send + Sync {
    /// `POST /authentication` with basic credentials.
    async fn authenticate(&self, credentials: &Credentials) -> Result<ApiResponse>;

    /// `GET` a path relative to the base URL, or an absolute URL.
    async fn get(&self, path: &str) -> Result<ApiResponse>;

    async fn post(&self, path: &str, body: &Value) -> Result<ApiResponse>;

    async fn patch(&self, path: &str, body: &Value) -> Result<ApiResponse>;
}

/// Shared handle to the one authenticated connection.
pub type SharedApi = Arc<dyn SimulationApi>;

/// reqwest-backed implementation; the cookie store carries the session token.
pub struct HttpSimulationApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSimulationApi {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AlphaBatchError::config_error(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<ApiResponse> {
        let response = request.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let text = response.text().await?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(ApiResponse {
            status,
            retry_after: parse_retry_after(&headers),
            location: header_string(&headers, LOCATION.as_str()),
            www_authenticate: header_string(&headers, WWW_AUTHENTICATE.as_str()),
            body,
        })
    }

    async fn call(&self, method: Method, path: &str, body: Option<&Value>) -> Result<ApiResponse> {
        let url = self.url(path);
        debug!("{} {}", method, url);
        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send(request).await
    }
}

#[async_trait]
impl SimulationApi for HttpSimulationApi {
    async fn authenticate(&self, credentials: &Credentials) -> Result<ApiResponse> {
        let request = self
            .client
            .post(self.url("/authentication"))
            .basic_auth(&credentials.email, Some(&credentials.password));
        self.send(request).await
    }

    async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.call(Method::GET, path, None).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<ApiResponse> {
        self.call(Method::POST, path, Some(body)).await
    }

    async fn patch(&self, path: &str, body: &Value) -> Result<ApiResponse> {
        self.call(Method::PATCH, path, Some(body)).await
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn parse_retry_after(headers: &HeaderMap) -> Option<f64> {
    header_string(headers, RETRY_AFTER.as_str()).and_then(|raw| raw.trim().parse::<f64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use std::time::Duration;

    #[test]
    fn relative_and_absolute_paths_resolve() {
        let config = ApiConfig::default()
            .with_base_url("https://example.test/")
            .with_request_timeout(Duration::from_secs(5));
        let api = HttpSimulationApi::new(&config).unwrap();
        assert_eq!(api.base_url(), "https://example.test");
        assert_eq!(api.url("/simulations"), "https://example.test/simulations");
        assert_eq!(api.url("alphas/A1"), "https://example.test/alphas/A1");
        assert_eq!(
            api.url("https://other.test/simulations/42"),
            "https://other.test/simulations/42"
        );
    }

    #[test]
    fn retry_after_header_is_parsed_as_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("2.5"));
        assert_eq!(parse_retry_after(&headers), Some(2.5));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn success_range_is_2xx() {
        assert!(ApiResponse::new(201, Value::Null).is_success());
        assert!(!ApiResponse::new(302, Value::Null).is_success());
        assert!(!ApiResponse::new(401, Value::Null).is_success());
    }
}
