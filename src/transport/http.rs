//! reqwest-backed [`Transport`].

use async_trait::async_trait;
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::Duration;

use super::{Transport, TransportError};
use crate::request::{Method, RequestDescriptor, ResponseEnvelope};

/// Issues requests against a base URL with reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    /// HTTP client for API requests
    client: Client,
    /// Scheme and host, without a trailing slash
    base_url: String,
    /// Headers sent with every request (e.g. an access token)
    default_headers: BTreeMap<String, String>,
}

impl HttpTransport {
    /// Creates a transport for `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        Self::with_timeout(base_url, None)
    }

    /// Creates a transport whose individual requests time out after `timeout`.
    pub fn with_timeout(
        base_url: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Wraps an existing reqwest client.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_headers: BTreeMap::new(),
        }
    }

    /// Adds a header sent with every request.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Joins the base URL and a request path.
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

fn reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn transport_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(error.to_string())
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else {
        TransportError::Other(error.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn issue(&self, request: &RequestDescriptor) -> Result<ResponseEnvelope, TransportError> {
        let mut builder = self
            .client
            .request(reqwest_method(request.method()), self.url_for(request.path()));

        let query = request.query_pairs();
        if !query.is_empty() {
            builder = builder.query(&query);
        }
        for (name, value) in self.default_headers.iter().chain(request.headers()) {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(transport_error)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.text().await.map_err(transport_error)?;

        Ok(ResponseEnvelope::new(status, body).with_headers(headers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_for_joins_paths() {
        let transport = HttpTransport::new("https://sellingpartnerapi-eu.amazon.com/").unwrap();
        assert_eq!(
            transport.url_for("/fba/inventory/v1/summaries"),
            "https://sellingpartnerapi-eu.amazon.com/fba/inventory/v1/summaries"
        );
        assert_eq!(
            transport.url_for("orders/v0/orders"),
            "https://sellingpartnerapi-eu.amazon.com/orders/v0/orders"
        );
    }

    #[test]
    fn test_absolute_urls_are_kept() {
        let transport = HttpTransport::new("https://example.com").unwrap();
        assert_eq!(
            transport.url_for("https://tortuga.s3.amazonaws.com/doc"),
            "https://tortuga.s3.amazonaws.com/doc"
        );
    }

    #[test]
    fn test_method_mapping() {
        assert_eq!(reqwest_method(Method::Patch), reqwest::Method::PATCH);
        assert_eq!(reqwest_method(Method::Delete), reqwest::Method::DELETE);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let transport = HttpTransport::with_timeout("http://127.0.0.1:9", Some(Duration::from_secs(2)))
            .unwrap();
        let result = transport.issue(&RequestDescriptor::get("/")).await;
        assert!(result.is_err());
    }
}
