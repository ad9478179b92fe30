//! Request descriptors and response envelopes.
//!
//! A [`RequestDescriptor`] is everything the transport needs to issue one call.
//! It is built once through [`RequestBuilder`] and never mutated afterwards, so
//! the same descriptor can be replayed on every retry attempt.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Returns the upper-case wire name of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            other => Err(format!("unsupported HTTP method: {}", other)),
        }
    }
}

/// A query parameter value: a single scalar or a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    Scalar(String),
    List(Vec<String>),
}

impl QueryValue {
    /// Returns true when the value carries nothing worth sending.
    pub fn is_empty(&self) -> bool {
        match self {
            QueryValue::Scalar(s) => s.is_empty(),
            QueryValue::List(items) => items.iter().all(|item| item.is_empty()),
        }
    }

    /// Renders the value for the query string. Lists are comma-joined.
    pub fn render(&self) -> String {
        match self {
            QueryValue::Scalar(s) => s.clone(),
            QueryValue::List(items) => items
                .iter()
                .filter(|item| !item.is_empty())
                .cloned()
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        QueryValue::Scalar(value.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        QueryValue::Scalar(value)
    }
}

impl From<bool> for QueryValue {
    fn from(value: bool) -> Self {
        QueryValue::Scalar(value.to_string())
    }
}

impl From<i64> for QueryValue {
    fn from(value: i64) -> Self {
        QueryValue::Scalar(value.to_string())
    }
}

impl From<u32> for QueryValue {
    fn from(value: u32) -> Self {
        QueryValue::Scalar(value.to_string())
    }
}

impl From<Vec<String>> for QueryValue {
    fn from(value: Vec<String>) -> Self {
        QueryValue::List(value)
    }
}

impl From<Vec<&str>> for QueryValue {
    fn from(value: Vec<&str>) -> Self {
        QueryValue::List(value.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for QueryValue {
    fn from(value: [&str; N]) -> Self {
        QueryValue::List(value.iter().map(|s| s.to_string()).collect())
    }
}

/// An immutable description of one API call.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    method: Method,
    path: String,
    query: BTreeMap<String, QueryValue>,
    body: Option<Value>,
    headers: BTreeMap<String, String>,
}

impl RequestDescriptor {
    /// Starts building a request for `method` on `path`.
    pub fn builder(method: Method, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder {
            method,
            path: path.into(),
            query: BTreeMap::new(),
            body: None,
            headers: BTreeMap::new(),
        }
    }

    /// Shorthand for a bodiless GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::builder(Method::Get, path).build()
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &BTreeMap<String, QueryValue> {
        &self.query
    }

    /// Query parameters rendered as name/value pairs, ready for the wire.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.query
            .iter()
            .map(|(name, value)| (name.clone(), value.render()))
            .collect()
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }
}

/// Builder for [`RequestDescriptor`].
///
/// Query entries with an absent or empty value are dropped, mirroring how the
/// endpoint wrappers compact their optional parameters.
#[derive(Debug)]
pub struct RequestBuilder {
    method: Method,
    path: String,
    query: BTreeMap<String, QueryValue>,
    body: Option<Value>,
    headers: BTreeMap<String, String>,
}

impl RequestBuilder {
    /// Adds a query parameter. Empty values are omitted.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.query.insert(name.into(), value);
        }
        self
    }

    /// Adds an optional query parameter. `None` and empty values are omitted.
    pub fn query_opt<V: Into<QueryValue>>(self, name: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.query(name, value),
            None => self,
        }
    }

    /// Sets the JSON body.
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Adds a request header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn build(self) -> RequestDescriptor {
        RequestDescriptor {
            method: self.method,
            path: self.path,
            query: self.query,
            body: self.body,
            headers: self.headers,
        }
    }
}

/// The response to one transport call.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    status: u16,
    body: String,
    headers: BTreeMap<String, String>,
    parsed: OnceLock<Option<Value>>,
}

impl ResponseEnvelope {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            headers: BTreeMap::new(),
            parsed: OnceLock::new(),
        }
    }

    /// Attaches response headers. Header names are stored lower-cased.
    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Looks up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The body parsed as JSON, or `None` if it is not valid JSON.
    ///
    /// Parsing happens at most once per envelope.
    pub fn json(&self) -> Option<&Value> {
        self.parsed
            .get_or_init(|| serde_json::from_str(&self.body).ok())
            .as_ref()
    }

    /// Deserializes the body into `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_round_trips_through_str() {
        for method in [
            Method::Get,
            Method::Post,
            Method::Put,
            Method::Patch,
            Method::Delete,
        ] {
            assert_eq!(method.as_str().parse::<Method>().unwrap(), method);
        }
        assert_eq!("get".parse::<Method>().unwrap(), Method::Get);
        assert!("TRACE".parse::<Method>().is_err());
    }

    #[test]
    fn test_builder_omits_absent_and_empty_query_values() {
        let request = RequestDescriptor::builder(Method::Get, "/fba/inventory/v1/summaries")
            .query("granularityType", "Marketplace")
            .query_opt("nextToken", None::<String>)
            .query("startDateTime", "")
            .query("sellerSkus", Vec::<String>::new())
            .query_opt("details", Some(true))
            .build();

        let names: Vec<&str> = request.query().keys().map(String::as_str).collect();
        assert_eq!(names, vec!["details", "granularityType"]);
    }

    #[test]
    fn test_list_query_values_are_comma_joined() {
        let request = RequestDescriptor::builder(Method::Get, "/orders")
            .query("marketplaceIds", ["A1F83G8C2ARO7P", "ATVPDKIKX0DER"])
            .build();

        assert_eq!(
            request.query_pairs(),
            vec![(
                "marketplaceIds".to_string(),
                "A1F83G8C2ARO7P,ATVPDKIKX0DER".to_string()
            )]
        );
    }

    #[test]
    fn test_builder_sets_body_and_headers() {
        let request = RequestDescriptor::builder(Method::Post, "/feeds/2021-06-30/documents")
            .body(json!({"contentType": "application/json"}))
            .header("x-amzn-idempotency-token", "abc")
            .build();

        assert_eq!(request.method(), Method::Post);
        assert_eq!(request.body(), Some(&json!({"contentType": "application/json"})));
        assert_eq!(
            request.headers().get("x-amzn-idempotency-token"),
            Some(&"abc".to_string())
        );
    }

    #[test]
    fn test_response_success_range() {
        assert!(ResponseEnvelope::new(200, "").is_success());
        assert!(ResponseEnvelope::new(202, "").is_success());
        assert!(!ResponseEnvelope::new(199, "").is_success());
        assert!(!ResponseEnvelope::new(429, "").is_success());
    }

    #[test]
    fn test_response_json_is_lazy_and_tolerant() {
        let ok = ResponseEnvelope::new(200, r#"{"payload": 1}"#);
        assert_eq!(ok.json(), Some(&json!({"payload": 1})));

        let broken = ResponseEnvelope::new(500, "<html>oops</html>");
        assert!(broken.json().is_none());
    }

    #[test]
    fn test_response_header_lookup_is_case_insensitive() {
        let mut headers = BTreeMap::new();
        headers.insert("X-Amzn-RateLimit-Limit".to_string(), "2.0".to_string());
        let response = ResponseEnvelope::new(200, "{}").with_headers(headers);

        assert_eq!(response.header("x-amzn-ratelimit-limit"), Some("2.0"));
    }
}
