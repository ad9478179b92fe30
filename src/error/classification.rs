//! Classification of failed API calls.
//!
//! Error responses carry a JSON payload of the form
//! `{"errors": [{"code": "...", "message": "..."}, ...]}`. The classifier turns
//! such a payload into an [`ApiError`] whose [`ErrorKind`] callers can branch on.
//! Only the first entry of the `errors` list decides the kind; the remaining
//! entries are kept in [`ApiError::details`].
//!
//! Classification never fails. Bodies that cannot be parsed degrade to the
//! `Unclassified` kind with the raw body as the message.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use super::detector::FailureDetector;
use super::kind::{ErrorKind, KindRegistry, KnownKind};
use crate::request::ResponseEnvelope;
use crate::transport::TransportError;

/// One entry of an error payload's `errors` list.
///
/// Only `code` is required. A missing or `null` message reads as empty, and
/// `details` is kept as whatever JSON the server sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    errors: Vec<ErrorDetail>,
}

/// A classified API failure.
#[derive(Debug, Clone)]
pub struct ApiError {
    kind: ErrorKind,
    code: String,
    message: String,
    raw_body: String,
    status: Option<u16>,
    details: Vec<ErrorDetail>,
    context: BTreeMap<String, String>,
}

impl ApiError {
    pub fn new(
        kind: ErrorKind,
        code: impl Into<String>,
        message: impl Into<String>,
        raw_body: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            raw_body: raw_body.into(),
            status: None,
            details: Vec::new(),
            context: BTreeMap::new(),
        }
    }

    /// Records the HTTP status of the response that produced this error.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Adds a context key-value pair to the error.
    pub fn add_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// The raw code from the payload; empty when the body was unclassified.
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The response body exactly as received.
    pub fn raw_body(&self) -> &str {
        &self.raw_body
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Every entry of the payload's `errors` list, in order.
    pub fn details(&self) -> &[ErrorDetail] {
        &self.details
    }

    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    /// Returns true if this error is transient and a retry may succeed.
    ///
    /// Unclassified bodies fall back to the HTTP status: throttling (429) and
    /// server errors (5xx) are treated as transient.
    pub fn is_retriable(&self) -> bool {
        if self.kind.is_retriable() {
            return true;
        }
        if self.kind.is(KnownKind::Unclassified) {
            return matches!(self.status, Some(429) | Some(500..=599));
        }
        false
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.code.is_empty() || self.code == self.kind.name() {
            write!(f, "{}: {}", self.kind, self.message)
        } else {
            write!(f, "{} ({}): {}", self.kind, self.code, self.message)
        }
    }
}

impl std::error::Error for ApiError {}

/// Turns failed responses into [`ApiError`]s.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    registry: Arc<KindRegistry>,
    detector: Arc<FailureDetector>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(KindRegistry::global())
    }
}

impl ErrorClassifier {
    /// Creates a classifier backed by `registry`.
    pub fn new(registry: Arc<KindRegistry>) -> Self {
        Self {
            registry,
            detector: Arc::new(FailureDetector::new()),
        }
    }

    /// Replaces the transport failure detector.
    pub fn with_detector(mut self, detector: FailureDetector) -> Self {
        self.detector = Arc::new(detector);
        self
    }

    pub fn registry(&self) -> &Arc<KindRegistry> {
        &self.registry
    }

    /// Classifies a raw error body.
    pub fn classify(&self, raw_body: &str) -> ApiError {
        let errors = match serde_json::from_str::<ErrorPayload>(raw_body) {
            Ok(payload) if !payload.errors.is_empty() => payload.errors,
            _ => return self.unclassified(raw_body),
        };

        let first = &errors[0];
        let kind = self.resolve(&first.code, &first.message);
        let mut error = ApiError::new(kind, &first.code, &first.message, raw_body);
        error.details = errors;
        error
    }

    /// Classifies a non-2xx response, keeping its status for retry decisions.
    pub fn classify_response(&self, response: &ResponseEnvelope) -> ApiError {
        self.classify(response.body()).with_status(response.status())
    }

    /// Classifies a failure that never produced a response.
    pub fn classify_transport(&self, error: &TransportError) -> ApiError {
        let known = match error {
            TransportError::Timeout(_) => KnownKind::Timeout,
            TransportError::Connect(_) => KnownKind::TransportFailure,
            TransportError::Other(text) => self.detector.classify(text),
        };
        let text = error.to_string();
        ApiError::new(self.registry.known(known), "", &text, &text)
    }

    /// Resolves a payload code to a kind.
    ///
    /// Order: exact taxonomy name, numeric convention, message-derived name
    /// for numeric codes, then a kind interned under the code itself.
    pub fn resolve(&self, code: &str, message: &str) -> ErrorKind {
        if let Some(known) = KnownKind::from_code(code) {
            return self.registry.known(known);
        }

        if is_numeric(code) {
            if let Some(known) = KnownKind::from_numeric_code(code) {
                return self.registry.known(known);
            }
            if let Some(known) = KnownKind::from_code(&camelize(message)) {
                return self.registry.known(known);
            }
        }

        if code.is_empty() {
            return self.registry.known(KnownKind::Unclassified);
        }

        self.registry.intern(code)
    }

    fn unclassified(&self, raw_body: &str) -> ApiError {
        ApiError::new(
            self.registry.known(KnownKind::Unclassified),
            "",
            raw_body,
            raw_body,
        )
    }
}

static DEFAULT_CLASSIFIER: OnceLock<ErrorClassifier> = OnceLock::new();

/// Classifies `raw_body` against the process-wide registry.
pub fn classify(raw_body: &str) -> ApiError {
    DEFAULT_CLASSIFIER
        .get_or_init(ErrorClassifier::default)
        .classify(raw_body)
}

fn is_numeric(code: &str) -> bool {
    !code.is_empty() && code.bytes().all(|b| b.is_ascii_digit())
}

/// "Invalid Input" -> "InvalidInput", "not_found" -> "NotFound".
fn camelize(message: &str) -> String {
    message
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}
