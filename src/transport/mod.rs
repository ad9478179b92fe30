//! Transport seam.
//!
//! The core never does networking itself. It issues [`RequestDescriptor`]s
//! through a [`Transport`] and gets back a [`ResponseEnvelope`] or a
//! [`TransportError`] when no response arrived at all. [`HttpTransport`] is
//! the reqwest-backed implementation.

pub mod http;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::error::ErrorClassifier;
use crate::invoker::{InvokeError, InvokeResult, Invoker};
use crate::request::{RequestDescriptor, ResponseEnvelope};
use crate::timeout::CallContext;

pub use http::HttpTransport;

/// A failure that produced no HTTP response.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Could not connect to the remote host.
    #[error("connection failed: {0}")]
    Connect(String),
    /// The request timed out.
    #[error("request timed out: {0}")]
    Timeout(String),
    /// Any other transport failure.
    #[error("transport error: {0}")]
    Other(String),
}

/// Issues one request and returns whatever the server answered.
///
/// Non-2xx responses are returned as `Ok`; only failures without a response
/// are errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn issue(&self, request: &RequestDescriptor) -> Result<ResponseEnvelope, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn issue(&self, request: &RequestDescriptor) -> Result<ResponseEnvelope, TransportError> {
        (**self).issue(request).await
    }
}

/// The innermost invoker: issues the request and classifies failures.
pub struct TransportInvoker<T> {
    transport: T,
    classifier: ErrorClassifier,
}

impl<T: Transport> TransportInvoker<T> {
    /// Creates an invoker classifying against the process-wide registry.
    pub fn new(transport: T) -> Self {
        Self::with_classifier(transport, ErrorClassifier::default())
    }

    pub fn with_classifier(transport: T, classifier: ErrorClassifier) -> Self {
        Self {
            transport,
            classifier,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }
}

#[async_trait]
impl<T: Transport> Invoker for TransportInvoker<T> {
    async fn execute_with(&self, request: &RequestDescriptor, ctx: &CallContext) -> InvokeResult {
        let outcome = ctx.run(self.transport.issue(request)).await?;

        match outcome {
            Ok(response) if response.is_success() => Ok(response),
            Ok(response) => {
                let error = self
                    .classifier
                    .classify_response(&response)
                    .add_context("method", request.method().as_str())
                    .add_context("path", request.path());
                debug!(
                    status = response.status(),
                    kind = %error.kind(),
                    path = request.path(),
                    "request failed"
                );
                Err(InvokeError::Api(error))
            }
            Err(transport_error) => {
                let error = self
                    .classifier
                    .classify_transport(&transport_error)
                    .add_context("method", request.method().as_str())
                    .add_context("path", request.path());
                debug!(kind = %error.kind(), path = request.path(), "transport failure");
                Err(InvokeError::Api(error))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{KindRegistry, KnownKind};
    use std::sync::Mutex;

    struct Fixed(Mutex<Option<Result<ResponseEnvelope, TransportError>>>);

    #[async_trait]
    impl Transport for Fixed {
        async fn issue(&self, _: &RequestDescriptor) -> Result<ResponseEnvelope, TransportError> {
            self.0.lock().unwrap().take().expect("issued more than once")
        }
    }

    fn invoker(outcome: Result<ResponseEnvelope, TransportError>) -> TransportInvoker<Fixed> {
        TransportInvoker::with_classifier(
            Fixed(Mutex::new(Some(outcome))),
            ErrorClassifier::new(Arc::new(KindRegistry::new())),
        )
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let invoker = invoker(Ok(ResponseEnvelope::new(200, r#"{"payload":{}}"#)));
        let response = invoker.execute(&RequestDescriptor::get("/x")).await.unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_error_status_is_classified() {
        let body = r#"{"errors":[{"code":"NotFound","message":"nope"}]}"#;
        let invoker = invoker(Ok(ResponseEnvelope::new(404, body)));

        let error = invoker
            .execute(&RequestDescriptor::get("/orders/1"))
            .await
            .unwrap_err();
        let api = error.api().unwrap();

        assert!(api.kind().is(KnownKind::NotFound));
        assert_eq!(api.status(), Some(404));
        assert_eq!(api.context().get("path"), Some(&"/orders/1".to_string()));
    }

    #[tokio::test]
    async fn test_transport_failure_is_classified() {
        let invoker = invoker(Err(TransportError::Connect("refused".into())));
        let error = invoker.execute(&RequestDescriptor::get("/x")).await.unwrap_err();
        assert!(error.api().unwrap().kind().is(KnownKind::TransportFailure));
    }
}
