//! The invoker abstraction shared by every decorator.
//!
//! An [`Invoker`] executes a [`RequestDescriptor`] and yields either a
//! successful [`ResponseEnvelope`] or an [`InvokeError`]. The transport-backed
//! base invoker, the [`Meter`](crate::meter::Meter) and the
//! [`Retriable`](crate::retry::Retriable) decorator all implement it, so they
//! compose by wrapping one another.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::error::{ApiError, ErrorKind};
use crate::request::{RequestDescriptor, ResponseEnvelope};
use crate::timeout::{CallContext, Interrupted};

/// Why an invocation failed.
#[derive(Debug, Clone, Error)]
pub enum InvokeError {
    /// The call failed and was classified.
    #[error(transparent)]
    Api(#[from] ApiError),
    /// The caller's deadline passed before the call could complete.
    ///
    /// `last` holds the most recent classified failure when the deadline cut
    /// a retry chain short.
    #[error("operation deadline exceeded")]
    DeadlineExceeded { last: Option<ApiError> },
    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl InvokeError {
    /// The classified error, if the call got far enough to produce one.
    pub fn api(&self) -> Option<&ApiError> {
        match self {
            InvokeError::Api(error) => Some(error),
            InvokeError::DeadlineExceeded { last } => last.as_ref(),
            InvokeError::Cancelled => None,
        }
    }

    /// Records `error` as the failure a deadline interrupted, unless one is
    /// already recorded.
    pub fn with_last(self, error: ApiError) -> Self {
        match self {
            InvokeError::DeadlineExceeded { last: None } => {
                InvokeError::DeadlineExceeded { last: Some(error) }
            }
            other => other,
        }
    }

    pub fn kind(&self) -> Option<&ErrorKind> {
        self.api().map(ApiError::kind)
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, InvokeError::DeadlineExceeded { .. } | InvokeError::Cancelled)
    }
}

impl From<Interrupted> for InvokeError {
    fn from(interrupted: Interrupted) -> Self {
        match interrupted {
            Interrupted::DeadlineExceeded => InvokeError::DeadlineExceeded { last: None },
            Interrupted::Cancelled => InvokeError::Cancelled,
        }
    }
}

pub type InvokeResult = Result<ResponseEnvelope, InvokeError>;

/// Executes requests.
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Executes `request` within the deadline and cancellation scope of `ctx`.
    async fn execute_with(&self, request: &RequestDescriptor, ctx: &CallContext) -> InvokeResult;

    /// Executes `request` with no deadline.
    async fn execute(&self, request: &RequestDescriptor) -> InvokeResult {
        self.execute_with(request, &CallContext::none()).await
    }
}

#[async_trait]
impl<I: Invoker + ?Sized> Invoker for Arc<I> {
    async fn execute_with(&self, request: &RequestDescriptor, ctx: &CallContext) -> InvokeResult {
        (**self).execute_with(request, ctx).await
    }
}

#[async_trait]
impl<I: Invoker + ?Sized> Invoker for Box<I> {
    async fn execute_with(&self, request: &RequestDescriptor, ctx: &CallContext) -> InvokeResult {
        (**self).execute_with(request, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok, block_on};

    struct Status(u16);

    #[async_trait]
    impl Invoker for Status {
        async fn execute_with(&self, _: &RequestDescriptor, ctx: &CallContext) -> InvokeResult {
            ctx.check()?;
            Ok(ResponseEnvelope::new(self.0, ""))
        }
    }

    #[test]
    fn test_boxed_and_shared_invokers_forward() {
        let boxed: Box<dyn Invoker> = Box::new(Status(204));
        let shared: Arc<dyn Invoker> = Arc::new(Status(202));
        let request = RequestDescriptor::get("/");

        assert_eq!(assert_ok!(block_on(boxed.execute(&request))).status(), 204);
        assert_eq!(assert_ok!(block_on(shared.execute(&request))).status(), 202);
    }

    #[test]
    fn test_cancelled_context_short_circuits() {
        let cancel = crate::timeout::CancelHandle::new();
        cancel.cancel();
        let ctx = CallContext::none().with_cancel(cancel);

        let error = assert_err!(block_on(
            Status(200).execute_with(&RequestDescriptor::get("/"), &ctx)
        ));
        assert!(matches!(error, InvokeError::Cancelled));
    }

    #[test]
    fn test_interrupted_conversion() {
        assert!(matches!(
            InvokeError::from(Interrupted::DeadlineExceeded),
            InvokeError::DeadlineExceeded { last: None }
        ));
        assert!(matches!(
            InvokeError::from(Interrupted::Cancelled),
            InvokeError::Cancelled
        ));
        assert!(InvokeError::Cancelled.is_interrupted());
        assert!(InvokeError::Cancelled.api().is_none());
        assert!(InvokeError::Cancelled.kind().is_none());
    }

    #[test]
    fn test_deadline_keeps_first_recorded_failure() {
        let classifier = crate::error::ErrorClassifier::new(Arc::new(crate::error::KindRegistry::new()));
        let quota = classifier.classify(r#"{"errors":[{"code":"QuotaExceeded","message":"slow"}]}"#);
        let missing = classifier.classify(r#"{"errors":[{"code":"NotFound","message":"gone"}]}"#);

        let error = InvokeError::from(Interrupted::DeadlineExceeded)
            .with_last(quota)
            .with_last(missing.clone());

        assert!(error.is_interrupted());
        assert_eq!(error.kind().unwrap().name(), "QuotaExceeded");
        assert!(InvokeError::Cancelled.with_last(missing).api().is_none());
    }
}
