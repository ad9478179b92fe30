//! Client wiring.
//!
//! [`ApiClient`] owns a transport and a [`PolicyConfig`] and hands out
//! invokers for endpoint glue code. Ad-hoc decorators come from
//! [`ApiClient::meter`] and [`ApiClient::retriable`]; configured ones from
//! [`ApiClient::operation`], which caches one invoker per operation so that
//! every call to the same operation shares a single meter.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

use crate::config::{PolicyConfig, PolicyConfigError};
use crate::error::ErrorClassifier;
use crate::invoker::{InvokeResult, Invoker};
use crate::meter::{InvalidRate, Meter};
use crate::request::RequestDescriptor;
use crate::retry::{DelayFn, Retriable};
use crate::timeout::CallContext;
use crate::transport::{Transport, TransportInvoker};

/// Shared handle to the transport-backed base invoker.
pub type BaseInvoker<T> = Arc<TransportInvoker<T>>;

/// An operation's invoker, built from its configured policy.
pub struct OperationInvoker {
    name: String,
    inner: Box<dyn Invoker>,
    timeout: Option<Duration>,
}

impl OperationInvoker {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[async_trait]
impl Invoker for OperationInvoker {
    async fn execute_with(&self, request: &RequestDescriptor, ctx: &CallContext) -> InvokeResult {
        match self.timeout {
            Some(timeout) => self.inner.execute_with(request, &ctx.tightened(timeout)).await,
            None => self.inner.execute_with(request, ctx).await,
        }
    }
}

/// Entry point for endpoint glue code.
pub struct ApiClient<T> {
    base: BaseInvoker<T>,
    policies: PolicyConfig,
    operations: Mutex<HashMap<String, Arc<OperationInvoker>>>,
}

impl<T: Transport + 'static> ApiClient<T> {
    /// Creates a client with no configured policies.
    pub fn new(transport: T) -> Self {
        Self::with_classifier(transport, ErrorClassifier::default())
    }

    pub fn with_classifier(transport: T, classifier: ErrorClassifier) -> Self {
        Self {
            base: Arc::new(TransportInvoker::with_classifier(transport, classifier)),
            policies: PolicyConfig::default(),
            operations: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the policy configuration and drops cached operation invokers.
    pub fn with_policies(mut self, policies: PolicyConfig) -> Self {
        self.policies = policies;
        self.operations = Mutex::new(HashMap::new());
        self
    }

    pub fn policies(&self) -> &PolicyConfig {
        &self.policies
    }

    /// The undecorated invoker: one attempt, no metering.
    pub fn invoker(&self) -> BaseInvoker<T> {
        Arc::clone(&self.base)
    }

    /// A new meter admitting `rate_per_second` calls per second.
    ///
    /// Each call returns an independent meter; keep it around to share one
    /// rate across calls.
    pub fn meter(&self, rate_per_second: f64) -> Result<Meter<BaseInvoker<T>>, InvalidRate> {
        Meter::new(self.invoker(), rate_per_second)
    }

    /// A retrying invoker making at most `max_attempts` attempts.
    pub fn retriable(&self, delay: DelayFn, max_attempts: u32) -> Retriable<BaseInvoker<T>> {
        Retriable::with_delay(self.invoker(), delay, max_attempts)
    }

    /// The invoker for a configured operation, built on first use.
    ///
    /// A metered and retried operation retries around its meter, so every
    /// attempt passes the rate gate.
    pub fn operation(&self, name: &str) -> Result<Arc<OperationInvoker>, PolicyConfigError> {
        let mut operations = self
            .operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = operations.get(name) {
            return Ok(Arc::clone(existing));
        }

        let invoker = Arc::new(self.build_operation(name)?);
        operations.insert(name.to_string(), Arc::clone(&invoker));
        Ok(invoker)
    }

    fn build_operation(&self, name: &str) -> Result<OperationInvoker, PolicyConfigError> {
        let resolved = self.policies.resolve(name);
        let invalid = |e: InvalidRate| PolicyConfigError::Invalid {
            scope: name.to_string(),
            reason: e.to_string(),
        };

        let inner: Box<dyn Invoker> = match (resolved.rate, resolved.retry) {
            (Some(rate), Some(retry)) => Box::new(Retriable::new(
                Meter::new(self.invoker(), rate).map_err(invalid)?,
                retry,
            )),
            (Some(rate), None) => Box::new(Meter::new(self.invoker(), rate).map_err(invalid)?),
            (None, Some(retry)) => Box::new(Retriable::new(self.invoker(), retry)),
            (None, None) => Box::new(self.invoker()),
        };

        debug!(
            operation = name,
            rate = ?resolved.rate,
            timeout_ms = ?resolved.timeout.map(|t| t.as_millis() as u64),
            "built operation invoker"
        );

        Ok(OperationInvoker {
            name: name.to_string(),
            inner,
            timeout: resolved.timeout,
        })
    }
}
