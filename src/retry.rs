//! Retry with backoff.
//!
//! [`Retriable`] wraps an invoker and re-issues a failed call while the failure
//! is classified as transient and attempts remain. The wait before attempt
//! `n + 1` is `delay(n)`, where `delay` is any nondecreasing [`DelayFn`].

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::invoker::{InvokeError, InvokeResult, Invoker};
use crate::request::RequestDescriptor;
use crate::timeout::CallContext;

/// Maps a 1-based attempt number to the wait before the next attempt.
#[derive(Clone)]
pub struct DelayFn(Arc<dyn Fn(u32) -> Duration + Send + Sync>);

impl DelayFn {
    /// Wraps an arbitrary delay function.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// `step * attempt`.
    pub fn linear(step: Duration) -> Self {
        Self::from_fn(move |attempt| step.saturating_mul(attempt))
    }

    /// The same wait after every attempt.
    pub fn constant(delay: Duration) -> Self {
        Self::from_fn(move |_| delay)
    }

    /// `base * 2^(attempt - 1)`, capped at `max`.
    pub fn exponential(base: Duration, max: Duration) -> Self {
        Self::from_fn(move |attempt| {
            let exponent = attempt.saturating_sub(1).min(31);
            base.saturating_mul(1u32 << exponent).min(max)
        })
    }

    /// No wait between attempts.
    pub fn none() -> Self {
        Self::constant(Duration::ZERO)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        (self.0)(attempt)
    }
}

impl fmt::Debug for DelayFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DelayFn").field(&self.delay_for(1)).finish()
    }
}

/// When and how long to retry.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    delay: DelayFn,
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DelayFn::linear(Duration::from_secs(1)), 3)
    }
}

impl RetryPolicy {
    /// Creates a policy allowing `max_attempts` calls in total (at least one).
    pub fn new(delay: DelayFn, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> &DelayFn {
        &self.delay
    }

    /// The wait after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.delay.delay_for(attempt)
    }

    /// Whether a failure on attempt `attempt` (1-based) should be retried.
    ///
    /// Only transient errors are retried; client errors such as invalid
    /// input, missing resources and denied access fail immediately.
    pub fn should_retry(&self, attempt: u32, error: &ApiError) -> bool {
        error.is_retriable() && attempt < self.max_attempts
    }

    /// Total backoff spent when every attempt fails transiently.
    pub fn total_backoff(&self) -> Duration {
        (1..self.max_attempts)
            .map(|attempt| self.delay_for(attempt))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

/// Retrying decorator.
pub struct Retriable<I> {
    inner: I,
    policy: RetryPolicy,
}

impl<I: Invoker> Retriable<I> {
    pub fn new(inner: I, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Shorthand for `Retriable::new(inner, RetryPolicy::new(delay, max_attempts))`.
    pub fn with_delay(inner: I, delay: DelayFn, max_attempts: u32) -> Self {
        Self::new(inner, RetryPolicy::new(delay, max_attempts))
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn inner(&self) -> &I {
        &self.inner
    }
}

#[async_trait]
impl<I: Invoker> Invoker for Retriable<I> {
    async fn execute_with(&self, request: &RequestDescriptor, ctx: &CallContext) -> InvokeResult {
        let mut attempt = 1;
        let mut last_error = None;
        loop {
            match self.inner.execute_with(request, ctx).await {
                Ok(response) => return Ok(response),
                Err(InvokeError::Api(error)) if self.policy.should_retry(attempt, &error) => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts(),
                        kind = %error.kind(),
                        delay_ms = delay.as_millis() as u64,
                        path = request.path(),
                        "retrying request"
                    );
                    if let Err(interrupted) = ctx.suspend(delay).await {
                        return Err(InvokeError::from(interrupted).with_last(error));
                    }
                    last_error = Some(error);
                    attempt += 1;
                }
                Err(error) => {
                    let error = match last_error.take() {
                        Some(last) => error.with_last(last),
                        None => error,
                    };
                    debug!(attempt, error = %error, "giving up on request");
                    return Err(error);
                }
            }
        }
    }
}
