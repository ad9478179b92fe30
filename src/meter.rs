//! Rate metering.
//!
//! A [`Meter`] admits calls through to its inner invoker no faster than a
//! configured rate. Each meter owns its own gate; two meters never throttle
//! each other, so every endpoint gets its own meter with its own rate.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::invoker::{InvokeResult, Invoker};
use crate::request::RequestDescriptor;
use crate::timeout::{CallContext, Interrupted};

/// A rate that cannot be turned into an interval.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("rate must be a positive, finite number of requests per second, got {0}")]
pub struct InvalidRate(pub f64);

/// Converts requests per second into the minimum spacing between call starts.
pub fn interval_for_rate(rate_per_second: f64) -> Result<Duration, InvalidRate> {
    if !rate_per_second.is_finite() || rate_per_second <= 0.0 {
        return Err(InvalidRate(rate_per_second));
    }
    Duration::try_from_secs_f64(1.0 / rate_per_second).map_err(|_| InvalidRate(rate_per_second))
}

/// Rate-limiting decorator.
///
/// The gate holds the start time of the last admitted call. A caller locks
/// the gate, waits until one interval after that start, records its own
/// start, and only then releases the lock. Concurrent callers therefore queue
/// on the lock and are admitted one interval apart.
pub struct Meter<I> {
    inner: I,
    interval: Duration,
    last_start: Mutex<Option<Instant>>,
}

impl<I: Invoker> Meter<I> {
    /// Wraps `inner`, admitting at most `rate_per_second` calls per second.
    pub fn new(inner: I, rate_per_second: f64) -> Result<Self, InvalidRate> {
        Ok(Self::with_interval(inner, interval_for_rate(rate_per_second)?))
    }

    /// Wraps `inner`, spacing call starts at least `interval` apart.
    pub fn with_interval(inner: I, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            last_start: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn inner(&self) -> &I {
        &self.inner
    }

    /// Waits for this caller's turn and records its start time.
    async fn admit(&self, ctx: &CallContext) -> Result<(), Interrupted> {
        let mut last_start = ctx.run(self.last_start.lock()).await?;

        if let Some(previous) = *last_start {
            match previous.checked_add(self.interval) {
                Some(earliest) => {
                    let now = Instant::now();
                    if earliest > now {
                        debug!(
                            wait_ms = (earliest - now).as_millis() as u64,
                            "meter holding request"
                        );
                        ctx.suspend_until(earliest).await?;
                    }
                }
                // Next slot lies beyond the clock's range.
                None => ctx.suspend(Duration::MAX).await?,
            }
        }

        *last_start = Some(Instant::now());
        Ok(())
    }
}

#[async_trait]
impl<I: Invoker> Invoker for Meter<I> {
    async fn execute_with(&self, request: &RequestDescriptor, ctx: &CallContext) -> InvokeResult {
        self.admit(ctx).await?;
        self.inner.execute_with(request, ctx).await
    }
}
