//! Deadlines and cancellation for in-flight calls.
//!
//! Every wait in this crate (meter gate, retry backoff, the transport call
//! itself) goes through a [`CallContext`], so a caller-supplied deadline or
//! cancellation signal bounds the whole operation, including a chain of
//! backoffs.

use std::future::{pending, Future};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

/// Why a wait was cut short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
    #[error("operation deadline exceeded")]
    DeadlineExceeded,
    #[error("operation cancelled")]
    Cancelled,
}

/// A cancellation signal shared between a caller and its in-flight calls.
///
/// Clones share state; cancelling any clone cancels them all.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Cancels every wait observing this handle.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

/// Deadline and cancellation scope for one logical operation.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: Option<CancelHandle>,
}

impl CallContext {
    /// A context with no deadline and no cancellation.
    pub fn none() -> Self {
        Self::default()
    }

    /// Sets an absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets a deadline `timeout` from now.
    ///
    /// A timeout too large to represent as an instant leaves the context
    /// unchanged.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// Attaches a cancellation handle.
    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Returns a copy whose deadline is at most `timeout` from now.
    pub fn tightened(&self, timeout: Duration) -> Self {
        let deadline = match (self.deadline, Instant::now().checked_add(timeout)) {
            (Some(existing), Some(candidate)) => Some(existing.min(candidate)),
            (existing, None) => existing,
            (None, candidate) => candidate,
        };
        Self {
            deadline,
            cancel: self.cancel.clone(),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Fails if the context is already cancelled or past its deadline.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.cancel.as_ref().is_some_and(CancelHandle::is_cancelled) {
            return Err(Interrupted::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Interrupted::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Sleeps for `duration` unless interrupted.
    ///
    /// A duration past the representable clock range never wakes: it fails
    /// at once under a deadline and otherwise waits for cancellation.
    pub async fn suspend(&self, duration: Duration) -> Result<(), Interrupted> {
        match Instant::now().checked_add(duration) {
            Some(wake) => self.suspend_until(wake).await,
            None => {
                self.check()?;
                if self.deadline.is_some() {
                    return Err(Interrupted::DeadlineExceeded);
                }
                self.run(pending::<()>()).await
            }
        }
    }

    /// Sleeps until `wake` unless interrupted.
    ///
    /// A wake time past the deadline fails immediately instead of sleeping
    /// up to the deadline first.
    pub async fn suspend_until(&self, wake: Instant) -> Result<(), Interrupted> {
        self.check()?;
        if let Some(deadline) = self.deadline {
            if wake > deadline {
                return Err(Interrupted::DeadlineExceeded);
            }
        }
        if wake <= Instant::now() {
            return Ok(());
        }
        self.run(sleep_until(wake)).await
    }

    /// Drives `future` to completion unless the deadline passes or the
    /// context is cancelled first.
    pub async fn run<F: Future>(&self, future: F) -> Result<F::Output, Interrupted> {
        self.check()?;

        let deadline = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };
        let cancelled = async {
            match &self.cancel {
                Some(cancel) => cancel.cancelled().await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            output = future => Ok(output),
            _ = deadline => Err(Interrupted::DeadlineExceeded),
            _ = cancelled => Err(Interrupted::Cancelled),
        }
    }
}
