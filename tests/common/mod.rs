//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use spcall::{RequestDescriptor, ResponseEnvelope, Transport, TransportError};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

pub const INVALID_INPUT: &str =
    r#"{"errors":[{"code":"InvalidInput","message":"Invalid Input","details":""}]}"#;
pub const NOT_FOUND: &str =
    r#"{"errors":[{"code":"NotFound","message":"Resource not found","details":""}]}"#;
pub const QUOTA_EXCEEDED: &str =
    r#"{"errors":[{"code":"QuotaExceeded","message":"You exceeded your quota for the requested resource.","details":""}]}"#;
pub const UNAUTHORIZED: &str =
    r#"{"errors":[{"code":"Unauthorized","message":"Access to requested resource is denied.","details":""}]}"#;
pub const OTHER_ERROR: &str =
    r#"{"errors":[{"code":"OtherError","message":"Something went wrong","details":""}]}"#;
pub const SERVICE_UNAVAILABLE: &str =
    r#"{"errors":[{"code":"ServiceUnavailable","message":"Try again later"}]}"#;
pub const NUMERIC_INVALID_INPUT: &str = r#"{"errors":[{"code":"400","message":"Invalid Input"}]}"#;

/// A transport that answers from a script and records when each call started.
///
/// Once the script runs out, the last outcome is repeated.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<ResponseEnvelope, TransportError>>>,
    last: Mutex<Option<Result<ResponseEnvelope, TransportError>>>,
    latency: Duration,
    starts: Mutex<Vec<Instant>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<ResponseEnvelope, TransportError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            latency: Duration::ZERO,
            starts: Mutex::new(Vec::new()),
        }
    }

    /// Always answers 200 with an empty payload.
    pub fn ok() -> Self {
        Self::new(vec![Ok(ResponseEnvelope::new(200, r#"{"payload":{}}"#))])
    }

    /// Always answers `status` with `body`.
    pub fn failing(status: u16, body: &str) -> Self {
        Self::new(vec![Ok(ResponseEnvelope::new(status, body))])
    }

    /// Simulates time spent on the wire for every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.starts.lock().unwrap().len()
    }

    pub fn starts(&self) -> Vec<Instant> {
        self.starts.lock().unwrap().clone()
    }

    /// Smallest gap between consecutive call starts, in start order.
    pub fn min_gap(&self) -> Option<Duration> {
        let mut starts = self.starts();
        starts.sort();
        starts.windows(2).map(|pair| pair[1] - pair[0]).min()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn issue(&self, _: &RequestDescriptor) -> Result<ResponseEnvelope, TransportError> {
        self.starts.lock().unwrap().push(Instant::now());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(outcome) => {
                *last = Some(outcome.clone());
                outcome
            }
            None => last
                .clone()
                .unwrap_or_else(|| Err(TransportError::Other("empty script".into()))),
        }
    }
}
