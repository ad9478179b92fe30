//! spcall - resilient request core for REST API wrappers
//!
//! Endpoint glue builds a [`RequestDescriptor`] and runs it through an
//! [`Invoker`]. The base invoker issues the request over a [`Transport`] and
//! classifies failures into [`ApiError`]s; a [`Meter`] spaces calls to a
//! configured rate; a [`Retriable`] re-issues transient failures with
//! backoff. Every wait honours the [`CallContext`] deadline and cancellation.

pub mod client;
pub mod config;
pub mod error;
pub mod invoker;
pub mod logging;
pub mod meter;
pub mod request;
pub mod retry;
pub mod timeout;
pub mod transport;

pub use client::{ApiClient, OperationInvoker};
pub use config::{PolicyConfig, PolicyConfigError};
pub use error::{classify, ApiError, ErrorClassifier, ErrorKind, KindRegistry, KnownKind};
pub use invoker::{InvokeError, InvokeResult, Invoker};
pub use meter::{InvalidRate, Meter};
pub use request::{Method, QueryValue, RequestDescriptor, ResponseEnvelope};
pub use retry::{DelayFn, Retriable, RetryPolicy};
pub use timeout::{CallContext, CancelHandle, Interrupted};
pub use transport::{HttpTransport, Transport, TransportError, TransportInvoker};
