//! Error classification module
//!
//! This module turns failed API calls into classified errors. Each error
//! carries an interned [`ErrorKind`] drawn from a fixed taxonomy or discovered
//! at runtime from an unrecognized error code, so callers can branch on it.

pub mod classification;
pub mod detector;
pub mod kind;

// Re-export main types for convenient access
pub use classification::{classify, ApiError, ErrorClassifier, ErrorDetail};
pub use detector::{FailureDetector, FailurePattern};
pub use kind::{ErrorKind, KindCategory, KindRegistry, KnownKind};
