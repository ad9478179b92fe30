//! Error kinds and the kind registry.
//!
//! Every classified error carries an [`ErrorKind`]. Kinds from the fixed
//! taxonomy ([`KnownKind`]) and kinds discovered at runtime from unrecognized
//! error codes live in the same append-only [`KindRegistry`]. The registry
//! hands out the same `ErrorKind` handle for a given code for as long as it
//! lives, so kinds can be compared by identity.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use tracing::info;

/// The fixed, compiled-in error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownKind {
    /// The request was malformed or failed validation.
    InvalidInput,
    /// The requested resource does not exist.
    NotFound,
    /// The caller exceeded its request quota or rate.
    QuotaExceeded,
    /// Access to the requested resource was denied.
    Unauthorized,
    /// The server failed while handling the request.
    InternalFailure,
    /// The service is temporarily unavailable.
    ServiceUnavailable,
    /// The error body could not be parsed.
    Unclassified,
    /// The call never produced a response (connection or protocol failure).
    TransportFailure,
    /// The call timed out before a response arrived.
    Timeout,
}

impl KnownKind {
    pub const ALL: [KnownKind; 9] = [
        KnownKind::InvalidInput,
        KnownKind::NotFound,
        KnownKind::QuotaExceeded,
        KnownKind::Unauthorized,
        KnownKind::InternalFailure,
        KnownKind::ServiceUnavailable,
        KnownKind::Unclassified,
        KnownKind::TransportFailure,
        KnownKind::Timeout,
    ];

    /// The code string this kind is registered under.
    pub fn name(&self) -> &'static str {
        match self {
            KnownKind::InvalidInput => "InvalidInput",
            KnownKind::NotFound => "NotFound",
            KnownKind::QuotaExceeded => "QuotaExceeded",
            KnownKind::Unauthorized => "Unauthorized",
            KnownKind::InternalFailure => "InternalFailure",
            KnownKind::ServiceUnavailable => "ServiceUnavailable",
            KnownKind::Unclassified => "Unclassified",
            KnownKind::TransportFailure => "TransportFailure",
            KnownKind::Timeout => "Timeout",
        }
    }

    /// Looks up a known kind by its exact name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Looks up the kind an API error code names.
    ///
    /// Internal kinds are never matched, so a server code that happens to be
    /// spelled `Timeout` does not turn into a transport timeout.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::from_name(code).filter(|kind| !kind.is_internal())
    }

    /// Kinds assigned by the client itself rather than named by the API.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            KnownKind::Unclassified | KnownKind::TransportFailure | KnownKind::Timeout
        )
    }

    /// Maps a purely numeric code to the kind it conventionally denotes.
    pub fn from_numeric_code(code: &str) -> Option<Self> {
        match code {
            "400" => Some(KnownKind::InvalidInput),
            "401" | "403" => Some(KnownKind::Unauthorized),
            "404" => Some(KnownKind::NotFound),
            "429" => Some(KnownKind::QuotaExceeded),
            "500" => Some(KnownKind::InternalFailure),
            "503" => Some(KnownKind::ServiceUnavailable),
            _ => None,
        }
    }

    /// Transient kinds that a retry may get past.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            KnownKind::QuotaExceeded
                | KnownKind::InternalFailure
                | KnownKind::ServiceUnavailable
                | KnownKind::TransportFailure
                | KnownKind::Timeout
        )
    }
}

impl fmt::Display for KnownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Whether a kind comes from the fixed taxonomy or was discovered at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindCategory {
    Known(KnownKind),
    /// A kind interned from an unrecognized code.
    Other,
}

#[derive(Debug)]
struct KindInner {
    name: Box<str>,
    category: KindCategory,
}

/// A handle to an interned error kind.
///
/// Equality and hashing are by identity: two handles are equal only if they
/// came from the same registry entry.
#[derive(Clone)]
pub struct ErrorKind(Arc<KindInner>);

impl ErrorKind {
    fn new(name: &str, category: KindCategory) -> Self {
        Self(Arc::new(KindInner {
            name: name.into(),
            category,
        }))
    }

    /// The code string this kind was registered under.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn category(&self) -> KindCategory {
        self.0.category
    }

    /// Returns the taxonomy entry for known kinds.
    pub fn known(&self) -> Option<KnownKind> {
        match self.0.category {
            KindCategory::Known(kind) => Some(kind),
            KindCategory::Other => None,
        }
    }

    /// Returns true if this kind is the given taxonomy entry.
    pub fn is(&self, kind: KnownKind) -> bool {
        self.known() == Some(kind)
    }

    /// Returns true if this kind was discovered at runtime.
    pub fn is_other(&self) -> bool {
        self.0.category == KindCategory::Other
    }

    pub fn is_retriable(&self) -> bool {
        self.known().is_some_and(|kind| kind.is_retriable())
    }

    /// Returns true if both handles refer to the same registry entry.
    pub fn ptr_eq(&self, other: &ErrorKind) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ErrorKind {}

impl PartialEq<KnownKind> for ErrorKind {
    fn eq(&self, other: &KnownKind) -> bool {
        self.is(*other)
    }
}

impl Hash for ErrorKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.0), state);
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.category {
            KindCategory::Known(_) => write!(f, "ErrorKind({})", self.name()),
            KindCategory::Other => write!(f, "ErrorKind(Other: {})", self.name()),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Append-only map from code string to [`ErrorKind`].
///
/// A new registry is seeded with every API-facing [`KnownKind`]. Internal
/// kinds are held outside the map and cannot be reached through a code.
/// Entries are only ever inserted, never replaced or removed.
#[derive(Debug)]
pub struct KindRegistry {
    kinds: RwLock<HashMap<Box<str>, ErrorKind>>,
    internal: Vec<ErrorKind>,
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_REGISTRY: OnceLock<Arc<KindRegistry>> = OnceLock::new();

impl KindRegistry {
    pub fn new() -> Self {
        let (internal, api): (Vec<KnownKind>, Vec<KnownKind>) =
            KnownKind::ALL.into_iter().partition(KnownKind::is_internal);
        let handle = |kind: KnownKind| ErrorKind::new(kind.name(), KindCategory::Known(kind));

        Self {
            kinds: RwLock::new(
                api.into_iter()
                    .map(|kind| (kind.name().into(), handle(kind)))
                    .collect(),
            ),
            internal: internal.into_iter().map(handle).collect(),
        }
    }

    /// The process-wide registry.
    pub fn global() -> Arc<KindRegistry> {
        GLOBAL_REGISTRY
            .get_or_init(|| Arc::new(KindRegistry::new()))
            .clone()
    }

    /// Returns the handle for a taxonomy entry.
    pub fn known(&self, kind: KnownKind) -> ErrorKind {
        if let Some(found) = self.internal.iter().find(|handle| handle.is(kind)) {
            return found.clone();
        }
        match self.lookup(kind.name()) {
            Some(found) => found,
            // Seeded entries are never removed; this arm only runs if the
            // seed was bypassed.
            None => self.intern_as(kind.name(), KindCategory::Known(kind)),
        }
    }

    /// Returns the kind registered for `code`, if any.
    pub fn lookup(&self, code: &str) -> Option<ErrorKind> {
        self.kinds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(code)
            .cloned()
    }

    /// Returns the kind for `code`, registering a new one if it was never seen.
    ///
    /// Concurrent first sightings of the same code all receive the same handle.
    pub fn intern(&self, code: &str) -> ErrorKind {
        if let Some(found) = self.lookup(code) {
            return found;
        }
        self.intern_as(code, KindCategory::Other)
    }

    fn intern_as(&self, code: &str, category: KindCategory) -> ErrorKind {
        let mut kinds = self.kinds.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(found) = kinds.get(code) {
            return found.clone();
        }
        let kind = ErrorKind::new(code, category);
        kinds.insert(code.into(), kind.clone());
        info!(code, "registered new error kind");
        kind
    }

    pub fn contains(&self, code: &str) -> bool {
        self.kinds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(code)
    }

    pub fn len(&self) -> usize {
        self.kinds.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Codes of all kinds discovered at runtime, sorted.
    pub fn discovered_codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self
            .kinds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|kind| kind.is_other())
            .map(|kind| kind.name().to_string())
            .collect();
        codes.sort();
        codes
    }
}
