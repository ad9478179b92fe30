//! Pattern detector for transport-level failures.
//!
//! Failures that never produced an HTTP response carry only free-form text
//! from the network stack. This module matches that text against regex
//! patterns to tell timeouts apart from other transport failures.

use regex::Regex;

use super::KnownKind;

/// A pattern for matching transport failure text.
#[derive(Debug)]
pub struct FailurePattern {
    /// The compiled regex pattern.
    regex: Regex,
    /// The kind to assign when this pattern matches.
    kind: KnownKind,
    /// A human-readable description of what this pattern detects.
    description: String,
}

impl FailurePattern {
    /// Creates a new failure pattern.
    ///
    /// # Errors
    /// Returns an error if `pattern` is not a valid regex.
    pub fn new(
        pattern: &str,
        kind: KnownKind,
        description: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        Ok(Self::with_regex(Regex::new(pattern)?, kind, description))
    }

    /// Creates a new failure pattern with a pre-compiled regex.
    pub fn with_regex(regex: Regex, kind: KnownKind, description: impl Into<String>) -> Self {
        Self {
            regex,
            kind,
            description: description.into(),
        }
    }

    pub fn kind(&self) -> KnownKind {
        self.kind
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Checks if this pattern matches the given text.
    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// Detector that maps transport failure text to a [`KnownKind`].
#[derive(Debug)]
pub struct FailureDetector {
    /// Patterns in priority order.
    patterns: Vec<FailurePattern>,
}

impl Default for FailureDetector {
    fn default() -> Self {
        Self::new()
    }
}

const DEFAULT_PATTERNS: &[(&str, KnownKind, &str)] = &[
    // Timeouts first: "connection timed out" is a timeout, not a reset
    (r"(?i)time[d\s]*\s*out", KnownKind::Timeout, "Timed out"),
    (r"(?i)deadline\s*(exceeded|expired)", KnownKind::Timeout, "Deadline exceeded"),
    (
        r"(?i)connection\s*(refused|reset|closed|aborted)",
        KnownKind::TransportFailure,
        "Connection error",
    ),
    (r"(?i)broken\s*pipe", KnownKind::TransportFailure, "Broken pipe"),
    (
        r"(?i)(dns|failed\s+to\s+lookup|name\s+resolution)",
        KnownKind::TransportFailure,
        "DNS resolution failure",
    ),
    (
        r"(?i)(tls|ssl|certificate)",
        KnownKind::TransportFailure,
        "TLS failure",
    ),
];

impl FailureDetector {
    /// Creates a detector with the default transport failure patterns.
    pub fn new() -> Self {
        let patterns = DEFAULT_PATTERNS
            .iter()
            .filter_map(|(pattern, kind, description)| {
                FailurePattern::new(pattern, *kind, *description).ok()
            })
            .collect();
        Self { patterns }
    }

    /// Creates a detector with custom patterns.
    pub fn with_patterns(patterns: Vec<FailurePattern>) -> Self {
        Self { patterns }
    }

    /// Adds a pattern with the lowest priority.
    pub fn add_pattern(&mut self, pattern: FailurePattern) {
        self.patterns.push(pattern);
    }

    pub fn patterns(&self) -> &[FailurePattern] {
        &self.patterns
    }

    /// Returns the first pattern matching `text`.
    pub fn detect(&self, text: &str) -> Option<&FailurePattern> {
        self.patterns.iter().find(|pattern| pattern.matches(text))
    }

    /// Classifies `text`, treating anything unmatched as a transport failure.
    pub fn classify(&self, text: &str) -> KnownKind {
        self.detect(text)
            .map(FailurePattern::kind)
            .unwrap_or(KnownKind::TransportFailure)
    }
}
