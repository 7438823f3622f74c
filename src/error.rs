//! The crate's error taxonomy.
//!
//! Every error a caller can observe from this crate boils down to one of the kinds below. The
//! taxonomy is intentionally small: navigation races and timeouts are common enough in browser
//! automation that callers need to be able to match on them without downcasting.

use std::error::Error as StdError;
use std::fmt;

/// Substrings that mark a driver error as transient-due-to-navigation.
///
/// Matching is case-sensitive substring search against the error's message, mirroring how the
/// underlying WebDriver/CDP transport phrases these failures.
const TRANSIENT_MARKERS: &[&str] = &[
    "Execution context was destroyed",
    "detached Frame",
    "Target closed",
    "Session closed",
    "Protocol error",
    "Target page, context or browser has been closed",
    "frame was detached",
    "Navigating frame was detached",
    "Cannot find context with specified id",
    "Attempted to use detached Frame",
    "Frame was detached",
    "context was destroyed",
    "Page crashed",
];

/// Substrings (case-insensitive) that mark an error as a timeout rather than a navigation race.
const TIMEOUT_MARKERS: &[&str] = &["waiting for selector", "timeout", "timed out", "timeout exceeded"];

/// The unified error type returned by this crate's public API.
#[derive(Debug)]
pub enum CoreError {
    /// The action was cancelled because its `AbortToken` fired.
    ActionStopped,

    /// A driver operation failed because a navigation was in progress. Carries the raw message
    /// that triggered the classification, for diagnostics.
    NavigationTransient(String),

    /// A deadline elapsed waiting on some condition.
    Timeout,

    /// The driver-capability probe at adapter construction time did not match a known driver.
    DriverUnknown,

    /// A selector was neither a plain string nor a recognised text-selector record.
    BadSelector(String),

    /// An internal invariant was violated (unknown `UrlPattern` input shape, corrupted
    /// state, ...). Always a programming error.
    InvariantViolated(String),

    /// A failure surfaced by the concrete driver's transport that doesn't fit any of the above.
    Driver(Box<dyn StdError + Send + Sync>),
}

impl CoreError {
    /// True if this is a transient navigation-induced failure (`§4.7`).
    pub fn is_navigation_transient(&self) -> bool {
        matches!(self, CoreError::NavigationTransient(_))
    }

    /// True if this is a deadline-elapsed failure.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CoreError::Timeout)
    }

    /// Classify a raw driver error message, returning the `CoreError` it should be reported as,
    /// or `None` if the message doesn't match either the transient or timeout marker sets (in
    /// which case the caller should wrap it as [`CoreError::Driver`] or propagate as-is).
    pub fn classify_message(message: &str) -> Option<CoreError> {
        if TRANSIENT_MARKERS.iter().any(|marker| message.contains(marker)) {
            return Some(CoreError::NavigationTransient(message.to_string()));
        }
        let lower = message.to_lowercase();
        if TIMEOUT_MARKERS.iter().any(|marker| lower.contains(marker)) {
            return Some(CoreError::Timeout);
        }
        None
    }

    /// Reclassify a [`CoreError::Driver`] whose message matches a known transient/timeout
    /// marker; any other variant (or an unmatched `Driver` message) passes through unchanged.
    pub fn reclassify(self) -> CoreError {
        if let CoreError::Driver(inner) = &self {
            if let Some(classified) = CoreError::classify_message(&inner.to_string()) {
                return classified;
            }
        }
        self
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::ActionStopped => write!(f, "action stopped: navigation preempted it"),
            CoreError::NavigationTransient(msg) => {
                write!(f, "navigation-transient driver error: {msg}")
            }
            CoreError::Timeout => write!(f, "timed out waiting on condition"),
            CoreError::DriverUnknown => write!(f, "driver capability probe matched no known driver"),
            CoreError::BadSelector(sel) => write!(f, "bad selector: {sel}"),
            CoreError::InvariantViolated(msg) => write!(f, "invariant violated: {msg}"),
            CoreError::Driver(e) => write!(f, "driver error: {e}"),
        }
    }
}

impl StdError for CoreError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            CoreError::Driver(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<Box<dyn StdError + Send + Sync>> for CoreError {
    fn from(e: Box<dyn StdError + Send + Sync>) -> Self {
        CoreError::Driver(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_transient_markers() {
        let e = CoreError::classify_message("Error: Execution context was destroyed").unwrap();
        assert!(e.is_navigation_transient());
    }

    #[test]
    fn classifies_timeout_case_insensitively() {
        let e = CoreError::classify_message("Waiting For Selector TIMED OUT").unwrap();
        assert!(e.is_timeout());
    }

    #[test]
    fn unclassified_message_returns_none() {
        assert!(CoreError::classify_message("element is not clickable at point (1, 2)").is_none());
    }

    #[test]
    fn display_does_not_panic() {
        println!("{}", CoreError::ActionStopped);
        println!("{}", CoreError::BadSelector("[[".into()));
    }
}
