//! The `UrlPattern` builder and combinators (`§6`).
//!
//! A pattern is built once from a string, a [`regex::Regex`], or a predicate closure, and
//! evaluated many times against incoming URLs as part of trigger [`Condition`](crate::trigger::Condition)
//! evaluation.

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::error::CoreError;

/// A predicate over a URL string. The common currency type for combinators.
pub type UrlPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// A compiled URL-matching pattern.
#[derive(Clone)]
pub enum UrlPattern {
    /// Matches the URL exactly, or the same URL followed by `?` or `#`.
    Exact(String),
    /// Matches if the URL contains the substring anywhere.
    ContainsSubstring(String),
    /// Matches if the URL starts with the prefix.
    StartsWith(String),
    /// Matches if the URL ends with the suffix.
    EndsWith(String),
    /// A `:name` path-parameter pattern, compiled to a regex.
    ParamPath(Regex),
    /// An explicit regular expression.
    Regex(Regex),
    /// An arbitrary predicate.
    Predicate(UrlPredicate),
}

impl fmt::Debug for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlPattern::Exact(s) => write!(f, "UrlPattern::Exact({s:?})"),
            UrlPattern::ContainsSubstring(s) => write!(f, "UrlPattern::ContainsSubstring({s:?})"),
            UrlPattern::StartsWith(s) => write!(f, "UrlPattern::StartsWith({s:?})"),
            UrlPattern::EndsWith(s) => write!(f, "UrlPattern::EndsWith({s:?})"),
            UrlPattern::ParamPath(r) => write!(f, "UrlPattern::ParamPath({r})"),
            UrlPattern::Regex(r) => write!(f, "UrlPattern::Regex({r})"),
            UrlPattern::Predicate(_) => write!(f, "UrlPattern::Predicate(..)"),
        }
    }
}

impl UrlPattern {
    /// Build a pattern from the string grammar described in `§6`.
    pub fn from_str(pattern: &str) -> Result<Self, CoreError> {
        if pattern == "*" {
            // The degenerate case: a single `*` both starts and ends with itself, but slicing
            // out an "inner" substring between the two asterisks isn't well-defined for len 1.
            // It matches every non-empty URL, i.e. ContainsSubstring("").
            return Ok(UrlPattern::ContainsSubstring(String::new()));
        }

        if pattern.len() >= 2 && pattern.starts_with('*') && pattern.ends_with('*') {
            let inner = &pattern[1..pattern.len() - 1];
            return Ok(UrlPattern::ContainsSubstring(inner.to_string()));
        }

        if let Some(rest) = pattern.strip_prefix('*') {
            return Ok(UrlPattern::EndsWith(rest.to_string()));
        }

        if let Some(prefix) = pattern.strip_suffix('*') {
            return Ok(UrlPattern::StartsWith(prefix.to_string()));
        }

        if has_param_segment(pattern) {
            return Ok(UrlPattern::ParamPath(compile_param_path(pattern)?));
        }

        if pattern.starts_with("http://") || pattern.starts_with("https://") {
            return Ok(UrlPattern::Exact(pattern.to_string()));
        }

        Ok(UrlPattern::ContainsSubstring(pattern.to_string()))
    }

    /// Wrap an explicit regex.
    pub fn regex(re: Regex) -> Self {
        UrlPattern::Regex(re)
    }

    /// Wrap an arbitrary predicate.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        UrlPattern::Predicate(Arc::new(f))
    }

    /// Evaluate the pattern against a URL.
    pub fn matches(&self, url: &str) -> bool {
        match self {
            UrlPattern::Exact(s) => {
                url == s || url.starts_with(&format!("{s}?")) || url.starts_with(&format!("{s}#"))
            }
            UrlPattern::ContainsSubstring(s) => url.contains(s.as_str()),
            UrlPattern::StartsWith(s) => url.starts_with(s.as_str()),
            UrlPattern::EndsWith(s) => url.ends_with(s.as_str()),
            UrlPattern::ParamPath(re) | UrlPattern::Regex(re) => re.is_match(url),
            UrlPattern::Predicate(f) => f(url),
        }
    }

    /// View this pattern as a reusable [`UrlPredicate`], for composing with [`all_of`]/[`any_of`]/[`not_of`].
    pub fn into_predicate(self) -> UrlPredicate {
        match self {
            UrlPattern::Predicate(f) => f,
            other => Arc::new(move |url: &str| other.matches(url)),
        }
    }
}

/// `:name` is a parameter segment if the `:` is preceded by the start of the string or a `/`,
/// and is immediately followed by an identifier character.
fn has_param_segment(pattern: &str) -> bool {
    let bytes = pattern.as_bytes();
    for (i, ch) in pattern.char_indices() {
        if ch != ':' {
            continue;
        }
        let preceded_ok = i == 0 || bytes[i - 1] == b'/';
        if !preceded_ok {
            continue;
        }
        if let Some(next) = pattern[i + ch.len_utf8()..].chars().next() {
            if next.is_alphabetic() || next == '_' {
                return true;
            }
        }
    }
    false
}

fn compile_param_path(pattern: &str) -> Result<Regex, CoreError> {
    let token = Regex::new(r":[A-Za-z_][A-Za-z0-9_]*").expect("static pattern is valid regex");
    let mut out = String::new();
    let mut last_end = 0;
    for m in token.find_iter(pattern) {
        out.push_str(&regex::escape(&pattern[last_end..m.start()]));
        out.push_str("([^/&?#]+)");
        last_end = m.end();
    }
    out.push_str(&regex::escape(&pattern[last_end..]));
    Regex::new(&out).map_err(|e| CoreError::InvariantViolated(format!("bad param-path pattern: {e}")))
}

/// AND-combine predicates, short-circuiting on the first `false`.
pub fn all_of(predicates: Vec<UrlPredicate>) -> UrlPredicate {
    Arc::new(move |url: &str| predicates.iter().all(|p| p(url)))
}

/// OR-combine predicates, short-circuiting on the first `true`.
pub fn any_of(predicates: Vec<UrlPredicate>) -> UrlPredicate {
    Arc::new(move |url: &str| predicates.iter().any(|p| p(url)))
}

/// Negate a predicate.
pub fn not_of(predicate: UrlPredicate) -> UrlPredicate {
    Arc::new(move |url: &str| !predicate(url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_all_nonempty_urls() {
        let p = UrlPattern::from_str("*").unwrap();
        assert!(matches!(p, UrlPattern::ContainsSubstring(ref s) if s.is_empty()));
        assert!(p.matches("https://example.com/anything"));
    }

    #[test]
    fn leading_and_trailing_star_is_contains() {
        let p = UrlPattern::from_str("*vacancy*").unwrap();
        assert!(p.matches("https://h.example/vacancy/42"));
        assert!(!p.matches("https://h.example/job/42"));
    }

    #[test]
    fn leading_star_is_ends_with() {
        let p = UrlPattern::from_str("*/checkout").unwrap();
        assert!(p.matches("https://shop.example/cart/checkout"));
        assert!(!p.matches("https://shop.example/checkout/done"));
    }

    #[test]
    fn trailing_star_is_starts_with() {
        let p = UrlPattern::from_str("https://shop.example/cart*").unwrap();
        assert!(p.matches("https://shop.example/cart/1"));
        assert!(!p.matches("https://shop.example/other"));
    }

    #[test]
    fn param_path_builds_capture_regex() {
        let p = UrlPattern::from_str("/vacancy/:id").unwrap();
        assert!(p.matches("https://h.example/vacancy/42"));
        assert!(!p.matches("https://h.example/vacancy/"));
    }

    #[test]
    fn http_prefixed_pattern_is_exact_or_suffixed() {
        let p = UrlPattern::from_str("https://h.example/vacancy/42").unwrap();
        assert!(p.matches("https://h.example/vacancy/42"));
        assert!(p.matches("https://h.example/vacancy/42?ref=x"));
        assert!(!p.matches("https://h.example/vacancy/420"));
    }

    #[test]
    fn bare_string_is_contains_substring() {
        let p = UrlPattern::from_str("vacancy").unwrap();
        assert!(p.matches("https://h.example/vacancy/42"));
    }

    #[test]
    fn combinators_short_circuit() {
        let a = UrlPattern::from_str("*a*").unwrap().into_predicate();
        let b = UrlPattern::from_str("*b*").unwrap().into_predicate();
        let both = all_of(vec![a.clone(), b.clone()]);
        let either = any_of(vec![a, b]);
        assert!(both("ab"));
        assert!(!both("a"));
        assert!(either("a"));
        assert!(!either("c"));
        assert!(not_of(either)("c"));
    }
}
