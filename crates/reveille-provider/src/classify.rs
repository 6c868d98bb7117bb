//! Pure classification of CLI failure text.
//!
//! Kept independent of the scheduler so the mapping from free-text CLI output
//! to a closed failure-kind enum stays directly testable.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::FailureKind;

/// Matches reset phrases like "try again in 3 hours 2 minutes" or
/// "resets in 45 minutes", capturing the duration part.
static RATE_LIMIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:reset|try again)s?\s+(?:in\s+)?(\d+\s*(?:hour|minute|day)\S*(?:\s+\d+\s*(?:hour|minute|day)\S*)*)",
    )
    .unwrap()
});

/// True when `text` contains any of the provider's auth-error keywords
/// (case-insensitive).
pub fn contains_auth_error(text: &str, keywords: &[&str]) -> bool {
    let lower = text.to_lowercase();
    keywords.iter().any(|kw| lower.contains(kw))
}

/// Extract the human-readable reset duration from a rate-limit message.
pub fn extract_rate_limit_hint(text: &str) -> Option<String> {
    RATE_LIMIT_RE
        .captures(text)
        .map(|caps| caps[1].to_string())
}

/// Classify failure text into a failure kind, with a rate-limit hint when one
/// was found. Auth keywords win over rate-limit phrasing; anything
/// unrecognized is transient.
pub fn classify_failure(text: &str, auth_keywords: &[&str]) -> (FailureKind, Option<String>) {
    if contains_auth_error(text, auth_keywords) {
        return (FailureKind::Auth, None);
    }
    if let Some(hint) = extract_rate_limit_hint(text) {
        return (FailureKind::RateLimit, Some(hint));
    }
    (FailureKind::Transient, None)
}

/// Truncate to a maximum number of characters (not bytes), safe for
/// multi-byte UTF-8.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.chars().take(max_chars).collect()
}
