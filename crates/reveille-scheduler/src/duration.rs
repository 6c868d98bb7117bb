//! Best-effort parsing of human-readable durations out of rate-limit text.

use std::sync::LazyLock;

use regex::Regex;

static DURATION_PART_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s*(day|hour|minute|second)s?").unwrap());

/// Extract a total duration in seconds from free text.
///
/// Sums every `<integer> <unit>` token found, so "3 days 1 hour 58 minutes"
/// works regardless of token order. Returns `None` when no token matches or
/// the sum is zero. Lossy by design: malformed input never fails, it just
/// finds no duration.
pub fn parse_duration_seconds(text: &str) -> Option<u64> {
    let mut total: u64 = 0;
    let mut matched = false;

    for caps in DURATION_PART_RE.captures_iter(text) {
        let Ok(value) = caps[1].parse::<u64>() else {
            continue;
        };
        matched = true;

        let unit = caps[2].to_lowercase();
        let multiplier = if unit.starts_with("day") {
            24 * 60 * 60
        } else if unit.starts_with("hour") {
            60 * 60
        } else if unit.starts_with("minute") {
            60
        } else {
            1
        };

        total = total.saturating_add(value.saturating_mul(multiplier));
    }

    if matched && total > 0 { Some(total) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn sums_mixed_units() {
        assert_eq!(
            parse_duration_seconds("3 days 1 hour 58 minutes"),
            Some(3 * 86400 + 3600 + 58 * 60)
        );
    }

    #[test]
    fn singular_and_plural_both_match() {
        assert_eq!(parse_duration_seconds("1 day"), Some(86400));
        assert_eq!(parse_duration_seconds("2 days"), Some(2 * 86400));
        assert_eq!(parse_duration_seconds("1 minute"), Some(60));
    }

    #[test]
    fn case_and_spacing_are_tolerated() {
        assert_eq!(parse_duration_seconds("5 HOURS"), Some(5 * 3600));
        assert_eq!(parse_duration_seconds("5hours"), Some(5 * 3600));
    }

    #[test]
    fn seconds_unit_counts_as_seconds() {
        assert_eq!(parse_duration_seconds("90 seconds"), Some(90));
    }

    #[test]
    fn embedded_in_sentence() {
        assert_eq!(
            parse_duration_seconds("Usage limit reached. Try again in 2 hours 5 minutes."),
            Some(2 * 3600 + 5 * 60)
        );
    }

    #[test]
    fn no_duration_found() {
        assert_eq!(parse_duration_seconds("no duration here"), None);
        assert_eq!(parse_duration_seconds(""), None);
    }

    #[test]
    fn zero_total_is_none() {
        assert_eq!(parse_duration_seconds("0 seconds"), None);
        assert_eq!(parse_duration_seconds("0 hours 0 minutes"), None);
    }

    proptest! {
        // Token order never changes the result.
        #[test]
        fn parse_is_commutative(
            days in 0u64..30,
            hours in 0u64..48,
            minutes in 0u64..600,
        ) {
            let forward = format!("{days} days {hours} hours {minutes} minutes");
            let backward = format!("{minutes} minutes {hours} hours {days} days");
            prop_assert_eq!(
                parse_duration_seconds(&forward),
                parse_duration_seconds(&backward)
            );
        }

        // The sum is exact for well-formed input.
        #[test]
        fn parse_is_additive(hours in 1u64..100, minutes in 0u64..600) {
            let text = format!("{hours} hours {minutes} minutes");
            prop_assert_eq!(
                parse_duration_seconds(&text),
                Some(hours * 3600 + minutes * 60)
            );
        }

        // Arbitrary garbage never panics.
        #[test]
        fn parse_never_panics(text in ".*") {
            let _ = parse_duration_seconds(&text);
        }
    }
}
