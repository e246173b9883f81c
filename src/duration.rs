//! Duration text codec.
//!
//! Report exports carry durations either as bare seconds (`"90"`) or as
//! colon-delimited clock text (`"1:02:03"`, `"02:03"`). Parsing is lenient:
//! anything outside the grammar counts as zero seconds.

use thiserror::Error;

/// Errors from the strict duration grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("empty duration")]
    Empty,
    #[error("too many components in duration: {0}")]
    TooManyComponents(String),
    #[error("invalid duration component '{component}' in '{text}'")]
    InvalidComponent { text: String, component: String },
    #[error("duration overflows: {0}")]
    Overflow(String),
}

/// Parse `digits | digits:digits | digits:digits:digits` into seconds.
///
/// Components are read right to left as seconds, minutes, hours.
pub fn parse_strict(text: &str) -> Result<u64, DurationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(DurationError::Empty);
    }

    let parts: Vec<&str> = trimmed.split(':').collect();
    if parts.len() > 3 {
        return Err(DurationError::TooManyComponents(trimmed.to_string()));
    }

    let mut values = Vec::with_capacity(parts.len());
    for part in &parts {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DurationError::InvalidComponent {
                text: trimmed.to_string(),
                component: part.to_string(),
            });
        }
        let value: u64 = part
            .parse()
            .map_err(|_| DurationError::Overflow(trimmed.to_string()))?;
        values.push(value);
    }

    // A bare number is already seconds; otherwise H:M:S or M:S.
    let (hours, minutes, seconds) = match values.as_slice() {
        [s] => (0, 0, *s),
        [m, s] => (0, *m, *s),
        [h, m, s] => (*h, *m, *s),
        _ => return Err(DurationError::TooManyComponents(trimmed.to_string())),
    };

    hours
        .checked_mul(3600)
        .and_then(|h| minutes.checked_mul(60).and_then(|m| h.checked_add(m)))
        .and_then(|hm| hm.checked_add(seconds))
        .ok_or_else(|| DurationError::Overflow(trimmed.to_string()))
}

/// Lenient parse: unparseable or empty text is zero seconds.
pub fn parse_duration(text: &str) -> u64 {
    parse_strict(text).unwrap_or(0)
}

/// Format seconds as `HH:MM:SS`. Hours are not truncated past 99.
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, secs)
}

/// Average time per call as `HH:MM:SS`; zero calls give `00:00:00`.
pub fn format_average(total_seconds: u64, calls: u64) -> String {
    if calls == 0 {
        return format_duration(0);
    }
    format_duration(total_seconds / calls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_seconds() {
        assert_eq!(parse_duration("90"), 90);
        assert_eq!(parse_duration(" 42 "), 42);
    }

    #[test]
    fn test_parse_clock_forms() {
        assert_eq!(parse_duration("01:02:03"), 3723);
        assert_eq!(parse_duration("10:00"), 600);
        assert_eq!(parse_duration("100:00:00"), 360_000);
        assert_eq!(parse_duration("0:0:7"), 7);
    }

    #[test]
    fn test_parse_is_lenient() {
        assert_eq!(parse_duration(""), 0);
        assert_eq!(parse_duration("   "), 0);
        assert_eq!(parse_duration("abc"), 0);
        assert_eq!(parse_duration("1:2:3:4"), 0);
        assert_eq!(parse_duration("-5"), 0);
        assert_eq!(parse_duration("1::3"), 0);
        assert_eq!(parse_duration("12.5"), 0);
    }

    #[test]
    fn test_parse_strict_errors() {
        assert_eq!(parse_strict(""), Err(DurationError::Empty));
        assert!(matches!(
            parse_strict("1:2:3:4"),
            Err(DurationError::TooManyComponents(_))
        ));
        assert!(matches!(
            parse_strict("1:x"),
            Err(DurationError::InvalidComponent { .. })
        ));
        assert!(matches!(
            parse_strict("99999999999999999999"),
            Err(DurationError::Overflow(_))
        ));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "00:00:00");
        assert_eq!(format_duration(59), "00:00:59");
        assert_eq!(format_duration(3723), "01:02:03");
        assert_eq!(format_duration(360_000 + 61), "100:01:01");
    }

    #[test]
    fn test_round_trip_normalizes() {
        assert_eq!(format_duration(parse_duration("1:2:3")), "01:02:03");
        assert_eq!(format_duration(parse_duration("75")), "00:01:15");
        assert_eq!(format_duration(parse_duration("5:00")), "00:05:00");
        assert_eq!(format_duration(parse_duration("00:10:00")), "00:10:00");
    }

    #[test]
    fn test_format_average() {
        assert_eq!(format_average(900, 5), "00:03:00");
        assert_eq!(format_average(10, 3), "00:00:03");
        assert_eq!(format_average(u64::MAX, 1), format_duration(u64::MAX));
        assert_eq!(format_average(900, 0), "00:00:00");
    }
}
