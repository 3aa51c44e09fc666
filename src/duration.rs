//! Relative duration strings such as `5m`, `1h30m` or `2d`.

use chrono::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid duration {0:?}")]
pub struct DurationError(pub String);

/// Parses a sequence of `<int><unit>` terms. Units: `ms`, `s`, `m`, `h`,
/// `d`, `w`, `y` (365 days).
pub fn parse_duration(s: &str) -> Result<Duration, DurationError> {
    let err = || DurationError(s.to_string());
    let s = s.trim();
    if s.is_empty() {
        return Err(err());
    }

    let mut total = Duration::zero();
    let mut chars = s.chars().peekable();
    while chars.peek().is_some() {
        let mut digits = String::new();
        while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) {
            digits.push(c);
            chars.next();
        }
        let mut unit = String::new();
        while let Some(c) = chars.peek().copied().filter(char::is_ascii_alphabetic) {
            unit.push(c);
            chars.next();
        }
        let n: i64 = digits.parse().map_err(|_| err())?;
        let term = match unit.as_str() {
            "ms" => Duration::try_milliseconds(n),
            "s" => Duration::try_seconds(n),
            "m" => Duration::try_minutes(n),
            "h" => Duration::try_hours(n),
            "d" => Duration::try_days(n),
            "w" => Duration::try_weeks(n),
            "y" => n.checked_mul(365).and_then(Duration::try_days),
            _ => return Err(err()),
        };
        total = term.and_then(|t| total.checked_add(&t)).ok_or_else(err)?;
    }
    Ok(total)
}

/// Seconds as a float, keeping sub-second precision.
pub fn as_seconds(d: Duration) -> f64 {
    d.num_milliseconds() as f64 / 1000.0
}

#[test]
fn test_parse_units() {
    assert_eq!(parse_duration("90s").unwrap(), Duration::seconds(90));
    assert_eq!(parse_duration("1h30m").unwrap(), Duration::minutes(90));
    assert_eq!(parse_duration("2d").unwrap(), Duration::hours(48));
    assert_eq!(as_seconds(parse_duration("1500ms").unwrap()), 1.5);
}

#[test]
fn test_parse_rejects_garbage() {
    assert!(parse_duration("").is_err());
    assert!(parse_duration("5").is_err());
    assert!(parse_duration("h").is_err());
    assert!(parse_duration("3 fortnights").is_err());
}

#[test]
fn test_parse_rejects_out_of_range() {
    assert!(parse_duration("9999999999999999d").is_err());
    assert!(parse_duration("99999999999999999999s").is_err());
    assert!(parse_duration("9223372036854775807y").is_err());
    assert!(parse_duration("106751991167d106751991167d").is_err());
}
