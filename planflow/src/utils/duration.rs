//! Parsing of timeout strings such as `10m`, `1h30m` or `500ms`.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while parsing a duration string.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DurationParseError {
    /// The string is empty.
    #[error("Empty duration string")]
    Empty,

    /// A number was not followed by a unit, or the unit is unknown.
    #[error("Invalid duration '{0}': expected segments like 1d, 2h, 30m, 10s or 500ms")]
    Invalid(String),
}

/// Parses a compound duration string.
///
/// Supported units are `d`, `h`, `m`, `s` and `ms`. Segments add up, so
/// `1h30m` is ninety minutes.
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DurationParseError::Empty);
    }

    let invalid = || DurationParseError::Invalid(trimmed.to_string());
    let mut total_ms: u64 = 0;
    let mut chars = trimmed.chars().peekable();

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
        if digits.is_empty() || unit.is_empty() {
            return Err(invalid());
        }
        let value: u64 = digits.parse().map_err(|_| invalid())?;
        let factor = match unit.as_str() {
            "d" => 86_400_000,
            "h" => 3_600_000,
            "m" => 60_000,
            "s" => 1_000,
            "ms" => 1,
            _ => return Err(invalid()),
        };
        total_ms = value
            .checked_mul(factor)
            .and_then(|ms| total_ms.checked_add(ms))
            .ok_or_else(invalid)?;
    }

    Ok(Duration::from_millis(total_ms))
}
