//! Job timeout parsing.

use std::time::Duration;

use super::JobError;

/// Parses a timeout such as `90`, `30s`, `5m`, `2h` or `1d`.
///
/// Returns `None` for `0`, which means no timeout.
///
/// ```
/// use std::time::Duration;
/// use plexrun::job::parse_timeout;
///
/// assert_eq!(parse_timeout("2m").unwrap(), Some(Duration::from_secs(120)));
/// assert_eq!(parse_timeout("0").unwrap(), None);
/// assert!(parse_timeout("-5").is_err());
/// ```
pub fn parse_timeout(value: &str) -> Result<Option<Duration>, JobError> {
    let invalid = || JobError::InvalidTimeout(value.to_string());
    let trimmed = value.trim();

    let (digits, multiplier) = match trimmed.char_indices().last() {
        Some((idx, 's')) => (&trimmed[..idx], 1),
        Some((idx, 'm')) => (&trimmed[..idx], 60),
        Some((idx, 'h')) => (&trimmed[..idx], 3600),
        Some((idx, 'd')) => (&trimmed[..idx], 86400),
        Some(_) => (trimmed, 1),
        None => return Err(invalid()),
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let amount: u64 = digits.parse().map_err(|_| invalid())?;
    let secs = amount.checked_mul(multiplier).ok_or_else(invalid)?;

    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}
