//! Timeout resolution from environment variables.
//!
//! `ASC_TIMEOUT` / `ASC_UPLOAD_TIMEOUT` accept a plain number of seconds or a
//! suffixed value ("500ms", "30s", "2m"); a `_SECONDS`-suffixed variant is
//! accepted as an alias for each.

use crate::constants;
use crate::error::Error;
use std::time::Duration;

/// Parses a human-readable duration string into a `Duration`.
///
/// Supported formats:
/// - Milliseconds: "100ms", "500ms"
/// - Seconds: "1s", "30s", "120s"
/// - Minutes: "1m", "5m"
/// - Plain number (treated as seconds): "30"
///
/// # Errors
///
/// Returns an error if the format is invalid or the value is out of range.
pub fn parse_duration(s: &str) -> Result<Duration, Error> {
    let s = s.trim();

    if s.is_empty() {
        return Err(Error::config("Duration cannot be empty"));
    }

    if let Some(ms_str) = s.strip_suffix("ms") {
        let ms: u64 = ms_str
            .trim()
            .parse()
            .map_err(|_| Error::config(format!("Invalid milliseconds value: {ms_str}")))?;
        return Ok(Duration::from_millis(ms));
    }

    if let Some(m_str) = s.strip_suffix('m') {
        let minutes: u64 = m_str
            .trim()
            .parse()
            .map_err(|_| Error::config(format!("Invalid minutes value: {m_str}")))?;
        return Ok(Duration::from_secs(minutes * 60));
    }

    if let Some(s_str) = s.strip_suffix('s') {
        let secs: u64 = s_str
            .trim()
            .parse()
            .map_err(|_| Error::config(format!("Invalid seconds value: {s_str}")))?;
        return Ok(Duration::from_secs(secs));
    }

    // Plain number - treat as seconds
    let secs: u64 = s.parse().map_err(|_| {
        Error::config(format!(
            "Invalid duration format: {s}. Use format like '30', '30s', '500ms', or '2m'"
        ))
    })?;
    Ok(Duration::from_secs(secs))
}

/// Reads a timeout from `name` or its `_SECONDS` alias, falling back to `default`.
fn timeout_from_env(name: &str, alias: &str, default: Duration) -> Duration {
    let raw = std::env::var(name)
        .or_else(|_| std::env::var(alias))
        .ok();
    match raw {
        Some(value) => parse_duration(&value).unwrap_or(default),
        None => default,
    }
}

/// The per-request deadline for ordinary API calls.
#[must_use]
pub fn request_timeout() -> Duration {
    timeout_from_env(
        constants::ENV_TIMEOUT,
        constants::ENV_TIMEOUT_SECONDS,
        Duration::from_secs(constants::DEFAULT_TIMEOUT_SECS),
    )
}

/// The per-request deadline for upload operations. Falls back to the
/// ordinary request timeout when no upload-specific value is set.
#[must_use]
pub fn upload_timeout() -> Duration {
    timeout_from_env(
        constants::ENV_UPLOAD_TIMEOUT,
        constants::ENV_UPLOAD_TIMEOUT_SECONDS,
        request_timeout(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_suffixes() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
    }

    #[test]
    fn test_parse_duration_plain_number_is_seconds() {
        assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn test_parse_duration_with_whitespace() {
        assert_eq!(parse_duration(" 30s ").unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("1x").is_err());
    }
}
