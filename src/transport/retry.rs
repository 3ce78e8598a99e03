//! Retry policy for the HTTP transport.
//!
//! Only idempotent requests retry, on network errors and a fixed set of
//! HTTP statuses. Delays follow exponential backoff with jitter unless the
//! server supplies `Retry-After`.

use reqwest::header::HeaderMap;
use reqwest::Method;
use std::time::{Duration, SystemTime};

/// Maximum number of retries after the initial attempt.
pub const MAX_RETRIES: usize = 4;

const BASE_DELAY_MS: u64 = 500;
const BACKOFF_FACTOR: f64 = 2.0;
const MAX_DELAY_MS: u64 = 30_000;
const JITTER_FRACTION: f64 = 0.2;

/// HTTP statuses worth retrying on an idempotent request.
#[must_use]
pub const fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 425 | 429 | 500 | 502 | 503 | 504)
}

/// Whether a method is idempotent by HTTP semantics.
#[must_use]
pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::PUT | Method::DELETE
    )
}

/// Backoff delay before retry number `retry` (0-based), with ±20% jitter.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn backoff_delay(retry: usize) -> Duration {
    let exponent = retry.min(30) as i32;
    let base = (BASE_DELAY_MS as f64 * BACKOFF_FACTOR.powi(exponent)).min(MAX_DELAY_MS as f64);
    // Uniform jitter in [1 - JITTER_FRACTION, 1 + JITTER_FRACTION]
    let jitter = fastrand::f64().mul_add(2.0 * JITTER_FRACTION, 1.0 - JITTER_FRACTION);
    Duration::from_millis((base * jitter).min(MAX_DELAY_MS as f64) as u64)
}

/// Server-mandated delay from `Retry-After`, as seconds or an HTTP-date.
#[must_use]
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(crate::constants::HEADER_RETRY_AFTER)?.to_str().ok()?;

    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let when = httpdate::parse_http_date(value).ok()?;
    when.duration_since(SystemTime::now()).ok()
}

/// The delay before the given retry: `Retry-After` when present, otherwise
/// computed backoff.
#[must_use]
pub fn delay_for(retry: usize, headers: Option<&HeaderMap>) -> Duration {
    headers
        .and_then(retry_after)
        .unwrap_or_else(|| backoff_delay(retry))
}
