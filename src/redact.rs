//! Secret redaction for logs and debug traces.
//!
//! Any value whose variable or header name contains `KEY`, `SECRET`, `TOKEN`,
//! `PASSWORD`, or `PRIVATE` is emitted as `[redacted]`, never raw.

/// Name fragments that mark a variable or header as sensitive.
const SENSITIVE_FRAGMENTS: &[&str] = &["KEY", "SECRET", "TOKEN", "PASSWORD", "PRIVATE"];

/// Checks if a variable or header name refers to sensitive material.
#[must_use]
pub fn is_sensitive_name(name: &str) -> bool {
    let upper = name.to_uppercase();
    SENSITIVE_FRAGMENTS.iter().any(|f| upper.contains(f))
        || matches!(
            upper.as_str(),
            "AUTHORIZATION" | "PROXY-AUTHORIZATION" | "COOKIE"
        )
}

/// Redacts `value` when `name` is sensitive; returns it untouched otherwise.
#[must_use]
pub fn redact(name: &str, value: &str) -> String {
    if is_sensitive_name(name) {
        "[redacted]".to_string()
    } else {
        value.to_string()
    }
}

/// Renders a header map with sensitive values replaced, for debug traces.
#[must_use]
pub fn redacted_headers(headers: &reqwest::header::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let rendered = if is_sensitive_name(name.as_str()) {
                "[redacted]".to_string()
            } else {
                String::from_utf8_lossy(value.as_bytes()).to_string()
            };
            (name.as_str().to_string(), rendered)
        })
        .collect()
}
