//! Typed JSON:API transport with retry, debug tracing, and structured
//! error decoding.
//!
//! Every outbound call carries a per-request deadline (`ASC_TIMEOUT`, or
//! `ASC_UPLOAD_TIMEOUT` in upload contexts), a bearer token when an
//! authenticator is attached, and the asc User-Agent. Idempotent requests
//! retry per [`retry`]; non-idempotent requests surface the first failure.

pub mod retry;

use crate::api::{ResourceDocument, ResourceList};
use crate::constants;
use crate::credentials::CredentialSet;
use crate::duration::{request_timeout, upload_timeout};
use crate::error::Error;
use crate::redact::redacted_headers;
use crate::token::TokenMinter;
use chrono::Utc;
use reqwest::header::HeaderMap;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A decoded App Store Connect API error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub associated_errors: Vec<AssociatedError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociatedError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub detail: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    errors: Vec<RawApiError>,
}

#[derive(Debug, Default, Deserialize)]
struct RawApiError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    detail: String,
    #[serde(default)]
    meta: Option<RawErrorMeta>,
}

#[derive(Debug, Default, Deserialize)]
struct RawErrorMeta {
    #[serde(default, rename = "associatedErrors")]
    associated_errors: std::collections::HashMap<String, Vec<AssociatedError>>,
}

/// Decode an `{errors: […]}` payload into the primary [`ApiError`].
#[must_use]
pub fn decode_api_error(body: &str) -> Option<ApiError> {
    let envelope: ErrorEnvelope = serde_json::from_str(body).ok()?;
    let raw = envelope.errors.into_iter().next()?;
    let associated_errors = raw
        .meta
        .map(|m| m.associated_errors.into_values().flatten().collect())
        .unwrap_or_default();
    Some(ApiError {
        code: raw.code,
        title: raw.title,
        detail: raw.detail,
        associated_errors,
    })
}

/// One outbound request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// A path like `/v1/apps`, or an absolute URL (rebased onto the base).
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    /// Explicit idempotency marker for methods that are not idempotent by
    /// HTTP semantics.
    pub idempotent_override: bool,
    /// Upload context: uses the upload deadline and timeout hint.
    pub upload: bool,
}

impl Request {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            idempotent_override: false,
            upload: false,
        }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        let mut request = Self::new(Method::POST, path);
        request.body = Some(body);
        request
    }

    #[must_use]
    pub fn patch(path: impl Into<String>, body: serde_json::Value) -> Self {
        let mut request = Self::new(Method::PATCH, path);
        request.body = Some(body);
        request
    }

    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Mark a non-idempotent method as safe to retry.
    #[must_use]
    pub const fn idempotent(mut self) -> Self {
        self.idempotent_override = true;
        self
    }

    #[must_use]
    pub const fn upload_context(mut self) -> Self {
        self.upload = true;
        self
    }

    fn is_idempotent(&self) -> bool {
        self.idempotent_override || retry::is_idempotent(&self.method)
    }
}

/// A completed response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: String,
    /// Echo of the server's request id, for support tickets and traces.
    pub request_id: Option<String>,
}

impl Response {
    /// Deserialize the body.
    ///
    /// # Errors
    ///
    /// Returns a JSON error when the body does not match `T`.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, Error> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Supplies bearer tokens for requests.
#[derive(Debug)]
pub struct Authenticator {
    credentials: CredentialSet,
    minter: TokenMinter,
}

impl Authenticator {
    #[must_use]
    pub fn new(credentials: CredentialSet) -> Self {
        Self {
            credentials,
            minter: TokenMinter::new(),
        }
    }

    /// A bearer token valid for at least the reuse margin.
    ///
    /// # Errors
    ///
    /// Returns an error when minting fails.
    pub fn bearer(&self) -> Result<String, Error> {
        self.minter.token(&self.credentials, Utc::now())
    }
}

/// The typed HTTP client all commands share.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    auth: Option<Arc<Authenticator>>,
    user_agent: String,
}

impl Client {
    /// Build a client against `base_url` with optional authentication.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, auth: Option<Authenticator>) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(Error::Network)?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            auth: auth.map(Arc::new),
            user_agent: format!("asc/{}", env!("CARGO_PKG_VERSION")),
        })
    }

    /// Build a production client from resolved credentials.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying HTTP client cannot be built.
    pub fn from_credentials(credentials: CredentialSet) -> Result<Self, Error> {
        Self::new(constants::API_BASE_URL, Some(Authenticator::new(credentials)))
    }

    /// Execute a request under the retry policy.
    ///
    /// # Errors
    ///
    /// Fails with `Timeout`, `Network`, or `Http` after retries are
    /// exhausted (idempotent requests) or immediately (everything else).
    pub async fn execute(&self, request: &Request) -> Result<Response, Error> {
        let deadline = if request.upload {
            upload_timeout()
        } else {
            request_timeout()
        };
        let url = self.resolve_url(&request.path, &request.query);
        let body_bytes = request
            .body
            .as_ref()
            .map(|b| serde_json::to_vec(b))
            .transpose()?;

        self.run_with_retry(
            request.method.clone(),
            &url,
            request.is_idempotent(),
            request.upload,
            deadline,
            body_bytes,
            &[],
            true,
        )
        .await
    }

    /// Replay a pre-signed upload operation bit-exact: the given method,
    /// URL, and headers only. No auth injection, no extra headers.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Client::execute`]; PUT retries by contract.
    pub async fn send_presigned(
        &self,
        method: Method,
        url: &str,
        headers: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<Response, Error> {
        let idempotent = retry::is_idempotent(&method);
        self.run_with_retry(
            method,
            url,
            idempotent,
            true,
            upload_timeout(),
            Some(body),
            headers,
            false,
        )
        .await
    }

    /// GET a list endpoint with the caller's page size (capped at the API
    /// maximum).
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Client::execute`].
    pub async fn list(
        &self,
        path: &str,
        limit: u32,
        extra_query: &[(String, String)],
    ) -> Result<ResourceList, Error> {
        let mut request = Request::get(path)
            .with_query("limit", crate::pagination::clamp_limit(limit).to_string());
        for (name, value) in extra_query {
            request = request.with_query(name.clone(), value.clone());
        }
        self.execute(&request).await?.json()
    }

    /// GET a previously returned absolute `links.next` URL.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Client::execute`].
    pub async fn list_url(&self, url: &str) -> Result<ResourceList, Error> {
        self.execute(&Request::get(url)).await?.json()
    }

    /// GET a single-resource endpoint.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Client::execute`].
    pub async fn document(&self, path: &str) -> Result<ResourceDocument, Error> {
        self.execute(&Request::get(path)).await?.json()
    }

    /// Resolve a path or absolute URL against the configured base.
    ///
    /// Absolute URLs (pagination cursors) are rebased onto the base origin
    /// so overrides and test servers stay in effect.
    fn resolve_url(&self, path: &str, query: &[(String, String)]) -> String {
        let base = self.base_url.trim_end_matches('/');
        let mut url = if let Some(rest) = path
            .strip_prefix("https://")
            .or_else(|| path.strip_prefix("http://"))
        {
            rest.find('/').map_or_else(
                || base.to_string(),
                |idx| format!("{base}{}", &rest[idx..]),
            )
        } else {
            format!("{base}{path}")
        };

        if !query.is_empty() {
            url.push(if url.contains('?') { '&' } else { '?' });
            let encoded: Vec<String> = query
                .iter()
                .map(|(name, value)| format!("{name}={}", urlencoding::encode(value)))
                .collect();
            url.push_str(&encoded.join("&"));
        }
        url
    }

    #[allow(clippy::too_many_arguments, clippy::too_many_lines)]
    async fn run_with_retry(
        &self,
        method: Method,
        url: &str,
        idempotent: bool,
        upload: bool,
        deadline: Duration,
        body: Option<Vec<u8>>,
        extra_headers: &[(String, String)],
        authenticated: bool,
    ) -> Result<Response, Error> {
        let debug = api_debug_enabled();
        let payload_size = body.as_ref().map_or(0, Vec::len);
        let mut attempt = 0usize;

        loop {
            let started = Instant::now();
            let builder = self.build_attempt(
                method.clone(),
                url,
                deadline,
                body.clone(),
                extra_headers,
                authenticated,
            )?;

            match builder.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let headers = response.headers().clone();
                    let request_id = header_value(&headers, constants::HEADER_REQUEST_ID);

                    if debug {
                        trace_attempt(
                            &method,
                            url,
                            &headers,
                            payload_size,
                            Some(status),
                            started.elapsed(),
                            attempt,
                        );
                    }

                    if response.status().is_success() {
                        let text = response.text().await.map_err(Error::Network)?;
                        return Ok(Response {
                            status,
                            body: text,
                            request_id,
                        });
                    }

                    if idempotent && retry::is_retryable_status(status) && attempt < retry::MAX_RETRIES
                    {
                        tokio::time::sleep(retry::delay_for(attempt, Some(&headers))).await;
                        attempt += 1;
                        continue;
                    }

                    let text = response.text().await.unwrap_or_default();
                    return Err(Error::Http {
                        status,
                        api_error: decode_api_error(&text),
                        request_id,
                    });
                }
                Err(e) => {
                    if debug {
                        trace_attempt(
                            &method,
                            url,
                            &HeaderMap::new(),
                            payload_size,
                            None,
                            started.elapsed(),
                            attempt,
                        );
                    }

                    if idempotent && attempt < retry::MAX_RETRIES {
                        tokio::time::sleep(retry::delay_for(attempt, None)).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(if e.is_timeout() {
                        Error::Timeout {
                            secs: deadline.as_secs(),
                            upload,
                        }
                    } else {
                        Error::Network(e)
                    });
                }
            }
        }
    }

    fn build_attempt(
        &self,
        method: Method,
        url: &str,
        deadline: Duration,
        body: Option<Vec<u8>>,
        extra_headers: &[(String, String)],
        authenticated: bool,
    ) -> Result<reqwest::RequestBuilder, Error> {
        let mut builder = self.http.request(method, url).timeout(deadline);

        // Pre-signed operations are replayed bit-exact: only the headers
        // the API specified, nothing of ours.
        if authenticated {
            builder = builder
                .header(constants::HEADER_USER_AGENT, &self.user_agent)
                .header(constants::HEADER_ACCEPT, constants::CONTENT_TYPE_JSON);
            if let Some(auth) = &self.auth {
                builder = builder.header(
                    constants::HEADER_AUTHORIZATION,
                    format!("Bearer {}", auth.bearer()?),
                );
            }
            if body.is_some() {
                builder = builder.header(
                    constants::HEADER_CONTENT_TYPE,
                    constants::CONTENT_TYPE_JSON,
                );
            }
        }

        for (name, value) in extra_headers {
            builder = builder.header(name, value);
        }

        if let Some(body) = body {
            builder = builder.body(body);
        }

        Ok(builder)
    }
}

/// Whether `ASC_DEBUG=api` per-attempt tracing is on.
fn api_debug_enabled() -> bool {
    std::env::var(constants::ENV_DEBUG).is_ok_and(|v| v == constants::DEBUG_MODE_API)
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// One stderr line per attempt. Bodies are reported by size only.
fn trace_attempt(
    method: &Method,
    url: &str,
    headers: &HeaderMap,
    payload_size: usize,
    status: Option<u16>,
    elapsed: Duration,
    attempt: usize,
) {
    let status_text =
        status.map_or_else(|| "network-error".to_string(), |s| s.to_string());
    let header_text: Vec<String> = redacted_headers(headers)
        .into_iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    eprintln!(
        "asc api: {} {} -> {} ({} byte payload) [{}ms, attempt {}] {{{}}}",
        method,
        url,
        status_text,
        payload_size,
        elapsed.as_millis(),
        attempt,
        header_text.join(", ")
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Install the process-wide rustls crypto provider that `main()` installs
    /// in production, so in-process `Client::new` can build a reqwest client
    /// under the `rustls-no-provider` feature.
    fn ensure_crypto_provider() {
        static ONCE: std::sync::Once = std::sync::Once::new();
        ONCE.call_once(|| {
            #[cfg(not(windows))]
            let _ = rustls::crypto::ring::default_provider().install_default();
            #[cfg(windows)]
            let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        });
    }

    #[test]
    fn test_decode_api_error_primary_fields() {
        let body = r#"{"errors": [{
            "code": "FORBIDDEN_ERROR",
            "title": "Forbidden",
            "detail": "The key lacks App Manager role",
            "meta": {"associatedErrors": {"/v1/apps": [{"code": "X", "title": "t", "detail": "d"}]}}
        }]}"#;
        let error = decode_api_error(body).unwrap();
        assert_eq!(error.code, "FORBIDDEN_ERROR");
        assert_eq!(error.title, "Forbidden");
        assert_eq!(error.associated_errors.len(), 1);
        assert_eq!(error.associated_errors[0].code, "X");
    }

    #[test]
    fn test_decode_api_error_non_json() {
        assert!(decode_api_error("<html>gateway</html>").is_none());
        assert!(decode_api_error("{\"errors\": []}").is_none());
    }

    #[test]
    fn test_resolve_url_relative_and_query() {
        ensure_crypto_provider();
        let client = Client::new("https://api.example.com", None).unwrap();
        let url = client.resolve_url(
            "/v1/apps",
            &[("limit".to_string(), "200".to_string()),
              ("filter[name]".to_string(), "My App".to_string())],
        );
        assert_eq!(
            url,
            "https://api.example.com/v1/apps?limit=200&filter[name]=My%20App"
        );
    }

    #[test]
    fn test_resolve_url_rebases_absolute_next() {
        ensure_crypto_provider();
        let client = Client::new("http://127.0.0.1:8080", None).unwrap();
        let url = client.resolve_url(
            "https://api.appstoreconnect.apple.com/v1/apps?cursor=AB",
            &[],
        );
        assert_eq!(url, "http://127.0.0.1:8080/v1/apps?cursor=AB");
    }

    #[test]
    fn test_request_idempotency() {
        assert!(Request::get("/v1/apps").is_idempotent());
        assert!(Request::delete("/v1/apps/1").is_idempotent());
        assert!(!Request::post("/v1/apps", serde_json::json!({})).is_idempotent());
        assert!(Request::post("/v1/apps", serde_json::json!({}))
            .idempotent()
            .is_idempotent());
    }
}
