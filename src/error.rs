use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::ApiError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("credentials not configured: set {}", missing.join(", "))]
    NotConfigured { missing: Vec<String> },
    #[error("ambiguous credentials: complete API keys found in both {first} and {second} (strict-auth)")]
    AmbiguousCredentials { first: String, second: String },
    #[error("invalid private key: {reason}")]
    InvalidKey { reason: String },
    #[error("profile '{name}' not found")]
    ProfileNotFound { name: String },
    #[error("failed to mint token: {reason}")]
    Token { reason: String },

    #[error("request timed out after {secs}s")]
    Timeout { secs: u64, upload: bool },
    #[error("HTTP {status}{}", format_api_error(.api_error))]
    Http {
        status: u16,
        api_error: Option<ApiError>,
        request_id: Option<String>,
    },
    #[error("request failed after {attempts} attempts: {last_error}")]
    RetryLimitExceeded { attempts: usize, last_error: String },

    #[error("pagination loop detected: next URL repeated: {url}")]
    RepeatedPaginationUrl { url: String },

    #[error("upload operation {index} failed: {reason}")]
    UploadOperation { index: usize, reason: String },
    #[error("upload operations do not cover the file: {reason}")]
    UploadCoverage { reason: String },

    #[error("unknown workflow: {name}")]
    UnknownWorkflow { name: String },
    #[error("workflow '{name}' is private and cannot be run directly")]
    PrivateWorkflow { name: String },
    #[error("sub-workflow call depth exceeded {limit}")]
    MaxCallDepth { limit: usize },
    #[error("no usable shell found: neither bash nor sh is on PATH")]
    ShellUnavailable,
    #[error("invalid workflow definition: {0}")]
    WorkflowValidation(String),

    #[error("failed to write JUnit report: {reason}")]
    Report { reason: String },
    #[error("update failed: {reason}")]
    Update { reason: String },

    #[error("configuration error: {0}")]
    Config(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("{message}")]
    Usage { message: String },

    /// The error has already been printed (e.g. a workflow result on stdout);
    /// the dispatcher only maps it to an exit code.
    #[error("already reported")]
    AlreadyReported { exit_code: i32 },

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

fn format_api_error(api_error: &Option<ApiError>) -> String {
    api_error.as_ref().map_or_else(String::new, |e| {
        let mut out = format!(": {}", e.title);
        if !e.detail.is_empty() {
            out.push_str(&format!(": {}", e.detail));
        }
        out
    })
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage {
            message: msg.into(),
        }
    }

    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            reason: reason.into(),
        }
    }

    pub fn token(reason: impl Into<String>) -> Self {
        Self::Token {
            reason: reason.into(),
        }
    }

    pub fn update(reason: impl Into<String>) -> Self {
        Self::Update {
            reason: reason.into(),
        }
    }

    pub fn report(reason: impl Into<String>) -> Self {
        Self::Report {
            reason: reason.into(),
        }
    }

    /// Process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Usage { .. } => crate::constants::EXIT_USAGE,
            Self::AlreadyReported { exit_code } => *exit_code,
            _ => crate::constants::EXIT_ERROR,
        }
    }
}

/// A user-facing rendering of an error: the message plus an actionable hint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub message: String,
    pub hint: Option<String>,
}

/// Classify an error into a message and an actionable hint.
///
/// The privacy data-usage hint takes precedence over the generic 403 hint:
/// a 403 on those resources is fixed in the web UI, not by changing roles.
#[must_use]
pub fn classify(error: &Error) -> ClassifiedError {
    let message = error.to_string();
    let hint = match error {
        Error::NotConfigured { .. } | Error::ProfileNotFound { .. } => Some(
            "Run 'asc auth login', or set ASC_KEY_ID, ASC_ISSUER_ID, and ASC_PRIVATE_KEY_PATH."
                .to_string(),
        ),
        Error::Timeout { upload: true, .. } => {
            Some("Raise the upload timeout with ASC_UPLOAD_TIMEOUT.".to_string())
        }
        Error::Timeout { upload: false, .. } => {
            Some("Raise the request timeout with ASC_TIMEOUT.".to_string())
        }
        Error::Network(e) if e.is_timeout() => {
            Some("Raise the request timeout with ASC_TIMEOUT.".to_string())
        }
        Error::Http {
            status, api_error, ..
        } => http_hint(*status, api_error.as_ref()),
        _ => None,
    };

    ClassifiedError { message, hint }
}

fn http_hint(status: u16, api_error: Option<&ApiError>) -> Option<String> {
    if mentions_privacy_resources(api_error) {
        return Some(
            "Complete the app privacy (data usage) questions in App Store Connect on the web."
                .to_string(),
        );
    }
    match status {
        403 => Some("Check that your API key's role grants permission for this operation.".to_string()),
        401 => Some("Your credentials are invalid or expired. Re-run 'asc auth login'.".to_string()),
        _ => None,
    }
}

/// The privacy data-usage resources cannot be completed over the API; a
/// request that touches them fails with an error naming them.
fn mentions_privacy_resources(api_error: Option<&ApiError>) -> bool {
    api_error.is_some_and(|e| {
        let haystack = format!("{} {} {}", e.code, e.title, e.detail).to_lowercase();
        haystack.contains("datausage") || haystack.contains("privacy")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(Error::usage("bad flag").exit_code(), 2);
        assert_eq!(Error::config("oops").exit_code(), 1);
        assert_eq!(Error::AlreadyReported { exit_code: 7 }.exit_code(), 7);
    }

    #[test]
    fn test_not_configured_names_missing_vars() {
        let err = Error::NotConfigured {
            missing: vec!["ASC_KEY_ID".into(), "ASC_ISSUER_ID".into()],
        };
        let classified = classify(&err);
        assert!(classified.message.contains("ASC_KEY_ID"));
        assert!(classified.message.contains("ASC_ISSUER_ID"));
        assert!(classified.hint.unwrap().contains("asc auth login"));
    }

    #[test]
    fn test_timeout_hints_distinguish_upload() {
        let upload = classify(&Error::Timeout {
            secs: 30,
            upload: true,
        });
        assert!(upload.hint.unwrap().contains("ASC_UPLOAD_TIMEOUT"));

        let regular = classify(&Error::Timeout {
            secs: 30,
            upload: false,
        });
        assert!(regular.hint.unwrap().contains("ASC_TIMEOUT"));
    }

    #[test]
    fn test_privacy_hint_outranks_forbidden_hint() {
        let err = Error::Http {
            status: 403,
            api_error: Some(ApiError {
                code: "FORBIDDEN_ERROR".into(),
                title: "Forbidden".into(),
                detail: "The appDataUsages resource requires privacy setup".into(),
                associated_errors: Vec::new(),
            }),
            request_id: None,
        };
        let hint = classify(&err).hint.unwrap();
        assert!(hint.contains("privacy"));
        assert!(!hint.contains("role"));
    }

    #[test]
    fn test_forbidden_and_unauthorized_hints() {
        let forbidden = Error::Http {
            status: 403,
            api_error: None,
            request_id: None,
        };
        assert!(classify(&forbidden).hint.unwrap().contains("role"));

        let unauthorized = Error::Http {
            status: 401,
            api_error: None,
            request_id: None,
        };
        assert!(classify(&unauthorized)
            .hint
            .unwrap()
            .contains("invalid or expired"));
    }
}
