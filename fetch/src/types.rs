//! Domain types shared across the fetch pipeline.
//!
//! Every stage reports failures as a [`DocFetchError`] carrying a stable
//! [`ErrorCode`]. Codes group into an [`ErrorCategory`] so the request boundary
//! can tell a policy refusal from a transport error without string matching.

use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::sniff::SupportedMime;

/// Error with a stable code, a human-readable message, and ordered details.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DocFetchError {
    /// Stable error code.
    pub code: ErrorCode,

    /// Human-readable description, safe to return to the caller.
    pub message: String,

    /// Error-specific context.
    pub details: ErrorDetails,
}

impl DocFetchError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: ErrorDetails::default(),
        }
    }

    /// Add a detail field.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.0.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }

    /// Look up a detail value by key.
    #[must_use]
    pub fn detail(&self, key: &str) -> Option<&str> {
        self.details
            .0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::json!({
            "error": true,
            "code": self.code,
            "category": self.category(),
            "message": self.message,
        });

        if !self.details.0.is_empty() {
            let details: serde_json::Map<String, serde_json::Value> = self
                .details
                .0
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            obj["details"] = serde_json::Value::Object(details);
        }

        obj
    }
}

/// Error details as key-value pairs.
#[derive(Debug, Clone, Default)]
pub struct ErrorDetails(pub Vec<(String, String)>);

/// Stable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// URL could not be parsed or carries userinfo.
    InvalidUrl,
    /// Non-http(s) scheme.
    InvalidScheme,
    /// Explicit port outside the allowlist.
    PortBlocked,
    /// URL has no usable hostname.
    MissingHost,
    /// Hostname is on the blocklist.
    HostBlocked,
    /// Address falls in a blocked range.
    SsrfBlocked,
    /// Hostname contains a suspicious substring.
    SuspiciousHost,
    /// DNS resolution failed or returned nothing.
    DnsFailed,
    /// Body exceeds the byte ceiling.
    ResponseTooLarge,
    /// Process memory grew past the ceiling during download.
    MemoryLimit,
    /// Wall-clock budget exhausted.
    Timeout,
    /// Sniffer found no supported signature.
    UnsupportedContentType,
    /// Connection, TLS, or body stream error.
    Network,
    /// HTTP 4xx.
    Http4xx,
    /// HTTP 5xx.
    Http5xx,
    /// Any other non-2xx status.
    UnexpectedStatus,
    /// Redirect received while redirects are disabled.
    RedirectNotFollowed,
    /// Too many redirects.
    RedirectLimit,
    /// Local I/O while materializing the download.
    Io,
    /// Converter reported an error.
    ConversionFailed,
    /// Converter exceeded its time budget.
    ConversionTimeout,
    /// Converter produced no text.
    EmptyConversion,
}

impl ErrorCode {
    #[must_use]
    pub const fn category(self) -> ErrorCategory {
        match self {
            ErrorCode::InvalidUrl
            | ErrorCode::InvalidScheme
            | ErrorCode::PortBlocked
            | ErrorCode::MissingHost
            | ErrorCode::HostBlocked
            | ErrorCode::SsrfBlocked
            | ErrorCode::SuspiciousHost
            | ErrorCode::DnsFailed => ErrorCategory::PolicyRejection,
            ErrorCode::ResponseTooLarge | ErrorCode::MemoryLimit | ErrorCode::Timeout => {
                ErrorCategory::ResourceLimitExceeded
            }
            ErrorCode::UnsupportedContentType => ErrorCategory::UnsupportedContent,
            ErrorCode::Network
            | ErrorCode::Http4xx
            | ErrorCode::Http5xx
            | ErrorCode::UnexpectedStatus
            | ErrorCode::RedirectNotFollowed
            | ErrorCode::RedirectLimit
            | ErrorCode::Io => ErrorCategory::TransportFailure,
            ErrorCode::ConversionFailed
            | ErrorCode::ConversionTimeout
            | ErrorCode::EmptyConversion => ErrorCategory::ConversionFailure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// SSRF or validation refusal. Always safe to report.
    PolicyRejection,
    /// Size, memory, or time ceiling breached.
    ResourceLimitExceeded,
    /// DNS, connection, or HTTP status errors.
    TransportFailure,
    /// No matching content signature.
    UnsupportedContent,
    /// Collaborator error or empty output.
    ConversionFailure,
}

/// Outcome of URL validation. Exactly one of allow or deny.
#[derive(Debug, Clone)]
pub enum ValidationResult {
    /// Every address the URL points at passed the policy.
    Allowed { addrs: Vec<IpAddr> },
    /// Denied with a reason.
    Denied(DocFetchError),
}

impl ValidationResult {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, ValidationResult::Allowed { .. })
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            ValidationResult::Allowed { .. } => "URL validation passed",
            ValidationResult::Denied(err) => &err.message,
        }
    }
}

/// Per-invocation ceilings for a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchLimits {
    /// Maximum body size in bytes.
    pub max_bytes: u64,
    /// Maximum resident memory growth during download, in MiB.
    pub max_memory_growth_mb: u64,
    /// Accounting granularity for the body stream.
    pub chunk_size: usize,
    /// Wall-clock budget for the whole download.
    pub download_timeout: Duration,
}

impl FetchLimits {
    /// 50 MiB.
    pub const DEFAULT_MAX_BYTES: u64 = 50 * 1024 * 1024;
    pub const DEFAULT_MAX_MEMORY_GROWTH_MB: u64 = 500;
    pub const DEFAULT_CHUNK_SIZE: usize = 8192;
    pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

    #[must_use]
    pub const fn max_memory_growth_bytes(&self) -> u64 {
        self.max_memory_growth_mb.saturating_mul(1024 * 1024)
    }
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            max_bytes: Self::DEFAULT_MAX_BYTES,
            max_memory_growth_mb: Self::DEFAULT_MAX_MEMORY_GROWTH_MB,
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
            download_timeout: Self::DEFAULT_DOWNLOAD_TIMEOUT,
        }
    }
}

/// A downloaded, sniffed document that has been handed to the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDocument {
    /// URL of the response that produced the bytes.
    pub final_url: Url,
    /// Detected content type.
    pub mime: SupportedMime,
    /// Number of body bytes written to the sink.
    pub size_bytes: u64,
}

/// Result of a single fetch attempt.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Success(FetchedDocument),
    /// The pipeline declined to fetch or to keep the content.
    Rejected(DocFetchError),
    /// The fetch attempt itself errored.
    Failed(DocFetchError),
}

impl FetchOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success(_))
    }

    #[must_use]
    pub fn error(&self) -> Option<&DocFetchError> {
        match self {
            FetchOutcome::Success(_) => None,
            FetchOutcome::Rejected(err) | FetchOutcome::Failed(err) => Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DocFetchError, ErrorCategory, ErrorCode, FetchLimits};

    #[test]
    fn every_policy_code_is_a_policy_rejection() {
        for code in [
            ErrorCode::InvalidUrl,
            ErrorCode::InvalidScheme,
            ErrorCode::PortBlocked,
            ErrorCode::MissingHost,
            ErrorCode::HostBlocked,
            ErrorCode::SsrfBlocked,
            ErrorCode::SuspiciousHost,
            ErrorCode::DnsFailed,
        ] {
            assert_eq!(code.category(), ErrorCategory::PolicyRejection, "{code:?}");
        }
    }

    #[test]
    fn error_json_includes_code_category_and_details() {
        let err = DocFetchError::new(ErrorCode::PortBlocked, "port not allowed: 22")
            .with_detail("port", "22");
        let json = err.to_json();
        assert_eq!(json["code"], "port_blocked");
        assert_eq!(json["category"], "policy_rejection");
        assert_eq!(json["details"]["port"], "22");
        assert_eq!(err.detail("port"), Some("22"));
    }

    #[test]
    fn default_limits_match_service_defaults() {
        let limits = FetchLimits::default();
        assert_eq!(limits.max_bytes, 52_428_800);
        assert_eq!(limits.chunk_size, 8192);
        assert_eq!(limits.max_memory_growth_bytes(), 500 * 1024 * 1024);
    }
}
