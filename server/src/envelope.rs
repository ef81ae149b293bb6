//! Request and response bodies for the HTTP routes.

use std::time::Duration;

use docfetch_fetch::{DocFetchError, ErrorCategory, ErrorCode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct ConvertRequest {
    pub url: String,
}

/// Outcome of `POST /convert`. Business failures use this envelope with
/// `success: false`; they are never HTTP errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    /// Extension of the detected type, e.g. `.pdf`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    pub processing_time_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size_bytes: Option<u64>,
}

impl ConvertResponse {
    #[must_use]
    pub fn converted(markdown: String, file_type: &str, size: u64, elapsed: Duration) -> Self {
        Self {
            success: true,
            markdown: Some(markdown),
            error: None,
            error_code: None,
            error_category: None,
            file_type: Some(file_type.to_string()),
            processing_time_seconds: elapsed.as_secs_f64(),
            file_size_bytes: Some(size),
        }
    }

    #[must_use]
    pub fn failed(err: &DocFetchError, size: Option<u64>, elapsed: Duration) -> Self {
        Self {
            success: false,
            markdown: None,
            error: Some(public_message(err)),
            error_code: Some(err.code),
            error_category: Some(err.category()),
            file_type: None,
            processing_time_seconds: elapsed.as_secs_f64(),
            file_size_bytes: size,
        }
    }
}

/// Caller-facing text for a failure. Policy refusals say so explicitly;
/// transport errors never include low-level causes.
#[must_use]
pub fn public_message(err: &DocFetchError) -> String {
    match (err.category(), err.code) {
        (ErrorCategory::PolicyRejection, _) => {
            format!("URL security validation failed: {}", err.message)
        }
        (_, ErrorCode::Network) => format!("failed to download file: {}", err.message),
        _ => err.message.clone(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
}

impl HealthResponse {
    #[must_use]
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            service: "docfetch".to_string(),
        }
    }
}
