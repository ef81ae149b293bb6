//! Bounded streaming fetch.
//!
//! [`Fetcher::fetch`] re-validates the URL, issues the GET through the
//! injected [`Transport`], enforces the byte and memory ceilings while the
//! body streams in, sniffs the result, and hands accepted bytes to the sink.
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::time::timeout;
use url::Url;

use crate::memory::{MemoryBaseline, MemoryProbe, ProcessMemory};
use crate::policy::NetworkPolicy;
use crate::resolve::Resolver;
use crate::sink::ByteSink;
use crate::sniff::sniff;
use crate::transport::{Transport, TransportResponse};
use crate::types::{
    DocFetchError, ErrorCategory, ErrorCode, FetchLimits, FetchOutcome, FetchedDocument,
    ValidationResult,
};
use crate::validate::validate;

/// The fetch pipeline with its collaborators.
///
/// Holds no per-request state; one instance serves every request.
pub struct Fetcher {
    policy: Arc<NetworkPolicy>,
    resolver: Arc<dyn Resolver>,
    transport: Arc<dyn Transport>,
    memory: Arc<dyn MemoryProbe>,
    max_redirects: u32,
}

impl Fetcher {
    #[must_use]
    pub fn new(
        policy: Arc<NetworkPolicy>,
        resolver: Arc<dyn Resolver>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            policy,
            resolver,
            transport,
            memory: Arc::new(ProcessMemory),
            max_redirects: 0,
        }
    }

    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.memory = probe;
        self
    }

    /// Follow up to `max` redirects, validating each target. Zero disables.
    pub fn with_max_redirects(mut self, max: u32) -> Self {
        self.max_redirects = max;
        self
    }

    /// Run the URL validator with this fetcher's policy and resolver.
    pub async fn validate(&self, raw_url: &str) -> ValidationResult {
        validate(raw_url, &self.policy, self.resolver.as_ref()).await
    }

    /// Fetch `raw_url` into `sink` under `limits`.
    ///
    /// Produces exactly one outcome. Nothing reaches the sink unless the body
    /// stayed within every limit and sniffed as a supported type.
    pub async fn fetch(
        &self,
        raw_url: &str,
        limits: &FetchLimits,
        sink: &mut dyn ByteSink,
    ) -> FetchOutcome {
        let inner = self.fetch_inner(raw_url, limits, sink);
        let outcome = match timeout(limits.download_timeout, inner).await {
            Ok(outcome) => outcome,
            Err(_) => FetchOutcome::Failed(
                DocFetchError::new(ErrorCode::Timeout, "download timed out")
                    .with_detail("timeout_ms", limits.download_timeout.as_millis().to_string()),
            ),
        };

        match &outcome {
            FetchOutcome::Success(doc) => tracing::info!(
                url = %doc.final_url,
                bytes = doc.size_bytes,
                mime = %doc.mime,
                "Downloaded document"
            ),
            FetchOutcome::Rejected(err) => {
                tracing::warn!(
                    url = %raw_url,
                    code = ?err.code,
                    reason = %err.message,
                    "Fetch rejected"
                );
            }
            FetchOutcome::Failed(err) => {
                tracing::warn!(
                    url = %raw_url,
                    code = ?err.code,
                    reason = %err.message,
                    "Fetch failed"
                );
            }
        }
        outcome
    }

    async fn fetch_inner(
        &self,
        raw_url: &str,
        limits: &FetchLimits,
        sink: &mut dyn ByteSink,
    ) -> FetchOutcome {
        if let ValidationResult::Denied(err) = self.validate(raw_url).await {
            return FetchOutcome::Rejected(err);
        }
        let url = match Url::parse(raw_url.trim()) {
            Ok(url) => url,
            Err(e) => {
                return FetchOutcome::Rejected(DocFetchError::new(
                    ErrorCode::InvalidUrl,
                    format!("invalid URL: {e}"),
                ));
            }
        };

        let baseline =
            MemoryBaseline::capture(self.memory.as_ref(), limits.max_memory_growth_bytes());

        let (final_url, response) = match self.open(url).await {
            Ok(opened) => opened,
            Err(outcome) => return outcome,
        };

        if let Some(len) = response.content_length
            && len > limits.max_bytes
        {
            return FetchOutcome::Rejected(too_large(len, limits.max_bytes));
        }

        let body = match read_body(response, limits, &baseline, self.memory.as_ref()).await {
            Ok(body) => body,
            Err(outcome) => return outcome,
        };

        let Some(mime) = sniff(&body) else {
            return FetchOutcome::Rejected(
                DocFetchError::new(ErrorCode::UnsupportedContentType, "unsupported file type")
                    .with_detail("size", body.len().to_string()),
            );
        };
        tracing::debug!(url = %final_url, mime = %mime, "Detected file type");

        let size_bytes = body.len() as u64;
        if let Err(e) = sink.write_document(body, mime).await {
            return FetchOutcome::Failed(
                DocFetchError::new(ErrorCode::Io, format!("failed to store download: {e}"))
                    .with_detail("error", e.to_string()),
            );
        }

        FetchOutcome::Success(FetchedDocument {
            final_url,
            mime,
            size_bytes,
        })
    }

    /// Send the request, following redirects when enabled.
    async fn open(&self, url: Url) -> Result<(Url, TransportResponse), FetchOutcome> {
        let mut current = url;
        let mut redirects = 0u32;

        loop {
            let response = self.transport.get(&current).await.map_err(classify)?;
            let status = response.status;

            if matches!(status, 301 | 302 | 303 | 307 | 308) {
                if self.max_redirects == 0 {
                    let mut err = DocFetchError::new(
                        ErrorCode::RedirectNotFollowed,
                        format!("redirect not followed: HTTP {status}"),
                    )
                    .with_detail("status", status.to_string());
                    if let Some(location) = &response.location {
                        err = err.with_detail("location", location);
                    }
                    return Err(FetchOutcome::Failed(err));
                }

                redirects += 1;
                if redirects > self.max_redirects {
                    return Err(FetchOutcome::Failed(
                        DocFetchError::new(ErrorCode::RedirectLimit, "redirect limit exceeded")
                            .with_detail("count", redirects.to_string())
                            .with_detail("max", self.max_redirects.to_string()),
                    ));
                }

                let Some(location) = response.location.as_deref().filter(|l| !l.is_empty()) else {
                    return Err(FetchOutcome::Failed(DocFetchError::new(
                        ErrorCode::UnexpectedStatus,
                        "redirect missing Location header",
                    )));
                };
                let next = current.join(location).map_err(|_| {
                    FetchOutcome::Rejected(
                        DocFetchError::new(
                            ErrorCode::InvalidUrl,
                            "redirect Location could not be resolved",
                        )
                        .with_detail("location", location),
                    )
                })?;

                if let ValidationResult::Denied(err) = self.validate(next.as_str()).await {
                    return Err(FetchOutcome::Rejected(
                        err.with_detail("redirect_from", current.as_str()),
                    ));
                }
                tracing::debug!(from = %current, to = %next, "Following redirect");
                current = next;
                continue;
            }

            if !(200..300).contains(&status) {
                return Err(FetchOutcome::Failed(status_error(status)));
            }

            return Ok((current, response));
        }
    }
}

async fn read_body(
    response: TransportResponse,
    limits: &FetchLimits,
    baseline: &MemoryBaseline,
    memory: &dyn MemoryProbe,
) -> Result<Vec<u8>, FetchOutcome> {
    let chunk_size = limits.chunk_size.max(1);
    let capacity = response
        .content_length
        .unwrap_or(0)
        .min(limits.max_bytes)
        .min(usize::MAX as u64) as usize;
    let mut body = Vec::with_capacity(capacity);
    let mut stream = response.body;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(classify)?;
        for piece in chunk.chunks(chunk_size) {
            let total = body.len() as u64 + piece.len() as u64;
            if total > limits.max_bytes {
                return Err(FetchOutcome::Rejected(too_large(total, limits.max_bytes)));
            }
            if let Some(current) = baseline.exceeded(memory) {
                return Err(FetchOutcome::Rejected(
                    DocFetchError::new(
                        ErrorCode::MemoryLimit,
                        "memory limit exceeded during download",
                    )
                    .with_detail("resident_bytes", current.to_string())
                    .with_detail("max_growth_mb", limits.max_memory_growth_mb.to_string()),
                ));
            }
            body.extend_from_slice(piece);
            tracing::trace!(bytes = body.len(), "Received chunk");
        }
    }

    Ok(body)
}

/// Policy denials surfacing from the transport are rejections; everything
/// else is a transport failure.
fn classify(err: DocFetchError) -> FetchOutcome {
    if err.category() == ErrorCategory::PolicyRejection {
        FetchOutcome::Rejected(err)
    } else {
        FetchOutcome::Failed(err)
    }
}

fn too_large(size: u64, max_bytes: u64) -> DocFetchError {
    DocFetchError::new(
        ErrorCode::ResponseTooLarge,
        format!("file too large (limit {max_bytes} bytes)"),
    )
    .with_detail("size", size.to_string())
    .with_detail("max_bytes", max_bytes.to_string())
}

fn status_error(status: u16) -> DocFetchError {
    let code = match status {
        400..=499 => ErrorCode::Http4xx,
        500..=599 => ErrorCode::Http5xx,
        _ => ErrorCode::UnexpectedStatus,
    };
    DocFetchError::new(code, format!("failed to download file: HTTP {status}"))
        .with_detail("status", status.to_string())
}

#[cfg(test)]
mod tests {
    use super::{classify, status_error, too_large};
    use crate::types::{DocFetchError, ErrorCode, FetchOutcome};

    #[test]
    fn status_codes_map_to_transport_codes() {
        assert_eq!(status_error(404).code, ErrorCode::Http4xx);
        assert_eq!(status_error(503).code, ErrorCode::Http5xx);
        assert_eq!(status_error(101).code, ErrorCode::UnexpectedStatus);
        assert!(status_error(404).message.contains("HTTP 404"));
    }

    #[test]
    fn dns_hook_denials_classify_as_rejections() {
        let denied = DocFetchError::new(ErrorCode::SsrfBlocked, "blocked IP address");
        assert!(matches!(classify(denied), FetchOutcome::Rejected(_)));
        let refused = DocFetchError::new(ErrorCode::Network, "connection error");
        assert!(matches!(classify(refused), FetchOutcome::Failed(_)));
    }

    #[test]
    fn too_large_reports_sizes() {
        let err = too_large(2048, 1024);
        assert!(err.message.starts_with("file too large"));
        assert_eq!(err.detail("size"), Some("2048"));
        assert_eq!(err.detail("max_bytes"), Some("1024"));
    }
}
