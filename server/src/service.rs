//! Request orchestration: validate, fetch, convert, clean up.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use docfetch_convert::{ConvertError, Converter};
use docfetch_fetch::{
    DocFetchError, ErrorCode, FetchLimits, FetchOutcome, FetchedDocument, Fetcher, TempFileSink,
    ValidationResult,
};
use tokio::time::timeout;

use crate::envelope::ConvertResponse;

/// One conversion request end to end.
///
/// The service owns no per-request state. Each request gets its own
/// temporary directory, removed before the response is returned.
pub struct ConvertService {
    fetcher: Arc<Fetcher>,
    converter: Arc<dyn Converter>,
    limits: FetchLimits,
    conversion_timeout: Duration,
    temp_root: Option<PathBuf>,
}

struct Failure {
    error: DocFetchError,
    size: Option<u64>,
}

impl From<DocFetchError> for Failure {
    fn from(error: DocFetchError) -> Self {
        Self { error, size: None }
    }
}

impl ConvertService {
    #[must_use]
    pub fn new(
        fetcher: Arc<Fetcher>,
        converter: Arc<dyn Converter>,
        limits: FetchLimits,
        conversion_timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            converter,
            limits,
            conversion_timeout,
            temp_root: None,
        }
    }

    /// Create per-request temporary directories under `root`.
    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }

    pub async fn convert(&self, url: &str) -> ConvertResponse {
        let started = Instant::now();
        tracing::info!(url = %url, "Processing conversion");

        match self.run(url).await {
            Ok((doc, markdown)) => {
                tracing::info!(
                    url = %url,
                    mime = %doc.mime,
                    bytes = doc.size_bytes,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Conversion completed"
                );
                ConvertResponse::converted(
                    markdown,
                    doc.mime.extension(),
                    doc.size_bytes,
                    started.elapsed(),
                )
            }
            Err(failure) => {
                tracing::warn!(
                    url = %url,
                    code = ?failure.error.code,
                    reason = %failure.error.message,
                    "Conversion request failed"
                );
                ConvertResponse::failed(&failure.error, failure.size, started.elapsed())
            }
        }
    }

    async fn run(&self, url: &str) -> Result<(FetchedDocument, String), Failure> {
        // Boundary check; the fetcher re-validates right before connecting.
        if let ValidationResult::Denied(err) = self.fetcher.validate(url).await {
            return Err(err.into());
        }

        let sink = match &self.temp_root {
            Some(root) => TempFileSink::new_in(root),
            None => TempFileSink::new(),
        };
        let mut sink = sink.map_err(|e| {
            DocFetchError::new(ErrorCode::Io, format!("failed to create temporary file: {e}"))
        })?;

        let result = self.fetch_and_convert(url, &mut sink).await;

        if let Err(e) = sink.close() {
            tracing::warn!(error = %e, "Failed to clean up temp file");
        }
        result
    }

    async fn fetch_and_convert(
        &self,
        url: &str,
        sink: &mut TempFileSink,
    ) -> Result<(FetchedDocument, String), Failure> {
        let doc = match self.fetcher.fetch(url, &self.limits, sink).await {
            FetchOutcome::Success(doc) => doc,
            FetchOutcome::Rejected(err) | FetchOutcome::Failed(err) => {
                let size = err.detail("size").and_then(|s| s.parse().ok());
                return Err(Failure { error: err, size });
            }
        };
        let size = Some(doc.size_bytes);

        let Some(path) = sink.path() else {
            return Err(Failure {
                error: DocFetchError::new(ErrorCode::Io, "downloaded document was not stored"),
                size,
            });
        };

        let budget = self.conversion_timeout;
        let converted = match timeout(budget, self.converter.convert(path, budget)).await {
            Ok(result) => result,
            Err(_) => Err(ConvertError::Timeout(budget)),
        };

        let markdown = match converted {
            Ok(markdown) => markdown,
            Err(e) if e.is_timeout() => {
                return Err(Failure {
                    error: DocFetchError::new(ErrorCode::ConversionTimeout, "conversion timed out")
                        .with_detail("timeout_secs", budget.as_secs().to_string()),
                    size,
                });
            }
            Err(e) => {
                return Err(Failure {
                    error: DocFetchError::new(
                        ErrorCode::ConversionFailed,
                        format!("conversion failed: {e}"),
                    ),
                    size,
                });
            }
        };

        if markdown.trim().is_empty() {
            return Err(Failure {
                error: DocFetchError::new(
                    ErrorCode::EmptyConversion,
                    "conversion produced no content; the file may be unsupported or corrupted",
                ),
                size,
            });
        }

        Ok((doc, markdown))
    }
}
