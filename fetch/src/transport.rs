//! HTTP transport seam and the pooled reqwest implementation.

use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use tokio::sync::Semaphore;
use url::Url;

use crate::policy::NetworkPolicy;
use crate::resolve::{GuardedDns, Resolver};
use crate::types::{DocFetchError, ErrorCode};

pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, DocFetchError>> + Send>>;

pub type TransportFut<'a> =
    Pin<Box<dyn Future<Output = Result<TransportResponse, DocFetchError>> + Send + 'a>>;

/// Response head plus a streaming body.
pub struct TransportResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    /// Raw `Location` header, if any.
    pub location: Option<String>,
    pub body: BodyStream,
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

/// Issues a single GET without following redirects.
pub trait Transport: Send + Sync {
    fn get<'a>(&'a self, url: &'a Url) -> TransportFut<'a>;
}

/// Settings for the process-wide HTTP client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpClientSettings {
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Concurrent in-flight requests across the pool.
    pub max_connections: usize,
    /// Idle keep-alive connections retained per host.
    pub max_keepalive_connections: usize,
}

impl HttpClientSettings {
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_MAX_CONNECTIONS: usize = 20;
    pub const DEFAULT_MAX_KEEPALIVE_CONNECTIONS: usize = 10;

    #[must_use]
    pub fn default_user_agent() -> String {
        format!("docfetch/{}", env!("CARGO_PKG_VERSION"))
    }
}

impl Default for HttpClientSettings {
    fn default() -> Self {
        Self {
            user_agent: Self::default_user_agent(),
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
            max_keepalive_connections: Self::DEFAULT_MAX_KEEPALIVE_CONNECTIONS,
        }
    }
}

/// One pooled `reqwest::Client` shared by every request.
///
/// A semaphore permit is held from send until the body stream is dropped, so
/// at most `max_connections` responses are in flight.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    permits: Arc<Semaphore>,
}

impl HttpTransport {
    /// Client whose DNS lookups go through the policy.
    pub fn guarded(
        settings: &HttpClientSettings,
        policy: Arc<NetworkPolicy>,
        resolver: Arc<dyn Resolver>,
    ) -> Result<Self, DocFetchError> {
        let dns = Arc::new(GuardedDns::new(policy, resolver));
        Self::build(settings, reqwest::Client::builder().dns_resolver(dns))
    }

    /// Client using the system resolver directly. Only for callers that
    /// validate every address themselves.
    pub fn unguarded(settings: &HttpClientSettings) -> Result<Self, DocFetchError> {
        Self::build(settings, reqwest::Client::builder())
    }

    fn build(
        settings: &HttpClientSettings,
        builder: reqwest::ClientBuilder,
    ) -> Result<Self, DocFetchError> {
        let client = builder
            .redirect(Policy::none())
            .no_proxy()
            .user_agent(&settings.user_agent)
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .pool_max_idle_per_host(settings.max_keepalive_connections)
            .build()
            .map_err(|e| {
                DocFetchError::new(
                    ErrorCode::Network,
                    format!("failed to build HTTP client: {e}"),
                )
            })?;

        tracing::info!(
            max_connections = settings.max_connections,
            max_keepalive = settings.max_keepalive_connections,
            "HTTP client initialized"
        );

        Ok(Self {
            client,
            permits: Arc::new(Semaphore::new(settings.max_connections.max(1))),
        })
    }
}

impl Transport for HttpTransport {
    fn get<'a>(&'a self, url: &'a Url) -> TransportFut<'a> {
        Box::pin(async move {
            let permit = Arc::clone(&self.permits).acquire_owned().await.map_err(|_| {
                DocFetchError::new(ErrorCode::Network, "HTTP client is shut down")
            })?;

            let response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| map_reqwest_error(&e))?;

            let status = response.status().as_u16();
            let content_length = response.content_length();
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            let body = response.bytes_stream().map(move |chunk| {
                let _held = &permit;
                chunk.map_err(|e| map_reqwest_error(&e))
            });

            Ok(TransportResponse {
                status,
                content_length,
                location,
                body: Box::pin(body),
            })
        })
    }
}

/// Map a reqwest error, surfacing a policy denial raised by the DNS hook.
fn map_reqwest_error(err: &reqwest::Error) -> DocFetchError {
    let mut source = err.source();
    while let Some(inner) = source {
        if let Some(denied) = inner.downcast_ref::<DocFetchError>() {
            return denied.clone();
        }
        source = inner.source();
    }

    if err.is_timeout() {
        return DocFetchError::new(ErrorCode::Timeout, "request timed out")
            .with_detail("phase", "request");
    }

    let kind = if err.is_connect() {
        "connect"
    } else if err.is_body() || err.is_decode() {
        "body"
    } else {
        "request"
    };
    DocFetchError::new(ErrorCode::Network, "connection error")
        .with_detail("phase", kind)
        .with_detail("error", error_chain(err))
}

fn error_chain(err: &reqwest::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text
}
