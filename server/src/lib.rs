//! HTTP front for docfetch: accepts a URL, returns Markdown.
//!
//! The crate wires a [`docfetch_fetch::Fetcher`] to a
//! [`docfetch_convert::Converter`] behind two routes. Construction of both
//! happens in the binary; this crate only orchestrates them.

mod cors;
mod envelope;
mod routes;
mod service;

use std::future::Future;
use std::io;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;

pub use cors::{CorsSettings, InvalidOrigin};
pub use envelope::{ConvertRequest, ConvertResponse, HealthResponse, public_message};
pub use routes::router;
pub use service::ConvertService;

/// Serve [`router`] on `listener` until `shutdown` resolves.
///
/// In-flight requests are allowed to finish after shutdown is signalled.
pub async fn serve<F>(
    listener: TcpListener,
    service: Arc<ConvertService>,
    cors: CorsSettings,
    shutdown: F,
) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "docfetch listening");
    let app: Router = router(service, &cors);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    tracing::info!("docfetch stopped");
    Ok(())
}
