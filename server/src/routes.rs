//! HTTP routes.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::cors::CorsSettings;
use crate::envelope::{ConvertRequest, ConvertResponse, HealthResponse};
use crate::service::ConvertService;

/// `POST /convert` and `GET /health`, behind the CORS layer when enabled.
///
/// Malformed request bodies are rejected by the `Json` extractor with a 4xx
/// status. Everything after that answers 200 with a [`ConvertResponse`].
pub fn router(service: Arc<ConvertService>, cors: &CorsSettings) -> Router {
    let app = Router::new()
        .route("/convert", post(convert))
        .route("/health", get(health))
        .with_state(service);
    match cors.layer() {
        Some(layer) => app.layer(layer),
        None => app,
    }
}

async fn convert(
    State(service): State<Arc<ConvertService>>,
    Json(request): Json<ConvertRequest>,
) -> Json<ConvertResponse> {
    Json(service.convert(&request.url).await)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
