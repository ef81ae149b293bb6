//! Cross-origin access for browser callers.

use axum::http::{HeaderValue, Method};
use thiserror::Error;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// Which browser origins may call the routes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CorsSettings {
    #[default]
    AllowAll,
    Origins(Vec<HeaderValue>),
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid CORS origin: {0}")]
pub struct InvalidOrigin(pub String);

impl CorsSettings {
    /// `"*"` anywhere in the list allows any origin; an empty list disables
    /// cross-origin access.
    pub fn from_origins<S: AsRef<str>>(origins: &[S]) -> Result<Self, InvalidOrigin> {
        let origins: Vec<&str> = origins
            .iter()
            .map(|o| o.as_ref().trim())
            .filter(|o| !o.is_empty())
            .collect();
        if origins.is_empty() {
            return Ok(Self::Disabled);
        }
        if origins.contains(&"*") {
            return Ok(Self::AllowAll);
        }
        origins
            .into_iter()
            .map(|origin| {
                HeaderValue::from_str(origin.trim_end_matches('/'))
                    .map_err(|_| InvalidOrigin(origin.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self::Origins)
    }

    pub(crate) fn layer(&self) -> Option<CorsLayer> {
        let base = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any);
        match self {
            Self::AllowAll => Some(base.allow_origin(Any)),
            Self::Origins(origins) => Some(base.allow_origin(AllowOrigin::list(origins.clone()))),
            Self::Disabled => None,
        }
    }
}
