//! HTTP routes
//!
//! Health checks at the root, media import and the image proxy under /api.

pub mod error;
pub mod health;
pub mod image_proxy;
pub mod media;

use axum::Router;
use axum::http::HeaderValue;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::ApiError;

use crate::AppState;

fn cors_layer(site_url: Option<&str>) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match site_url.and_then(|url| HeaderValue::from_str(url.trim_end_matches('/')).ok()) {
        Some(origin) => layer.allow_origin(origin),
        None => layer.allow_origin(Any),
    }
}

/// Build the full application router
pub fn app(state: AppState) -> Router {
    let cors = cors_layer(state.config.site_url.as_deref());

    Router::new()
        .merge(health::router())
        .nest("/api", media::router().merge(image_proxy::router()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
