use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod config;
pub mod error;
pub mod form;
pub mod handlers;
pub mod output;
pub mod state;

pub use config::Args;
pub use state::AppState;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect::<Vec<_>>();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE])
}

/// Builds the router with all endpoints and middleware.
pub fn app(state: AppState, args: &Args) -> Router {
    Router::new()
        .route("/text-to-image/", post(handlers::text_to_image))
        .route("/text-to-image", post(handlers::text_to_image))
        .route("/image-to-image/", post(handlers::image_to_image))
        .route("/image-to-image", post(handlers::image_to_image))
        .route("/inpainting/", post(handlers::inpainting))
        .route("/inpainting", post(handlers::inpainting))
        .route("/health", get(handlers::health))
        .route("/{name}", get(handlers::output_image))
        .layer(DefaultBodyLimit::max(args.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&args.cors_origins))
        .with_state(Arc::new(state))
}
