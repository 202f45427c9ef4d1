//! `DocSeal` HTTP server.
//!
//! Wires together the core library, storage backend, and HTTP routes into a
//! running Axum server serving the JSON API at `/v1/*`.

pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use axum::middleware as axum_mw;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::identity_middleware;
use crate::state::AppState;

/// Multipart framing allowance on top of the template size ceiling.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let upload_limit = state
        .templates
        .max_upload_bytes()
        .saturating_add(MULTIPART_OVERHEAD);

    // Everything except health needs a caller identity.
    let identified_routes = Router::new()
        .nest(
            "/v1/templates",
            routes::templates::router().layer(DefaultBodyLimit::max(upload_limit)),
        )
        .nest("/v1/documents", routes::documents::router())
        .route_layer(axum_mw::from_fn_with_state(
            Arc::clone(&state),
            identity_middleware,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([
            header::CONTENT_TYPE,
            header::HeaderName::from_static(middleware::USER_ID_HEADER),
        ]);

    Router::new()
        .nest("/v1/health", routes::health::router())
        .merge(identified_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state)
}
