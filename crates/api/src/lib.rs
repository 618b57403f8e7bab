//! HTTP API server with observability for the storefront.
//!
//! Issues the storefront's inbound commands over REST on behalf of the
//! acting user named in the `x-user-id` header, with structured logging
//! (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod startup;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{InMemoryPaymentGateway, Storefront, StorefrontConfig};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/products", post(routes::products::create))
        .route(
            "/products/{id}",
            get(routes::products::get).put(routes::products::update),
        )
        .route("/cart", get(routes::cart::get))
        .route(
            "/cart/items/{product_id}",
            put(routes::cart::set_item).delete(routes::cart::remove_item),
        )
        .route("/cart/checkout", post(routes::cart::checkout))
        .route("/orders/{id}", get(routes::orders::get))
        .route("/orders/{id}/cancel", post(routes::orders::cancel))
        .route("/orders/{id}/payments", post(routes::orders::pay))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates application state over in-memory backends and the in-memory
/// payment gateway.
pub fn create_default_state(config: StorefrontConfig) -> Arc<AppState> {
    let storefront = Storefront::in_memory(Arc::new(InMemoryPaymentGateway::new()), config);
    Arc::new(AppState {
        storefront,
        backend: "memory",
    })
}
