//! HTTP routes for Janus
//!
//! This module defines all HTTP endpoints exposed by the proxy.

pub mod azure;
pub mod bedrock;
pub mod health;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::AppState;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/azure/*path", post(azure::proxy))
        .route("/bedrock/runtime/:operation", post(bedrock::runtime))
        .route(
            "/bedrock/agent-runtime/:operation",
            post(bedrock::agent_runtime),
        )
        // Per-request method/path/status/latency logging
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
