//! HTTP surface of the gateway

pub mod mpesa;

use crate::middleware::error::panic_response;
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

pub use mpesa::GatewayState;

/// All gateway routes with request-id, request logging and panic layers.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(mpesa::health))
        .route("/health/ready", get(mpesa::ready))
        .route("/mpesa/initiate", post(mpesa::initiate))
        .route("/mpesa/status", post(mpesa::status))
        .route("/mpesa/reverse", post(mpesa::reverse))
        .route("/mpesa/callback", post(mpesa::callback))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(CatchPanicLayer::custom(panic_response)),
        )
}
