//! Error response formatting
//!
//! Provides the JSON error envelope returned for every `GatewayError`.

use crate::error::{ErrorCode, GatewayError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::any::Any;

/// Standardized error response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,

    /// Machine-readable error code
    pub error: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// ISO 8601 timestamp of the error
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn from_gateway_error(error: &GatewayError) -> Self {
        Self {
            success: false,
            error: error.error_code(),
            message: error.user_message(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status_code.is_server_error() {
            tracing::error!(
                error = %self,
                status = %status_code.as_u16(),
                "Server error occurred"
            );
        } else {
            tracing::warn!(
                error = %self,
                status = %status_code.as_u16(),
                "Client error occurred"
            );
        }

        let error_response = ErrorResponse::from_gateway_error(&self);
        (status_code, Json(error_response)).into_response()
    }
}

/// Response for a handler that panicked; the payload only goes to the log.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("non-string panic payload");
    tracing::error!(panic = %detail, "Handler panicked");

    let body = ErrorResponse {
        success: false,
        error: ErrorCode::InternalError,
        message: "Internal server error".to_string(),
        timestamp: Utc::now().to_rfc3339(),
    };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::error::{DatabaseError, DatabaseErrorKind};
    use crate::payments::signature::SignatureError;
    use axum::{body::Body, http::Request, routing::get, Router};
    use tower::ServiceExt;
    use tower_http::catch_panic::CatchPanicLayer;

    #[tokio::test]
    async fn unauthorized_renders_reason() {
        let response = GatewayError::from(SignatureError::Mismatch).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "UNAUTHORIZED");
        assert_eq!(json["message"], "Signature mismatch");
    }

    #[tokio::test]
    async fn internal_errors_use_generic_body() {
        let response = GatewayError::from(DatabaseError::new(DatabaseErrorKind::Query {
            message: "relation \"orders\" does not exist".to_string(),
        }))
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("relation"));
        assert!(text.contains("INTERNAL_ERROR"));
    }

    #[tokio::test]
    async fn panicking_handler_becomes_json_500() {
        async fn explode() -> &'static str {
            panic!("order row 42 is corrupt")
        }
        let app = Router::new()
            .route("/boom", get(explode))
            .layer(CatchPanicLayer::custom(panic_response));

        let response = app
            .oneshot(Request::builder().uri("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "INTERNAL_ERROR");
        assert_eq!(json["message"], "Internal server error");
        assert!(!body.windows(7).any(|w| w == b"corrupt"));
    }
}
