//! Error handling for the payment gateway
//!
//! Every failure a handler can hit converts into `GatewayError`, which knows
//! its HTTP status, a stable machine-readable code, and a message that is
//! safe to return to the caller. Provider payloads, store errors and secrets
//! only ever reach the server log.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;
use crate::database::error::DatabaseError;
use crate::payments::error::PaymentError;
use crate::payments::signature::SignatureError;
use crate::payments::types::PaymentState;

/// Error codes for programmatic handling by the storefront
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
    #[serde(rename = "ORDER_NOT_FOUND")]
    OrderNotFound,
    #[serde(rename = "ORDER_NOT_PAYABLE")]
    OrderNotPayable,
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Unauthorized: {0}")]
    Unauthorized(SignatureError),

    #[error("Configuration error: {setting} is not set")]
    Configuration { setting: String },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Order not found: {}", reference.as_deref().unwrap_or("-"))]
    OrderNotFound { reference: Option<String> },

    #[error("Order {order_number} is {status} and cannot be paid")]
    OrderNotPayable {
        order_number: String,
        status: PaymentState,
    },

    #[error("Provider error: {0}")]
    Provider(PaymentError),

    #[error("Database error: {0}")]
    Database(DatabaseError),
}

impl GatewayError {
    pub fn validation(message: impl Into<String>, field: &str) -> Self {
        GatewayError::Validation {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Unauthorized(_) => 401,
            GatewayError::Configuration { .. } => 500,
            GatewayError::Validation { .. } => 400,
            GatewayError::OrderNotFound { .. } => 404,
            GatewayError::OrderNotPayable { .. } => 409,
            GatewayError::Provider(err) => err.http_status_code(),
            GatewayError::Database(_) => 500,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            GatewayError::Unauthorized(_) => ErrorCode::Unauthorized,
            GatewayError::Configuration { .. } => ErrorCode::ConfigurationError,
            GatewayError::Validation { .. } => ErrorCode::ValidationError,
            GatewayError::OrderNotFound { .. } => ErrorCode::OrderNotFound,
            GatewayError::OrderNotPayable { .. } => ErrorCode::OrderNotPayable,
            GatewayError::Provider(PaymentError::ValidationError { .. }) => {
                ErrorCode::ConfigurationError
            }
            GatewayError::Provider(_) => ErrorCode::PaymentProviderError,
            GatewayError::Database(_) => ErrorCode::InternalError,
        }
    }

    /// Message safe to show the caller
    pub fn user_message(&self) -> String {
        match self {
            GatewayError::Unauthorized(reason) => capitalize(&reason.to_string()),
            GatewayError::Configuration { setting } => {
                format!("Gateway is misconfigured: {} is not set", setting)
            }
            GatewayError::Validation { message, .. } => message.clone(),
            GatewayError::OrderNotFound { .. } => "Order not found".to_string(),
            GatewayError::OrderNotPayable {
                order_number,
                status,
            } => format!("Order {} is already {}", order_number, status),
            GatewayError::Provider(err) => err.user_message(),
            GatewayError::Database(_) => "Internal server error".to_string(),
        }
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl From<SignatureError> for GatewayError {
    fn from(err: SignatureError) -> Self {
        GatewayError::Unauthorized(err)
    }
}

impl From<PaymentError> for GatewayError {
    fn from(err: PaymentError) -> Self {
        GatewayError::Provider(err)
    }
}

impl From<DatabaseError> for GatewayError {
    fn from(err: DatabaseError) -> Self {
        GatewayError::Database(err)
    }
}

impl From<ConfigError> for GatewayError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::MissingVariable(setting) | ConfigError::InvalidValue(setting) => {
                GatewayError::Configuration { setting }
            }
        }
    }
}
