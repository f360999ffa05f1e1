use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

/// Failures talking to the mobile-money provider.
///
/// A provider that answers with a non-success business code is NOT an error
/// at this layer: the response is returned as data and judged by the caller.
#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Provider request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Bearer token error: {message}")]
    TokenError { message: String },
}

impl PaymentError {
    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::NetworkError { .. } => 502,
            PaymentError::Timeout { .. } => 502,
            PaymentError::TokenError { .. } => 500,
        }
    }

    /// True when a request was actually attempted against the provider.
    /// Token and URL errors are raised locally before anything is sent.
    pub fn reached_provider(&self) -> bool {
        matches!(
            self,
            PaymentError::NetworkError { .. } | PaymentError::Timeout { .. }
        )
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::NetworkError { .. } | PaymentError::Timeout { .. } => {
                "Payment provider is temporarily unavailable".to_string()
            }
            PaymentError::TokenError { .. } => {
                "Payment provider credentials could not be prepared".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_http_status_mapping_is_correct() {
        assert_eq!(
            PaymentError::ValidationError {
                message: "bad".to_string(),
                field: None
            }
            .http_status_code(),
            400
        );
        assert_eq!(PaymentError::Timeout { timeout_ms: 10 }.http_status_code(), 502);
        assert_eq!(
            PaymentError::TokenError {
                message: "bad pem".to_string()
            }
            .http_status_code(),
            500
        );
    }

    #[test]
    fn only_transport_failures_reached_provider() {
        assert!(PaymentError::Timeout { timeout_ms: 10 }.reached_provider());
        assert!(PaymentError::NetworkError {
            message: "reset".to_string()
        }
        .reached_provider());
        assert!(!PaymentError::TokenError {
            message: "bad pem".to_string()
        }
        .reached_provider());
        assert!(!PaymentError::ValidationError {
            message: "bad url".to_string(),
            field: Some("MPESA_BASE_URL".to_string())
        }
        .reached_provider());
    }

    #[test]
    fn user_message_hides_transport_detail() {
        let err = PaymentError::NetworkError {
            message: "connection refused to 10.0.0.1:18352".to_string(),
        };
        assert!(!err.user_message().contains("10.0.0.1"));
    }
}
