use crate::payments::error::PaymentError;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

/// Loosely-typed JSON object as received from callers and the provider.
pub type Payload = serde_json::Map<String, JsonValue>;

/// The provider's "request accepted / operation succeeded" response code.
pub const ACCEPTED_CODE: &str = "INS-0";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Pending,
    Processing,
    Paid,
    Failed,
    Cancelled,
    Unknown,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Pending => "pending",
            PaymentState::Processing => "processing",
            PaymentState::Paid => "paid",
            PaymentState::Failed => "failed",
            PaymentState::Cancelled => "cancelled",
            PaymentState::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for PaymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PaymentState {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Ok(PaymentState::Pending),
            "processing" => Ok(PaymentState::Processing),
            "paid" => Ok(PaymentState::Paid),
            "failed" => Ok(PaymentState::Failed),
            "cancelled" | "canceled" => Ok(PaymentState::Cancelled),
            "unknown" => Ok(PaymentState::Unknown),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported payment status: {}", value),
                field: Some("status".to_string()),
            }),
        }
    }
}

/// Customer-to-business payment request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct C2bPaymentRequest {
    pub transaction_reference: String,
    pub msisdn: String,
    pub amount: BigDecimal,
    pub third_party_reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusQueryRequest {
    pub query_reference: String,
    pub third_party_reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReversalRequest {
    pub transaction_id: String,
    pub third_party_reference: String,
    pub amount: Option<BigDecimal>,
}

/// Raw outcome of one provider HTTP call.
///
/// `data` is parsed JSON when the body was JSON, otherwise the raw text as a
/// JSON string. Callers must not assume it is an object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub ok: bool,
    pub status: u16,
    pub data: JsonValue,
}

impl ProviderResponse {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.data.get(name).and_then(JsonValue::as_str)
    }

    pub fn response_code(&self) -> Option<&str> {
        self.field("output_ResponseCode")
    }

    pub fn response_desc(&self) -> Option<&str> {
        self.field("output_ResponseDesc")
    }

    pub fn is_accepted(&self) -> bool {
        self.ok && self.response_code() == Some(ACCEPTED_CODE)
    }

    /// Code/description pair safe to hand back to the HTTP caller.
    pub fn summary(&self) -> JsonValue {
        serde_json::json!({
            "httpStatus": self.status,
            "responseCode": self.response_code(),
            "responseDesc": self.response_desc(),
        })
    }
}

// ============================================================================
// Status normalization, one function per provider call type
// ============================================================================

/// Initiation: only the accepted code moves an order forward.
pub fn initiate_outcome(response: &ProviderResponse) -> PaymentState {
    if response.is_accepted() {
        PaymentState::Processing
    } else {
        PaymentState::Failed
    }
}

/// Fields inspected for a callback's reported status, highest priority first.
pub const CALLBACK_STATUS_FIELDS: &[&str] = &[
    "status",
    "transactionStatus",
    "paymentStatus",
    "output_ResponseTransactionStatus",
    "resultCode",
    "result_code",
    "input_ResultCode",
    "output_ResponseCode",
];

/// Callback: numeric `0` and success words are paid, failure words are
/// failed, everything else is left as unknown.
pub fn callback_state(payload: &Payload) -> PaymentState {
    let reported = CALLBACK_STATUS_FIELDS
        .iter()
        .find_map(|field| payload.get(*field).filter(|v| !v.is_null()));

    match reported {
        Some(JsonValue::Number(n)) => {
            if n.as_f64() == Some(0.0) {
                PaymentState::Paid
            } else {
                PaymentState::Unknown
            }
        }
        Some(JsonValue::String(s)) => match s.trim().to_lowercase().as_str() {
            "0" | "success" | "paid" | "complete" | "completed" | "ins-0" => PaymentState::Paid,
            "failed" | "cancelled" | "canceled" | "error" => PaymentState::Failed,
            _ => PaymentState::Unknown,
        },
        _ => PaymentState::Unknown,
    }
}

/// Status query: `None` means "leave the order as it is".
pub fn status_poll_state(transaction_status: Option<&str>) -> Option<PaymentState> {
    match transaction_status?.trim().to_lowercase().as_str() {
        "completed" => Some(PaymentState::Paid),
        "cancelled" | "canceled" | "expired" => Some(PaymentState::Failed),
        _ => None,
    }
}

pub fn reversal_succeeded(response: &ProviderResponse) -> bool {
    response.is_accepted()
}

// ============================================================================
// Payload field helpers
// ============================================================================

/// Non-empty string value of `field`; numbers are rendered as text.
pub fn field_text(payload: &Payload, field: &str) -> Option<String> {
    match payload.get(field)? {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First non-empty value among `fields`, in order.
pub fn first_text(payload: &Payload, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|field| field_text(payload, field))
}

pub fn parse_amount(value: &JsonValue) -> Option<BigDecimal> {
    match value {
        JsonValue::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        JsonValue::String(s) => BigDecimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

/// Renders an amount the way the provider expects (`500`, `12.5`).
pub fn format_amount(amount: &BigDecimal) -> String {
    let text = amount.to_string();
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text
    }
}

// ============================================================================
// HTTP response bodies
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateResponse {
    pub success: bool,
    pub status: PaymentState,
    pub transaction_id: Option<String>,
    pub reference: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResponse {
    pub success: bool,
    pub data: JsonValue,
}

/// Acknowledgement body the provider expects back from a callback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallbackAck {
    #[serde(rename = "output_OriginalConversationID")]
    pub original_conversation_id: String,
    #[serde(rename = "output_ResponseDesc")]
    pub response_desc: String,
    #[serde(rename = "output_ResponseCode")]
    pub response_code: String,
    #[serde(rename = "output_ThirdPartyConversationID")]
    pub third_party_conversation_id: String,
}

impl CallbackAck {
    pub fn accepted(payload: &Payload) -> Self {
        Self::with_code(payload, "0", "Successfully Accepted Result")
    }

    pub fn rejected(payload: &Payload, description: &str) -> Self {
        Self::with_code(payload, "1", description)
    }

    fn with_code(payload: &Payload, code: &str, description: &str) -> Self {
        Self {
            original_conversation_id: first_text(
                payload,
                &["input_OriginalConversationID", "output_ConversationID"],
            )
            .unwrap_or_default(),
            response_desc: description.to_string(),
            response_code: code.to_string(),
            third_party_conversation_id: first_text(
                payload,
                &["input_ThirdPartyConversationID", "output_ThirdPartyConversationID"],
            )
            .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: JsonValue) -> Payload {
        value.as_object().cloned().unwrap()
    }

    fn response(ok: bool, data: JsonValue) -> ProviderResponse {
        ProviderResponse {
            ok,
            status: if ok { 201 } else { 400 },
            data,
        }
    }

    #[test]
    fn initiate_requires_exact_accepted_code() {
        assert_eq!(
            initiate_outcome(&response(true, json!({"output_ResponseCode": "INS-0"}))),
            PaymentState::Processing
        );
        assert_eq!(
            initiate_outcome(&response(true, json!({"output_ResponseCode": "0"}))),
            PaymentState::Failed
        );
        assert_eq!(
            initiate_outcome(&response(true, json!({"output_ResponseCode": "INS-2006"}))),
            PaymentState::Failed
        );
        assert_eq!(
            initiate_outcome(&response(false, json!({"output_ResponseCode": "INS-0"}))),
            PaymentState::Failed
        );
        assert_eq!(
            initiate_outcome(&response(true, json!("<html>bad gateway</html>"))),
            PaymentState::Failed
        );
    }

    #[test]
    fn callback_numeric_zero_is_paid() {
        assert_eq!(callback_state(&payload(json!({"status": 0}))), PaymentState::Paid);
        assert_eq!(
            callback_state(&payload(json!({"status": 17}))),
            PaymentState::Unknown
        );
    }

    #[test]
    fn callback_words_are_normalized() {
        for word in ["success", "PAID", "Complete", "completed", "0", "INS-0"] {
            assert_eq!(
                callback_state(&payload(json!({"status": word}))),
                PaymentState::Paid,
                "{}",
                word
            );
        }
        for word in ["failed", "Cancelled", "canceled", "ERROR"] {
            assert_eq!(
                callback_state(&payload(json!({"transactionStatus": word}))),
                PaymentState::Failed,
                "{}",
                word
            );
        }
        assert_eq!(
            callback_state(&payload(json!({"status": "queued"}))),
            PaymentState::Unknown
        );
        assert_eq!(callback_state(&payload(json!({}))), PaymentState::Unknown);
    }

    #[test]
    fn callback_status_fields_follow_priority() {
        let p = payload(json!({"output_ResponseCode": "INS-0", "status": "failed"}));
        assert_eq!(callback_state(&p), PaymentState::Failed);

        let p = payload(json!({"status": null, "resultCode": 0}));
        assert_eq!(callback_state(&p), PaymentState::Paid);
    }

    #[test]
    fn status_poll_only_maps_terminal_words() {
        assert_eq!(status_poll_state(Some("Completed")), Some(PaymentState::Paid));
        assert_eq!(status_poll_state(Some("Cancelled")), Some(PaymentState::Failed));
        assert_eq!(status_poll_state(Some("Expired")), Some(PaymentState::Failed));
        assert_eq!(status_poll_state(Some("Pending")), None);
        assert_eq!(status_poll_state(Some("N/A")), None);
        assert_eq!(status_poll_state(None), None);
    }

    #[test]
    fn amounts_parse_from_numbers_and_strings() {
        assert_eq!(
            parse_amount(&json!(500)).map(|a| format_amount(&a)),
            Some("500".to_string())
        );
        assert_eq!(
            parse_amount(&json!("12.50")).map(|a| format_amount(&a)),
            Some("12.5".to_string())
        );
        assert!(parse_amount(&json!("five")).is_none());
        assert!(parse_amount(&json!(null)).is_none());
    }

    #[test]
    fn callback_ack_serializes_provider_field_names() {
        let p = payload(json!({
            "input_OriginalConversationID": "conv-1",
            "input_ThirdPartyConversationID": "tp-1"
        }));
        let ack = serde_json::to_value(CallbackAck::rejected(&p, "Order not found")).unwrap();
        assert_eq!(ack["output_ResponseCode"], "1");
        assert_eq!(ack["output_ResponseDesc"], "Order not found");
        assert_eq!(ack["output_OriginalConversationID"], "conv-1");
        assert_eq!(ack["output_ThirdPartyConversationID"], "tp-1");
    }

    #[test]
    fn initiate_response_uses_camel_case() {
        let body = serde_json::to_value(InitiateResponse {
            success: true,
            status: PaymentState::Processing,
            transaction_id: Some("TX1".to_string()),
            reference: Some("ORD-001".to_string()),
            message: "accepted".to_string(),
        })
        .unwrap();
        assert_eq!(body["status"], "processing");
        assert_eq!(body["transactionId"], "TX1");
    }
}
