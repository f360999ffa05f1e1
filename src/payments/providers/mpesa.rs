use crate::config::MpesaConfig;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::MobileMoneyProvider;
use crate::payments::types::{
    format_amount, C2bPaymentRequest, Payload, ProviderResponse, ReversalRequest,
    StatusQueryRequest,
};
use crate::payments::utils::{ProviderHttpClient, ProviderRequest};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::info;

/// Longest `input_TransactionReference` the provider accepts.
const MAX_TRANSACTION_REFERENCE_LEN: usize = 20;

/// M-Pesa OpenAPI client: C2B single-stage payment, transaction status
/// query and reversal.
pub struct MpesaProvider {
    config: Arc<MpesaConfig>,
    http: ProviderHttpClient,
}

impl MpesaProvider {
    pub fn new(config: Arc<MpesaConfig>) -> PaymentResult<Self> {
        Ok(Self {
            config,
            http: ProviderHttpClient::new()?,
        })
    }

    fn setting<'a>(value: &'a Option<String>, name: &str) -> PaymentResult<&'a str> {
        value
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| PaymentError::ValidationError {
                message: format!("{} is not configured", name),
                field: Some(name.to_string()),
            })
    }

    fn service_provider_code(&self) -> PaymentResult<&str> {
        Self::setting(
            &self.config.service_provider_code,
            "MPESA_SERVICE_PROVIDER_CODE",
        )
    }

    async fn call(
        &self,
        base_url: Option<&str>,
        endpoint: &str,
        method: Method,
        payload: &Payload,
    ) -> PaymentResult<ProviderResponse> {
        let base_url = base_url.ok_or_else(|| PaymentError::ValidationError {
            message: "MPESA_BASE_URL is not configured".to_string(),
            field: Some("MPESA_BASE_URL".to_string()),
        })?;

        self.http
            .request(ProviderRequest {
                base_url,
                endpoint,
                method,
                api_key: Self::setting(&self.config.api_key, "MPESA_API_KEY")?,
                public_key: Self::setting(&self.config.public_key, "MPESA_PUBLIC_KEY")?,
                origin: self.config.origin.as_deref(),
                payload,
                timeout: self.config.timeout(),
            })
            .await
    }
}

#[async_trait]
impl MobileMoneyProvider for MpesaProvider {
    async fn initiate_payment(&self, request: C2bPaymentRequest) -> PaymentResult<ProviderResponse> {
        let payload = object(serde_json::json!({
            "input_TransactionReference": request.transaction_reference,
            "input_CustomerMSISDN": request.msisdn,
            "input_Amount": format_amount(&request.amount),
            "input_ThirdPartyReference": request.third_party_reference,
            "input_ServiceProviderCode": self.service_provider_code()?,
        }));

        let response = self
            .call(
                self.config.base_url.as_deref(),
                &self.config.c2b_path,
                Method::POST,
                &payload,
            )
            .await?;
        info!(
            third_party_reference = %request.third_party_reference,
            status = response.status,
            response_code = response.response_code().unwrap_or("-"),
            "mpesa c2b payment requested"
        );
        Ok(response)
    }

    async fn query_transaction_status(
        &self,
        request: StatusQueryRequest,
    ) -> PaymentResult<ProviderResponse> {
        let payload = object(serde_json::json!({
            "input_ThirdPartyReference": request.third_party_reference,
            "input_QueryReference": request.query_reference,
            "input_ServiceProviderCode": self.service_provider_code()?,
        }));

        let response = self
            .call(
                self.config.status_base_url(),
                &self.config.status_path,
                Method::GET,
                &payload,
            )
            .await?;
        info!(
            query_reference = %request.query_reference,
            status = response.status,
            transaction_status = response
                .field("output_ResponseTransactionStatus")
                .unwrap_or("-"),
            "mpesa transaction status queried"
        );
        Ok(response)
    }

    async fn reverse_transaction(&self, request: ReversalRequest) -> PaymentResult<ProviderResponse> {
        let mut payload = object(serde_json::json!({
            "input_TransactionID": request.transaction_id,
            "input_SecurityCredential": Self::setting(
                &self.config.security_credential,
                "MPESA_SECURITY_CREDENTIAL",
            )?,
            "input_InitiatorIdentifier": Self::setting(
                &self.config.initiator_identifier,
                "MPESA_INITIATOR_IDENTIFIER",
            )?,
            "input_ThirdPartyReference": request.third_party_reference,
            "input_ServiceProviderCode": self.service_provider_code()?,
        }));
        if let Some(amount) = &request.amount {
            payload.insert(
                "input_ReversalAmount".to_string(),
                JsonValue::String(format_amount(amount)),
            );
        }

        let response = self
            .call(
                self.config.reversal_base_url(),
                &self.config.reversal_path,
                Method::PUT,
                &payload,
            )
            .await?;
        info!(
            transaction_id = %request.transaction_id,
            status = response.status,
            response_code = response.response_code().unwrap_or("-"),
            "mpesa reversal requested"
        );
        Ok(response)
    }
}

fn object(value: JsonValue) -> Payload {
    match value {
        JsonValue::Object(map) => map,
        _ => Payload::new(),
    }
}

/// Digits-only MSISDN with the country code; `None` when it is too short
/// to be a subscriber number.
pub fn normalize_msisdn(phone: &str, country_code: &str) -> Option<String> {
    let trimmed = phone.trim();
    let trimmed = trimmed.strip_prefix("00").unwrap_or(trimmed);
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.len() {
        0..=8 => None,
        9 => Some(format!("{}{}", country_code, digits)),
        _ => Some(digits),
    }
}

/// Provider-side transaction reference derived from an order number.
pub fn transaction_reference_for(order_number: &str) -> String {
    order_number
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(MAX_TRANSACTION_REFERENCE_LEN)
        .collect()
}
