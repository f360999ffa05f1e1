use crate::payments::error::PaymentResult;
use crate::payments::types::{
    C2bPaymentRequest, ProviderResponse, ReversalRequest, StatusQueryRequest,
};
use async_trait::async_trait;

/// Outbound operations against the mobile-money network.
///
/// Implementations make exactly one attempt per call. `Ok` means the provider
/// answered (whatever it said); `Err` means the outcome is unknown.
#[async_trait]
pub trait MobileMoneyProvider: Send + Sync {
    async fn initiate_payment(&self, request: C2bPaymentRequest) -> PaymentResult<ProviderResponse>;

    async fn query_transaction_status(
        &self,
        request: StatusQueryRequest,
    ) -> PaymentResult<ProviderResponse>;

    async fn reverse_transaction(&self, request: ReversalRequest)
        -> PaymentResult<ProviderResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::initiate_outcome;
    use crate::payments::types::PaymentState;

    struct MockProvider;

    #[async_trait]
    impl MobileMoneyProvider for MockProvider {
        async fn initiate_payment(
            &self,
            request: C2bPaymentRequest,
        ) -> PaymentResult<ProviderResponse> {
            Ok(ProviderResponse {
                ok: true,
                status: 201,
                data: serde_json::json!({
                    "output_ResponseCode": "INS-0",
                    "output_TransactionID": "mock_tx",
                    "output_ThirdPartyReference": request.third_party_reference,
                }),
            })
        }

        async fn query_transaction_status(
            &self,
            _request: StatusQueryRequest,
        ) -> PaymentResult<ProviderResponse> {
            Ok(ProviderResponse {
                ok: true,
                status: 200,
                data: serde_json::json!({"output_ResponseTransactionStatus": "Completed"}),
            })
        }

        async fn reverse_transaction(
            &self,
            _request: ReversalRequest,
        ) -> PaymentResult<ProviderResponse> {
            Ok(ProviderResponse {
                ok: false,
                status: 400,
                data: serde_json::json!({"output_ResponseCode": "INS-2001"}),
            })
        }
    }

    #[tokio::test]
    async fn trait_can_be_implemented_by_mock_provider() {
        let provider: Box<dyn MobileMoneyProvider> = Box::new(MockProvider);
        let response = provider
            .initiate_payment(C2bPaymentRequest {
                transaction_reference: "ORD001".to_string(),
                msisdn: "258841234567".to_string(),
                amount: bigdecimal::BigDecimal::from(500),
                third_party_reference: "ORD-001".to_string(),
            })
            .await
            .expect("initiation should reach the provider");
        assert_eq!(initiate_outcome(&response), PaymentState::Processing);
        assert_eq!(response.field("output_ThirdPartyReference"), Some("ORD-001"));

        let reversal = provider
            .reverse_transaction(ReversalRequest {
                transaction_id: "mock_tx".to_string(),
                third_party_reference: "ORD-001".to_string(),
                amount: None,
            })
            .await
            .expect("reversal should reach the provider");
        assert!(!reversal.is_accepted());
    }
}
