//! Payment lifecycle driven by the signed storefront endpoints.
//!
//! Initiation, status polling and reversal each make one provider call and
//! then apply at most one guarded store transition. Nothing here retries;
//! the storefront re-initiates when it wants another attempt.

use crate::database::order_repository::{FailedUpdate, FailureCause, PaidUpdate, ProcessingUpdate};
use crate::database::{Order, OrderStore};
use crate::error::GatewayError;
use crate::logging::mask_msisdn;
use crate::payments::provider::MobileMoneyProvider;
use crate::payments::providers::mpesa::{normalize_msisdn, transaction_reference_for};
use crate::payments::types::{
    first_text, initiate_outcome, parse_amount, reversal_succeeded, status_poll_state,
    C2bPaymentRequest, InitiateResponse, OperationResponse, Payload, PaymentState,
    ProviderResponse, ReversalRequest, StatusQueryRequest,
};
use crate::services::order_resolver::{unmatched_identifiers, OrderResolver};
use bigdecimal::BigDecimal;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

const PHONE_FIELDS: &[&str] = &["phone", "msisdn", "phoneNumber"];
const REQUEST_TRANSACTION_ID_FIELDS: &[&str] = &["transactionId", "transaction_id"];
const QUERY_REFERENCE_FIELDS: &[&str] = &["queryReference", "transactionId", "transaction_id"];
const THIRD_PARTY_REFERENCE_FIELDS: &[&str] = &["thirdPartyReference", "reference"];

/// Result of an operation the provider answered.
///
/// `accepted` is false when the provider rejected the request; the handler
/// picks the HTTP status from it, the body is already caller-safe.
#[derive(Debug, Clone)]
pub struct ProviderOutcome<T> {
    pub accepted: bool,
    pub body: T,
}

pub struct PaymentOrchestrator {
    store: Arc<dyn OrderStore>,
    resolver: OrderResolver,
    provider: Arc<dyn MobileMoneyProvider>,
    country_code: String,
}

impl PaymentOrchestrator {
    pub fn new(
        store: Arc<dyn OrderStore>,
        provider: Arc<dyn MobileMoneyProvider>,
        country_code: impl Into<String>,
    ) -> Self {
        Self {
            resolver: OrderResolver::new(store.clone()),
            store,
            provider,
            country_code: country_code.into(),
        }
    }

    async fn find_order(&self, body: &Payload) -> Result<Option<Order>, GatewayError> {
        match self.resolver.resolve(body).await? {
            Some(order_id) => Ok(self.store.find_by_id(order_id).await?),
            None => Ok(None),
        }
    }

    /// Starts a C2B payment for an order.
    pub async fn initiate(
        &self,
        body: &Payload,
    ) -> Result<ProviderOutcome<InitiateResponse>, GatewayError> {
        let order = self.find_order(body).await?.ok_or_else(|| {
            let (reference, _) = unmatched_identifiers(body);
            GatewayError::OrderNotFound { reference }
        })?;

        if !order.is_payable() {
            if order.status == PaymentState::Cancelled {
                warn!(order_id = %order.id, "Payment initiation attempted on cancelled order");
            }
            return Err(GatewayError::OrderNotPayable {
                order_number: order.order_number,
                status: order.status,
            });
        }

        let amount = match body.get("amount").filter(|v| !v.is_null()) {
            Some(value) => parse_amount(value)
                .ok_or_else(|| GatewayError::validation("amount must be a number", "amount"))?,
            None => order.total.clone(),
        };
        if amount <= BigDecimal::from(0) {
            return Err(GatewayError::validation(
                "amount must be greater than zero",
                "amount",
            ));
        }

        let phone = first_text(body, PHONE_FIELDS)
            .ok_or_else(|| GatewayError::validation("phone is required", "phone"))?;
        let msisdn = normalize_msisdn(&phone, &self.country_code)
            .ok_or_else(|| GatewayError::validation("phone is not a valid MSISDN", "phone"))?;

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            msisdn = %mask_msisdn(&msisdn),
            amount = %amount,
            "Initiating M-Pesa payment"
        );

        let request = C2bPaymentRequest {
            transaction_reference: transaction_reference_for(&order.order_number),
            msisdn,
            amount,
            third_party_reference: order.order_number.clone(),
        };

        let response = match self.provider.initiate_payment(request).await {
            Ok(response) => response,
            Err(err) if err.reached_provider() => {
                warn!(order_id = %order.id, error = %err, "Payment initiation failed; marking order failed");
                self.store
                    .mark_failed(FailedUpdate {
                        order_id: order.id,
                        transaction_id: None,
                        reference: None,
                        raw_response: json!({ "error": err.to_string() }),
                        cause: FailureCause::Rejected,
                    })
                    .await?;
                return Err(err.into());
            }
            Err(err) => {
                warn!(order_id = %order.id, error = %err, "Payment initiation could not be prepared");
                return Err(err.into());
            }
        };

        debug!(order_id = %order.id, response = %response.data, "Initiation response");

        let transaction_id = response.field("output_TransactionID").map(str::to_string);
        let reference = response
            .field("output_ThirdPartyReference")
            .map(str::to_string)
            .or_else(|| Some(order.order_number.clone()));

        if initiate_outcome(&response) != PaymentState::Processing {
            warn!(
                order_id = %order.id,
                http_status = response.status,
                response_code = ?response.response_code(),
                "Payment initiation rejected by provider"
            );
            let updated = self
                .store
                .mark_failed(FailedUpdate {
                    order_id: order.id,
                    transaction_id: transaction_id.clone(),
                    reference: None,
                    raw_response: response.data.clone(),
                    cause: FailureCause::Rejected,
                })
                .await?;
            return Ok(ProviderOutcome {
                accepted: false,
                body: InitiateResponse {
                    success: false,
                    status: updated.status,
                    transaction_id,
                    reference: None,
                    message: response
                        .response_desc()
                        .unwrap_or("Payment was not accepted by the provider")
                        .to_string(),
                },
            });
        }

        let updated = self
            .store
            .mark_processing(ProcessingUpdate {
                order_id: order.id,
                transaction_id: transaction_id.clone(),
                reference: reference.clone(),
                raw_response: response.data.clone(),
            })
            .await?;

        info!(
            order_id = %order.id,
            transaction_id = ?transaction_id,
            status = %updated.status,
            "Payment initiation accepted"
        );

        Ok(ProviderOutcome {
            accepted: true,
            body: InitiateResponse {
                success: true,
                status: updated.status,
                transaction_id,
                reference,
                message: response
                    .response_desc()
                    .unwrap_or("Payment initiated")
                    .to_string(),
            },
        })
    }

    /// Queries the provider for a transaction and applies `paid`/`failed`.
    pub async fn poll_status(
        &self,
        body: &Payload,
    ) -> Result<ProviderOutcome<OperationResponse>, GatewayError> {
        let order = self.find_order(body).await?;

        let query_reference = first_text(body, QUERY_REFERENCE_FIELDS)
            .or_else(|| order.as_ref().and_then(|o| o.mpesa_transaction_id.clone()))
            .or_else(|| order.as_ref().and_then(|o| o.mpesa_reference.clone()))
            .or_else(|| order.as_ref().map(|o| o.order_number.clone()))
            .ok_or_else(|| {
                GatewayError::validation("an order or transactionId is required", "transactionId")
            })?;
        let third_party_reference = first_text(body, THIRD_PARTY_REFERENCE_FIELDS)
            .or_else(|| order.as_ref().and_then(|o| o.mpesa_reference.clone()))
            .or_else(|| order.as_ref().map(|o| o.order_number.clone()))
            .unwrap_or_else(|| query_reference.clone());

        info!(
            order_id = ?order.as_ref().map(|o| o.id),
            query_reference = %query_reference,
            "Querying M-Pesa transaction status"
        );

        let response = self
            .provider
            .query_transaction_status(StatusQueryRequest {
                query_reference,
                third_party_reference,
            })
            .await?;

        let reported = response.field("output_ResponseTransactionStatus");
        match (order.as_ref(), response.ok, status_poll_state(reported)) {
            (Some(order), true, Some(PaymentState::Paid)) => {
                let updated = self
                    .store
                    .mark_paid(PaidUpdate {
                        order_id: order.id,
                        transaction_id: response.field("output_TransactionID").map(str::to_string),
                        reference: None,
                        amount: None,
                        raw_response: response.data.clone(),
                    })
                    .await?;
                info!(order_id = %order.id, status = %updated.status, "Status poll reported payment completed");
            }
            (Some(order), true, Some(_)) => {
                let updated = self
                    .store
                    .mark_failed(FailedUpdate {
                        order_id: order.id,
                        transaction_id: None,
                        reference: None,
                        raw_response: response.data.clone(),
                        cause: FailureCause::Declined,
                    })
                    .await?;
                info!(
                    order_id = %order.id,
                    reported = ?reported,
                    status = %updated.status,
                    "Status poll reported payment not completed"
                );
            }
            (None, _, Some(_)) => {
                warn!(reported = ?reported, "Status reported for a transaction with no matching order");
            }
            _ => {}
        }

        Ok(operation_outcome(&response, response.is_accepted()))
    }

    /// Reverses a completed transaction; a successful reversal fails the order.
    pub async fn reverse(
        &self,
        body: &Payload,
    ) -> Result<ProviderOutcome<OperationResponse>, GatewayError> {
        let order = self.find_order(body).await?;

        let transaction_id = first_text(body, REQUEST_TRANSACTION_ID_FIELDS)
            .or_else(|| order.as_ref().and_then(|o| o.mpesa_transaction_id.clone()))
            .ok_or_else(|| {
                GatewayError::validation(
                    "a provider transaction id is required for reversal",
                    "transactionId",
                )
            })?;

        let amount = match body.get("amount").filter(|v| !v.is_null()) {
            Some(value) => {
                let amount = parse_amount(value)
                    .filter(|a| *a > BigDecimal::from(0))
                    .ok_or_else(|| {
                        GatewayError::validation("amount must be a positive number", "amount")
                    })?;
                Some(amount)
            }
            None => order.as_ref().and_then(|o| o.amount_paid.clone()),
        };

        let third_party_reference = first_text(body, THIRD_PARTY_REFERENCE_FIELDS)
            .or_else(|| order.as_ref().map(|o| o.order_number.clone()))
            .unwrap_or_else(|| transaction_id.clone());

        info!(
            order_id = ?order.as_ref().map(|o| o.id),
            transaction_id = %transaction_id,
            "Reversing M-Pesa transaction"
        );

        let response = self
            .provider
            .reverse_transaction(ReversalRequest {
                transaction_id: transaction_id.clone(),
                third_party_reference,
                amount,
            })
            .await?;

        let succeeded = reversal_succeeded(&response);
        if succeeded {
            match order.as_ref() {
                Some(order) => {
                    let updated = self
                        .store
                        .mark_failed(FailedUpdate {
                            order_id: order.id,
                            transaction_id: Some(transaction_id),
                            reference: None,
                            raw_response: response.data.clone(),
                            cause: FailureCause::Reversed,
                        })
                        .await?;
                    info!(order_id = %order.id, status = %updated.status, "Transaction reversed");
                }
                None => {
                    warn!(transaction_id = %transaction_id, "Transaction reversed but no order matched");
                }
            }
        } else {
            warn!(
                transaction_id = %transaction_id,
                http_status = response.status,
                response_code = ?response.response_code(),
                "Reversal rejected by provider"
            );
        }

        Ok(operation_outcome(&response, succeeded))
    }
}

/// Provider data goes back only on success; failures get the summary.
fn operation_outcome(
    response: &ProviderResponse,
    succeeded: bool,
) -> ProviderOutcome<OperationResponse> {
    let data = if succeeded {
        response.data.clone()
    } else {
        response.summary()
    };
    ProviderOutcome {
        accepted: succeeded,
        body: OperationResponse {
            success: succeeded,
            data,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::InMemoryOrderStore;
    use crate::payments::error::{PaymentError, PaymentResult};
    use async_trait::async_trait;
    use serde_json::Value as JsonValue;
    use std::sync::Mutex;

    /// Replies with canned responses and records what it was asked.
    #[derive(Default)]
    struct ScriptedProvider {
        initiate: Mutex<Option<PaymentResult<ProviderResponse>>>,
        status: Mutex<Option<PaymentResult<ProviderResponse>>>,
        reversal: Mutex<Option<PaymentResult<ProviderResponse>>>,
        initiated: Mutex<Vec<C2bPaymentRequest>>,
        queried: Mutex<Vec<StatusQueryRequest>>,
        reversed: Mutex<Vec<ReversalRequest>>,
    }

    fn reply(slot: &Mutex<Option<PaymentResult<ProviderResponse>>>) -> PaymentResult<ProviderResponse> {
        slot.lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(PaymentError::NetworkError {
                message: "no scripted reply".to_string(),
            }))
    }

    #[async_trait]
    impl MobileMoneyProvider for ScriptedProvider {
        async fn initiate_payment(
            &self,
            request: C2bPaymentRequest,
        ) -> PaymentResult<ProviderResponse> {
            self.initiated.lock().unwrap().push(request);
            reply(&self.initiate)
        }

        async fn query_transaction_status(
            &self,
            request: StatusQueryRequest,
        ) -> PaymentResult<ProviderResponse> {
            self.queried.lock().unwrap().push(request);
            reply(&self.status)
        }

        async fn reverse_transaction(
            &self,
            request: ReversalRequest,
        ) -> PaymentResult<ProviderResponse> {
            self.reversed.lock().unwrap().push(request);
            reply(&self.reversal)
        }
    }

    fn ok(status: u16, data: JsonValue) -> PaymentResult<ProviderResponse> {
        Ok(ProviderResponse {
            ok: (200..300).contains(&status),
            status,
            data,
        })
    }

    fn body(value: JsonValue) -> Payload {
        value.as_object().cloned().unwrap()
    }

    async fn setup(
        order: Order,
    ) -> (PaymentOrchestrator, Arc<InMemoryOrderStore>, Arc<ScriptedProvider>) {
        let store = Arc::new(InMemoryOrderStore::new());
        store.insert(order).await;
        let provider = Arc::new(ScriptedProvider::default());
        let orchestrator = PaymentOrchestrator::new(store.clone(), provider.clone(), "258");
        (orchestrator, store, provider)
    }

    #[tokio::test]
    async fn accepted_initiation_marks_processing() {
        let order = Order::new("ORD-001", BigDecimal::from(500));
        let (orchestrator, store, provider) = setup(order.clone()).await;
        *provider.initiate.lock().unwrap() = Some(ok(
            201,
            json!({
                "output_ResponseCode": "INS-0",
                "output_ResponseDesc": "Request processed successfully",
                "output_TransactionID": "TX1",
                "output_ThirdPartyReference": "ORD-001",
            }),
        ));

        let outcome = orchestrator
            .initiate(&body(json!({"orderNumber": "ORD-001", "amount": 500, "phone": "841234567"})))
            .await
            .unwrap();

        assert!(outcome.accepted);
        assert_eq!(outcome.body.status, PaymentState::Processing);
        assert_eq!(outcome.body.transaction_id.as_deref(), Some("TX1"));
        assert_eq!(outcome.body.reference.as_deref(), Some("ORD-001"));

        let sent = provider.initiated.lock().unwrap();
        assert_eq!(sent[0].msisdn, "258841234567");
        assert_eq!(sent[0].transaction_reference, "ORD001");

        let stored = store.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentState::Processing);
        assert_eq!(stored.mpesa_transaction_id.as_deref(), Some("TX1"));
    }

    #[tokio::test]
    async fn missing_amount_uses_order_total() {
        let order = Order::new("ORD-002", BigDecimal::from(750));
        let (orchestrator, _, provider) = setup(order).await;
        *provider.initiate.lock().unwrap() =
            Some(ok(201, json!({"output_ResponseCode": "INS-0"})));

        orchestrator
            .initiate(&body(json!({"orderNumber": "ORD-002", "phone": "+258 84 123 4567"})))
            .await
            .unwrap();

        let sent = provider.initiated.lock().unwrap();
        assert_eq!(sent[0].amount, BigDecimal::from(750));
        assert_eq!(sent[0].msisdn, "258841234567");
    }

    #[tokio::test]
    async fn rejected_initiation_marks_failed() {
        let order = Order::new("ORD-003", BigDecimal::from(10));
        let (orchestrator, store, provider) = setup(order.clone()).await;
        *provider.initiate.lock().unwrap() = Some(ok(
            400,
            json!({"output_ResponseCode": "INS-2006", "output_ResponseDesc": "Insufficient balance"}),
        ));

        let outcome = orchestrator
            .initiate(&body(json!({"orderId": order.id.to_string(), "phone": "841234567"})))
            .await
            .unwrap();

        assert!(!outcome.accepted);
        assert!(!outcome.body.success);
        assert_eq!(outcome.body.status, PaymentState::Failed);
        assert_eq!(outcome.body.message, "Insufficient balance");

        let stored = store.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentState::Failed);
        assert_eq!(
            stored.mpesa_last_response.unwrap()["output_ResponseCode"],
            "INS-2006"
        );
    }

    #[tokio::test]
    async fn network_failure_at_initiation_marks_failed() {
        let order = Order::new("ORD-004", BigDecimal::from(10));
        let (orchestrator, store, provider) = setup(order.clone()).await;
        *provider.initiate.lock().unwrap() = Some(Err(PaymentError::Timeout { timeout_ms: 15000 }));

        let err = orchestrator
            .initiate(&body(json!({"orderNumber": "ORD-004", "phone": "841234567"})))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), 502);
        let stored = store.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentState::Failed);
    }

    #[tokio::test]
    async fn repeated_rejection_of_failed_order_keeps_latest_response() {
        let mut order = Order::new("ORD-015", BigDecimal::from(10));
        order.status = PaymentState::Failed;
        order.mpesa_last_response = Some(json!({"output_ResponseCode": "INS-OLD"}));
        let (orchestrator, store, provider) = setup(order.clone()).await;
        *provider.initiate.lock().unwrap() = Some(ok(
            400,
            json!({
                "output_ResponseCode": "INS-2006",
                "output_ResponseDesc": "Insufficient balance",
                "output_TransactionID": "TX15",
            }),
        ));

        let outcome = orchestrator
            .initiate(&body(json!({"orderNumber": "ORD-015", "phone": "841234567"})))
            .await
            .unwrap();

        assert!(!outcome.accepted);
        assert_eq!(outcome.body.status, PaymentState::Failed);
        let stored = store.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentState::Failed);
        assert_eq!(stored.mpesa_transaction_id.as_deref(), Some("TX15"));
        assert_eq!(
            stored.mpesa_last_response.unwrap()["output_ResponseCode"],
            "INS-2006"
        );
    }

    #[tokio::test]
    async fn local_token_error_leaves_order_unchanged() {
        let order = Order::new("ORD-016", BigDecimal::from(10));
        let (orchestrator, store, provider) = setup(order.clone()).await;
        *provider.initiate.lock().unwrap() = Some(Err(PaymentError::TokenError {
            message: "invalid provider public key".to_string(),
        }));

        let err = orchestrator
            .initiate(&body(json!({"orderNumber": "ORD-016", "phone": "841234567"})))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), 500);
        let stored = store.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentState::Pending);
        assert!(stored.mpesa_last_response.is_none());
    }

    #[tokio::test]
    async fn malformed_provider_url_leaves_order_unchanged() {
        let mut order = Order::new("ORD-017", BigDecimal::from(10));
        order.status = PaymentState::Processing;
        let (orchestrator, store, provider) = setup(order.clone()).await;
        *provider.initiate.lock().unwrap() = Some(Err(PaymentError::ValidationError {
            message: "invalid provider URL".to_string(),
            field: Some("MPESA_BASE_URL".to_string()),
        }));

        orchestrator
            .initiate(&body(json!({"orderNumber": "ORD-017", "phone": "841234567"})))
            .await
            .unwrap_err();

        let stored = store.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentState::Processing);
    }

    #[tokio::test]
    async fn paid_order_is_not_initiated_again() {
        let mut order = Order::new("ORD-005", BigDecimal::from(10));
        order.status = PaymentState::Paid;
        let (orchestrator, _, provider) = setup(order).await;

        let err = orchestrator
            .initiate(&body(json!({"orderNumber": "ORD-005", "phone": "841234567"})))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), 409);
        assert!(provider.initiated.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_phone_is_rejected_before_provider_call() {
        let order = Order::new("ORD-006", BigDecimal::from(10));
        let (orchestrator, _, provider) = setup(order).await;

        let err = orchestrator
            .initiate(&body(json!({"orderNumber": "ORD-006", "phone": "1234"})))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), 400);
        assert!(provider.initiated.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_order_is_404() {
        let (orchestrator, _, provider) =
            setup(Order::new("ORD-007", BigDecimal::from(10))).await;

        let err = orchestrator
            .initiate(&body(json!({"orderNumber": "ORD-999", "phone": "841234567"})))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), 404);
        assert!(provider.initiated.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_status_poll_marks_failed() {
        let mut order = Order::new("ORD-008", BigDecimal::from(10));
        order.status = PaymentState::Processing;
        order.mpesa_transaction_id = Some("TX8".to_string());
        let (orchestrator, store, provider) = setup(order.clone()).await;
        *provider.status.lock().unwrap() = Some(ok(
            200,
            json!({"output_ResponseCode": "INS-0", "output_ResponseTransactionStatus": "Cancelled"}),
        ));

        let outcome = orchestrator
            .poll_status(&body(json!({"orderNumber": "ORD-008"})))
            .await
            .unwrap();

        assert!(outcome.accepted);
        assert_eq!(provider.queried.lock().unwrap()[0].query_reference, "TX8");
        let stored = store.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentState::Failed);
    }

    #[tokio::test]
    async fn completed_status_poll_marks_paid() {
        let mut order = Order::new("ORD-009", BigDecimal::from(10));
        order.status = PaymentState::Processing;
        let (orchestrator, store, provider) = setup(order.clone()).await;
        *provider.status.lock().unwrap() = Some(ok(
            200,
            json!({"output_ResponseCode": "INS-0", "output_ResponseTransactionStatus": "Completed"}),
        ));

        orchestrator
            .poll_status(&body(json!({"orderNumber": "ORD-009", "transactionId": "TX9"})))
            .await
            .unwrap();

        let stored = store.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentState::Paid);
        assert_eq!(stored.amount_paid, Some(BigDecimal::from(10)));
    }

    #[tokio::test]
    async fn pending_status_poll_leaves_order_alone() {
        let mut order = Order::new("ORD-010", BigDecimal::from(10));
        order.status = PaymentState::Processing;
        let (orchestrator, store, provider) = setup(order.clone()).await;
        *provider.status.lock().unwrap() = Some(ok(
            200,
            json!({"output_ResponseCode": "INS-0", "output_ResponseTransactionStatus": "Pending"}),
        ));

        orchestrator
            .poll_status(&body(json!({"orderNumber": "ORD-010"})))
            .await
            .unwrap();

        let stored = store.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentState::Processing);
        assert!(stored.mpesa_last_response.is_none());
    }

    #[tokio::test]
    async fn status_network_error_leaves_state_unchanged() {
        let mut order = Order::new("ORD-011", BigDecimal::from(10));
        order.status = PaymentState::Processing;
        let (orchestrator, store, _) = setup(order.clone()).await;

        let err = orchestrator
            .poll_status(&body(json!({"orderNumber": "ORD-011"})))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), 502);
        let stored = store.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentState::Processing);
    }

    #[tokio::test]
    async fn successful_reversal_fails_paid_order() {
        let mut order = Order::new("ORD-012", BigDecimal::from(10));
        order.status = PaymentState::Paid;
        order.mpesa_transaction_id = Some("TX12".to_string());
        order.amount_paid = Some(BigDecimal::from(10));
        let (orchestrator, store, provider) = setup(order.clone()).await;
        *provider.reversal.lock().unwrap() =
            Some(ok(200, json!({"output_ResponseCode": "INS-0"})));

        let outcome = orchestrator
            .reverse(&body(json!({"orderNumber": "ORD-012"})))
            .await
            .unwrap();

        assert!(outcome.body.success);
        let sent = provider.reversed.lock().unwrap();
        assert_eq!(sent[0].transaction_id, "TX12");
        assert_eq!(sent[0].amount, Some(BigDecimal::from(10)));
        let stored = store.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentState::Failed);
    }

    #[tokio::test]
    async fn rejected_reversal_returns_summary_only() {
        let mut order = Order::new("ORD-013", BigDecimal::from(10));
        order.status = PaymentState::Paid;
        order.mpesa_transaction_id = Some("TX13".to_string());
        let (orchestrator, store, provider) = setup(order.clone()).await;
        *provider.reversal.lock().unwrap() = Some(ok(
            422,
            json!({"output_ResponseCode": "INS-2001", "output_ResponseDesc": "Initiator authentication error", "output_ConversationID": "secret-ish"}),
        ));

        let outcome = orchestrator
            .reverse(&body(json!({"orderNumber": "ORD-013"})))
            .await
            .unwrap();

        assert!(!outcome.accepted);
        assert_eq!(outcome.body.data["responseCode"], "INS-2001");
        assert!(outcome.body.data.get("output_ConversationID").is_none());
        let stored = store.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentState::Paid);
    }

    #[tokio::test]
    async fn reversal_without_transaction_id_is_rejected() {
        let (orchestrator, _, provider) =
            setup(Order::new("ORD-014", BigDecimal::from(10))).await;

        let err = orchestrator
            .reverse(&body(json!({"orderNumber": "ORD-014"})))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), 400);
        assert!(provider.reversed.lock().unwrap().is_empty());
    }
}
