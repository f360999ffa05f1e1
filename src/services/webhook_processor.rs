use crate::database::error::DatabaseResult;
use crate::database::order_repository::{FailedUpdate, FailureCause, PaidUpdate};
use crate::database::OrderStore;
use crate::payments::types::{
    callback_state, first_text, parse_amount, CallbackAck, Payload, PaymentState,
};
use crate::services::order_resolver::{unmatched_identifiers, OrderResolver, TRANSACTION_ID_FIELDS};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, info, warn};

const CALLBACK_REFERENCE_FIELDS: &[&str] = &[
    "input_ThirdPartyReference",
    "thirdPartyReference",
    "reference",
];
const CALLBACK_AMOUNT_FIELDS: &[&str] = &["amount", "input_Amount"];

/// Applies provider callbacks to orders.
///
/// Callbacks are unsigned. They are matched through the resolver and only
/// ever applied with the store's guarded transitions, so a replayed or
/// reordered callback cannot move a paid order backwards.
pub struct WebhookProcessor {
    store: Arc<dyn OrderStore>,
    resolver: OrderResolver,
}

impl WebhookProcessor {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self {
            resolver: OrderResolver::new(store.clone()),
            store,
        }
    }

    /// Processes one callback and returns the acknowledgement for the provider.
    ///
    /// An unmatched order is acknowledged with code `1` rather than an error
    /// status so the provider does not keep redelivering it.
    pub async fn process_callback(&self, payload: &Payload) -> DatabaseResult<CallbackAck> {
        let Some(order_id) = self.resolver.resolve(payload).await? else {
            let (reference, transaction_id) = unmatched_identifiers(payload);
            warn!(
                reference = ?reference,
                transaction_id = ?transaction_id,
                "Callback for unknown order; needs manual reconciliation"
            );
            return Ok(CallbackAck::rejected(payload, "Order not found"));
        };

        let raw_response = JsonValue::Object(payload.clone());
        let transaction_id = first_text(payload, TRANSACTION_ID_FIELDS);
        let reference = first_text(payload, CALLBACK_REFERENCE_FIELDS);
        let state = callback_state(payload);

        debug!(order_id = %order_id, state = %state, "Callback normalized");

        let updated = match state {
            PaymentState::Paid => {
                let amount = CALLBACK_AMOUNT_FIELDS
                    .iter()
                    .find_map(|field| payload.get(*field).and_then(parse_amount));
                self.store
                    .mark_paid(PaidUpdate {
                        order_id,
                        transaction_id: transaction_id.clone(),
                        reference,
                        amount,
                        raw_response,
                    })
                    .await
            }
            PaymentState::Failed => {
                self.store
                    .mark_failed(FailedUpdate {
                        order_id,
                        transaction_id: transaction_id.clone(),
                        reference,
                        raw_response,
                        cause: FailureCause::Declined,
                    })
                    .await
            }
            _ => self.store.record_provider_response(order_id, raw_response).await,
        };

        let order = match updated {
            Ok(order) => order,
            Err(err) if err.is_not_found() => {
                warn!(order_id = %order_id, "Callback resolved to an order that does not exist");
                return Ok(CallbackAck::rejected(payload, "Order not found"));
            }
            Err(err) => return Err(err),
        };

        if state == PaymentState::Paid && order.status == PaymentState::Cancelled {
            warn!(order_id = %order.id, "Payment reported for a cancelled order; left cancelled");
        }

        info!(
            order_id = %order.id,
            transaction_id = ?transaction_id,
            reported = %state,
            status = %order.status,
            "Callback processed"
        );

        Ok(CallbackAck::accepted(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{InMemoryOrderStore, Order};
    use bigdecimal::BigDecimal;
    use serde_json::json;

    fn payload(value: JsonValue) -> Payload {
        value.as_object().cloned().unwrap()
    }

    async fn processor_with(order: Order) -> (WebhookProcessor, Arc<InMemoryOrderStore>) {
        let store = Arc::new(InMemoryOrderStore::new());
        store.insert(order).await;
        (WebhookProcessor::new(store.clone()), store)
    }

    fn processing(number: &str) -> Order {
        let mut order = Order::new(number, BigDecimal::from(500));
        order.status = PaymentState::Processing;
        order
    }

    #[tokio::test]
    async fn numeric_zero_marks_paid() {
        let order = processing("ORD-001");
        let (processor, store) = processor_with(order.clone()).await;

        let ack = processor
            .process_callback(&payload(json!({"orderNumber": "ORD-001", "status": 0})))
            .await
            .unwrap();

        assert_eq!(ack.response_code, "0");
        let stored = store.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentState::Paid);
        assert_eq!(stored.amount_paid, Some(BigDecimal::from(500)));
    }

    #[tokio::test]
    async fn provider_amount_is_recorded() {
        let order = processing("ORD-002");
        let (processor, store) = processor_with(order.clone()).await;

        processor
            .process_callback(&payload(json!({
                "input_ThirdPartyReference": "ORD-002",
                "input_TransactionID": "TX2",
                "input_ResultCode": "INS-0",
                "input_Amount": "450.00",
                "input_OriginalConversationID": "conv-1",
            })))
            .await
            .unwrap();

        let stored = store.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentState::Paid);
        assert_eq!(stored.mpesa_transaction_id.as_deref(), Some("TX2"));
        assert_eq!(stored.amount_paid.unwrap().to_string(), "450.00");
    }

    #[tokio::test]
    async fn duplicate_callback_is_acknowledged_and_unchanged() {
        let order = processing("ORD-003");
        let (processor, store) = processor_with(order.clone()).await;
        let callback = payload(json!({"orderNumber": "ORD-003", "status": "completed"}));

        processor.process_callback(&callback).await.unwrap();
        let first = store.find_by_id(order.id).await.unwrap().unwrap();
        let ack = processor.process_callback(&callback).await.unwrap();
        let second = store.find_by_id(order.id).await.unwrap().unwrap();

        assert_eq!(ack.response_code, "0");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn late_failure_does_not_unpay() {
        let mut order = processing("ORD-004");
        order.status = PaymentState::Paid;
        let (processor, store) = processor_with(order.clone()).await;

        processor
            .process_callback(&payload(json!({"orderNumber": "ORD-004", "status": "failed"})))
            .await
            .unwrap();

        let stored = store.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentState::Paid);
    }

    #[tokio::test]
    async fn unrecognised_status_only_records_response() {
        let mut order = processing("ORD-005");
        order.status = PaymentState::Pending;
        let (processor, store) = processor_with(order.clone()).await;

        processor
            .process_callback(&payload(json!({"orderNumber": "ORD-005", "status": "queued"})))
            .await
            .unwrap();

        let stored = store.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentState::Processing);
        assert_eq!(stored.mpesa_last_response.unwrap()["status"], "queued");
    }

    #[tokio::test]
    async fn unknown_order_gets_not_found_ack() {
        let order = processing("ORD-001");
        let (processor, store) = processor_with(order.clone()).await;

        let ack = processor
            .process_callback(&payload(json!({
                "orderNumber": "ORD-404",
                "status": 0,
                "input_OriginalConversationID": "conv-9",
                "input_ThirdPartyConversationID": "tp-9",
            })))
            .await
            .unwrap();

        assert_eq!(ack.response_code, "1");
        assert_eq!(ack.response_desc, "Order not found");
        assert_eq!(ack.original_conversation_id, "conv-9");
        assert_eq!(ack.third_party_conversation_id, "tp-9");
        let stored = store.find_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored, order);
    }

    #[tokio::test]
    async fn dangling_order_id_gets_not_found_ack() {
        let (processor, _) = processor_with(processing("ORD-001")).await;

        let ack = processor
            .process_callback(&payload(json!({
                "orderId": uuid::Uuid::new_v4().to_string(),
                "status": 0,
            })))
            .await
            .unwrap();

        assert_eq!(ack.response_code, "1");
    }
}
