//! Order resolution for inbound payloads
//!
//! Storefront requests and provider callbacks name the order in different
//! ways: an order id, an order number (with or without the `ORD-` dash), or
//! only the provider-side reference or transaction id. The resolver tries
//! them in a fixed order and never invents an order.

use crate::database::error::DatabaseResult;
use crate::database::OrderStore;
use crate::payments::types::{first_text, Payload};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Fields that may carry an order id, order number or reference, highest
/// priority first.
pub const ORDER_REFERENCE_FIELDS: &[&str] = &[
    "orderId",
    "order_id",
    "orderNumber",
    "order_number",
    "reference",
    "thirdPartyReference",
    "input_ThirdPartyReference",
    "input_OriginalConversationID",
    "transactionReference",
    "transactionId",
    "transaction_id",
    "input_TransactionID",
];

/// Fields that may carry the provider transaction id.
pub const TRANSACTION_ID_FIELDS: &[&str] = &[
    "input_TransactionID",
    "transactionId",
    "transaction_id",
    "output_TransactionID",
];

const ORDER_NUMBER_PREFIX: &str = "ORD";

/// String value of a reference field, as sent.
fn string_candidate(payload: &Payload, field: &str) -> Option<String> {
    match payload.get(field)? {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

fn as_order_id(value: &str) -> Option<Uuid> {
    let id = Uuid::parse_str(value).ok()?;
    // v1..=v5 only; nil, max and newer layouts are treated as plain references
    matches!(id.get_version_num(), 1..=5).then_some(id)
}

/// Order-number spellings to try for a reference, in order.
pub fn order_number_variants(reference: &str) -> Vec<String> {
    let upper = reference.trim().to_uppercase();
    let dashed_prefix = format!("{}-", ORDER_NUMBER_PREFIX);

    let mut variants = vec![upper.clone()];
    if let Some(rest) = upper.strip_prefix(&dashed_prefix) {
        variants.push(format!("{}{}", ORDER_NUMBER_PREFIX, rest));
    } else if let Some(rest) = upper.strip_prefix(ORDER_NUMBER_PREFIX) {
        variants.push(format!("{}{}", dashed_prefix, rest));
    }
    if reference != upper {
        variants.push(reference.to_string());
    }
    variants
}

/// Reference and transaction id worth logging when a payload cannot be matched.
pub fn unmatched_identifiers(payload: &Payload) -> (Option<String>, Option<String>) {
    (
        first_text(payload, ORDER_REFERENCE_FIELDS),
        first_text(payload, TRANSACTION_ID_FIELDS),
    )
}

pub struct OrderResolver {
    store: Arc<dyn OrderStore>,
}

impl OrderResolver {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    /// Maps a payload to an order id. `Ok(None)` means no order matched.
    pub async fn resolve(&self, payload: &Payload) -> DatabaseResult<Option<Uuid>> {
        let candidates: Vec<(&str, String)> = ORDER_REFERENCE_FIELDS
            .iter()
            .filter_map(|field| string_candidate(payload, field).map(|value| (*field, value)))
            .collect();

        if let Some((field, id)) = candidates
            .iter()
            .find_map(|(field, value)| as_order_id(value).map(|id| (*field, id)))
        {
            debug!(field = field, order_id = %id, "Order id taken from payload");
            return Ok(Some(id));
        }

        if let Some((field, reference)) = candidates.first() {
            for variant in order_number_variants(reference) {
                if let Some(order) = self.store.find_by_order_number(&variant).await? {
                    debug!(field = field, order_number = %variant, "Order matched by number");
                    return Ok(Some(order.id));
                }
            }

            if let Some(order) = self.store.find_by_mpesa_reference(reference).await? {
                debug!(field = field, reference = %reference, "Order matched by provider reference");
                return Ok(Some(order.id));
            }
        }

        if let Some(transaction_id) = first_text(payload, TRANSACTION_ID_FIELDS) {
            if let Some(order) = self
                .store
                .find_by_mpesa_transaction_id(&transaction_id)
                .await?
            {
                debug!(transaction_id = %transaction_id, "Order matched by provider transaction id");
                return Ok(Some(order.id));
            }
        }

        Ok(None)
    }
}
