//! Order store contract consumed by the payment gateway.
//!
//! The storefront owns the orders table; the gateway only reads orders and
//! applies a handful of payment transitions. Every transition is a single
//! atomic guarded update, so concurrent callbacks and status polls converge
//! on the same end state without gateway-side locking.

use crate::database::error::{DatabaseError, DatabaseResult};
use crate::payments::types::PaymentState;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Order entity, as far as payments are concerned
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub total: BigDecimal,
    pub status: PaymentState,
    pub mpesa_transaction_id: Option<String>,
    pub mpesa_reference: Option<String>,
    pub mpesa_last_response: Option<JsonValue>,
    pub amount_paid: Option<BigDecimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(order_number: impl Into<String>, total: BigDecimal) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_number: order_number.into(),
            total,
            status: PaymentState::Pending,
            mpesa_transaction_id: None,
            mpesa_reference: None,
            mpesa_last_response: None,
            amount_paid: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a new payment attempt may be started for this order.
    pub fn is_payable(&self) -> bool {
        Transition::Processing.allowed_from().contains(&self.status)
    }
}

/// Why an order is being marked failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// Provider declined, cancelled or expired the payment
    Declined,
    /// A new initiation attempt was refused or never got an answer.
    /// Also applies to an order that is already failed, so the latest
    /// attempt's response replaces the previous one.
    Rejected,
    /// A completed payment was reversed by an operator
    Reversed,
}

/// Initiation accepted by the provider
#[derive(Debug, Clone)]
pub struct ProcessingUpdate {
    pub order_id: Uuid,
    pub transaction_id: Option<String>,
    pub reference: Option<String>,
    pub raw_response: JsonValue,
}

#[derive(Debug, Clone)]
pub struct PaidUpdate {
    pub order_id: Uuid,
    pub transaction_id: Option<String>,
    pub reference: Option<String>,
    pub amount: Option<BigDecimal>,
    pub raw_response: JsonValue,
}

#[derive(Debug, Clone)]
pub struct FailedUpdate {
    pub order_id: Uuid,
    pub transaction_id: Option<String>,
    pub reference: Option<String>,
    pub raw_response: JsonValue,
    pub cause: FailureCause,
}

/// Guarded status changes the gateway may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Processing,
    Paid,
    Failed(FailureCause),
}

impl Transition {
    pub fn target(&self) -> PaymentState {
        match self {
            Transition::Processing => PaymentState::Processing,
            Transition::Paid => PaymentState::Paid,
            Transition::Failed(_) => PaymentState::Failed,
        }
    }

    /// States the transition applies from; from any other state it is a no-op.
    pub fn allowed_from(&self) -> &'static [PaymentState] {
        match self {
            Transition::Processing => &[
                PaymentState::Pending,
                PaymentState::Processing,
                PaymentState::Failed,
            ],
            Transition::Paid => &[
                PaymentState::Pending,
                PaymentState::Processing,
                PaymentState::Failed,
            ],
            Transition::Failed(FailureCause::Declined) => {
                &[PaymentState::Pending, PaymentState::Processing]
            }
            Transition::Failed(FailureCause::Rejected) => &[
                PaymentState::Pending,
                PaymentState::Processing,
                PaymentState::Failed,
            ],
            Transition::Failed(FailureCause::Reversed) => &[
                PaymentState::Pending,
                PaymentState::Processing,
                PaymentState::Paid,
            ],
        }
    }
}

/// States a non-escalating provider update moves to `processing`.
pub const AWAITING_STATES: &[PaymentState] = &[PaymentState::Pending, PaymentState::Processing];

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> DatabaseResult<Option<Order>>;

    async fn find_by_order_number(&self, order_number: &str) -> DatabaseResult<Option<Order>>;

    async fn find_by_mpesa_reference(&self, reference: &str) -> DatabaseResult<Option<Order>>;

    async fn find_by_mpesa_transaction_id(
        &self,
        transaction_id: &str,
    ) -> DatabaseResult<Option<Order>>;

    /// Initiation accepted: `processing` plus provider correlation fields.
    async fn mark_processing(&self, update: ProcessingUpdate) -> DatabaseResult<Order>;

    /// Stores the last provider payload; `pending` becomes `processing`,
    /// terminal states are left alone.
    async fn record_provider_response(
        &self,
        order_id: Uuid,
        raw_response: JsonValue,
    ) -> DatabaseResult<Order>;

    /// Idempotent: applying it to an already-paid order returns it unchanged.
    async fn mark_paid(&self, update: PaidUpdate) -> DatabaseResult<Order>;

    /// Idempotent: a repeated or disallowed failure returns the order unchanged.
    async fn mark_failed(&self, update: FailedUpdate) -> DatabaseResult<Order>;

    async fn ping(&self) -> DatabaseResult<()>;
}

/// Process-local order store, used when no database is configured and in tests.
#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<Uuid, Order>>,
    lookups: AtomicUsize,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, order: Order) -> Order {
        self.orders.write().await.insert(order.id, order.clone());
        order
    }

    /// Number of read lookups served so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    async fn find_where<F>(&self, predicate: F) -> DatabaseResult<Option<Order>>
    where
        F: Fn(&Order) -> bool + Send,
    {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let orders = self.orders.read().await;
        Ok(orders.values().find(|order| predicate(order)).cloned())
    }

    async fn apply<F>(&self, order_id: Uuid, transition: Transition, update: F) -> DatabaseResult<Order>
    where
        F: FnOnce(&mut Order) + Send,
    {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&order_id)
            .ok_or_else(|| DatabaseError::not_found("order", order_id))?;
        if transition.allowed_from().contains(&order.status) {
            update(order);
            order.status = transition.target();
            order.updated_at = Utc::now();
        }
        Ok(order.clone())
    }
}

fn keep_or_replace(current: &mut Option<String>, incoming: Option<String>) {
    if let Some(value) = incoming.filter(|v| !v.is_empty()) {
        *current = Some(value);
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn find_by_id(&self, id: Uuid) -> DatabaseResult<Option<Order>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn find_by_order_number(&self, order_number: &str) -> DatabaseResult<Option<Order>> {
        self.find_where(|order| order.order_number == order_number)
            .await
    }

    async fn find_by_mpesa_reference(&self, reference: &str) -> DatabaseResult<Option<Order>> {
        self.find_where(|order| order.mpesa_reference.as_deref() == Some(reference))
            .await
    }

    async fn find_by_mpesa_transaction_id(
        &self,
        transaction_id: &str,
    ) -> DatabaseResult<Option<Order>> {
        self.find_where(|order| order.mpesa_transaction_id.as_deref() == Some(transaction_id))
            .await
    }

    async fn mark_processing(&self, update: ProcessingUpdate) -> DatabaseResult<Order> {
        self.apply(update.order_id, Transition::Processing, move |order| {
            keep_or_replace(&mut order.mpesa_transaction_id, update.transaction_id);
            keep_or_replace(&mut order.mpesa_reference, update.reference);
            order.mpesa_last_response = Some(update.raw_response);
        })
        .await
    }

    async fn record_provider_response(
        &self,
        order_id: Uuid,
        raw_response: JsonValue,
    ) -> DatabaseResult<Order> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&order_id)
            .ok_or_else(|| DatabaseError::not_found("order", order_id))?;
        if AWAITING_STATES.contains(&order.status) {
            order.status = PaymentState::Processing;
        }
        order.mpesa_last_response = Some(raw_response);
        order.updated_at = Utc::now();
        Ok(order.clone())
    }

    async fn mark_paid(&self, update: PaidUpdate) -> DatabaseResult<Order> {
        self.apply(update.order_id, Transition::Paid, move |order| {
            keep_or_replace(&mut order.mpesa_transaction_id, update.transaction_id);
            keep_or_replace(&mut order.mpesa_reference, update.reference);
            order.amount_paid = update.amount.or_else(|| Some(order.total.clone()));
            order.mpesa_last_response = Some(update.raw_response);
        })
        .await
    }

    async fn mark_failed(&self, update: FailedUpdate) -> DatabaseResult<Order> {
        self.apply(
            update.order_id,
            Transition::Failed(update.cause),
            move |order| {
                keep_or_replace(&mut order.mpesa_transaction_id, update.transaction_id);
                keep_or_replace(&mut order.mpesa_reference, update.reference);
                order.mpesa_last_response = Some(update.raw_response);
            },
        )
        .await
    }

    async fn ping(&self) -> DatabaseResult<()> {
        Ok(())
    }
}
