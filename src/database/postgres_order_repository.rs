use crate::database::error::{DatabaseError, DatabaseErrorKind, DatabaseResult};
use crate::database::order_repository::{
    FailedUpdate, Order, OrderStore, PaidUpdate, ProcessingUpdate, Transition, AWAITING_STATES,
};
use crate::payments::types::PaymentState;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{types::BigDecimal, FromRow, PgPool};
use std::str::FromStr;
use uuid::Uuid;

const ORDER_COLUMNS: &str = "id, order_number, total, status, mpesa_transaction_id, \
     mpesa_reference, mpesa_last_response, amount_paid, created_at, updated_at";

/// Row shape of the storefront `orders` table
#[derive(Debug, Clone, FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    total: BigDecimal,
    status: String,
    mpesa_transaction_id: Option<String>,
    mpesa_reference: Option<String>,
    mpesa_last_response: Option<JsonValue>,
    amount_paid: Option<BigDecimal>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<OrderRow> for Order {
    fn from(row: OrderRow) -> Self {
        Order {
            id: row.id,
            order_number: row.order_number,
            total: row.total,
            // storefront-only statuses (shipped, delivered, ...) are outside the payment lifecycle
            status: PaymentState::from_str(&row.status).unwrap_or(PaymentState::Unknown),
            mpesa_transaction_id: row.mpesa_transaction_id,
            mpesa_reference: row.mpesa_reference,
            mpesa_last_response: row.mpesa_last_response,
            amount_paid: row.amount_paid,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn state_names(states: &[PaymentState]) -> Vec<String> {
    states.iter().map(|s| s.as_str().to_string()).collect()
}

/// PostgreSQL-backed order store
pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one(&self, column: &str, value: &str) -> DatabaseResult<Option<Order>> {
        let query = format!(
            "SELECT {} FROM orders WHERE {} = $1 ORDER BY created_at DESC LIMIT 1",
            ORDER_COLUMNS, column
        );
        sqlx::query_as::<_, OrderRow>(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map(|row| row.map(Order::from))
            .map_err(DatabaseError::from_sqlx)
    }

    /// Returns the updated row, or the current one when the guard skipped the update.
    async fn updated_or_current(&self, order_id: Uuid, row: Option<OrderRow>) -> DatabaseResult<Order> {
        match row {
            Some(row) => Ok(row.into()),
            None => self
                .find_by_id(order_id)
                .await?
                .ok_or_else(|| DatabaseError::not_found("order", order_id)),
        }
    }

    async fn transition(
        &self,
        order_id: Uuid,
        transition: Transition,
        transaction_id: Option<String>,
        reference: Option<String>,
        amount: Option<BigDecimal>,
        raw_response: JsonValue,
    ) -> DatabaseResult<Order> {
        let query = format!(
            "UPDATE orders
             SET status = $2,
                 mpesa_transaction_id = COALESCE(NULLIF($3, ''), mpesa_transaction_id),
                 mpesa_reference = COALESCE(NULLIF($4, ''), mpesa_reference),
                 amount_paid = CASE WHEN $2 = 'paid' THEN COALESCE($5, total) ELSE amount_paid END,
                 mpesa_last_response = $6,
                 updated_at = NOW()
             WHERE id = $1 AND status = ANY($7)
             RETURNING {}",
            ORDER_COLUMNS
        );

        let row = sqlx::query_as::<_, OrderRow>(&query)
            .bind(order_id)
            .bind(transition.target().as_str())
            .bind(transaction_id)
            .bind(reference)
            .bind(amount)
            .bind(raw_response)
            .bind(state_names(transition.allowed_from()))
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        self.updated_or_current(order_id, row).await
    }
}

#[async_trait]
impl OrderStore for PgOrderRepository {
    async fn find_by_id(&self, id: Uuid) -> DatabaseResult<Option<Order>> {
        let query = format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS);
        sqlx::query_as::<_, OrderRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map(|row| row.map(Order::from))
            .map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_order_number(&self, order_number: &str) -> DatabaseResult<Option<Order>> {
        self.find_one("order_number", order_number).await
    }

    async fn find_by_mpesa_reference(&self, reference: &str) -> DatabaseResult<Option<Order>> {
        self.find_one("mpesa_reference", reference).await
    }

    async fn find_by_mpesa_transaction_id(
        &self,
        transaction_id: &str,
    ) -> DatabaseResult<Option<Order>> {
        self.find_one("mpesa_transaction_id", transaction_id).await
    }

    async fn mark_processing(&self, update: ProcessingUpdate) -> DatabaseResult<Order> {
        self.transition(
            update.order_id,
            Transition::Processing,
            update.transaction_id,
            update.reference,
            None,
            update.raw_response,
        )
        .await
    }

    async fn record_provider_response(
        &self,
        order_id: Uuid,
        raw_response: JsonValue,
    ) -> DatabaseResult<Order> {
        let query = format!(
            "UPDATE orders
             SET status = CASE WHEN status = ANY($3) THEN 'processing' ELSE status END,
                 mpesa_last_response = $2,
                 updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            ORDER_COLUMNS
        );
        sqlx::query_as::<_, OrderRow>(&query)
            .bind(order_id)
            .bind(raw_response)
            .bind(state_names(AWAITING_STATES))
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Order::from)
            .ok_or_else(|| DatabaseError::not_found("order", order_id))
    }

    async fn mark_paid(&self, update: PaidUpdate) -> DatabaseResult<Order> {
        self.transition(
            update.order_id,
            Transition::Paid,
            update.transaction_id,
            update.reference,
            update.amount,
            update.raw_response,
        )
        .await
    }

    async fn mark_failed(&self, update: FailedUpdate) -> DatabaseResult<Order> {
        self.transition(
            update.order_id,
            Transition::Failed(update.cause),
            update.transaction_id,
            update.reference,
            None,
            update.raw_response,
        )
        .await
    }

    async fn ping(&self) -> DatabaseResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| {
                DatabaseError::new(DatabaseErrorKind::Connection {
                    message: e.to_string(),
                })
            })
    }
}
