//! Order Store
//!
//! Typed queries over the `orders` and `order_fills` tables. State
//! transitions are enforced in the UPDATE predicates so concurrent writers
//! race on the database row, not in application code: the first commit
//! wins and the loser observes a terminal-state conflict.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::order::{Order, OrderFill, OrderSide, OrderStatus, OrderType};

pub struct InsertOrderParams {
    pub user_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
}

#[derive(Clone)]
pub struct OrderStore {
    pool: PgPool,
}

impl OrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist a new order. Status always starts at PENDING; the id and
    /// timestamps are server-generated.
    pub async fn insert_order(&self, params: InsertOrderParams) -> Result<Order, AppError> {
        let order = sqlx::query_as::<_, Order>(
            r#"
            INSERT INTO orders (user_id, symbol, side, order_type, status, quantity, price, stop_price)
            VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(params.user_id)
        .bind(&params.symbol)
        .bind(params.side)
        .bind(params.order_type)
        .bind(params.quantity)
        .bind(params.price)
        .bind(params.stop_price)
        .fetch_one(&self.pool)
        .await?;

        Ok(order)
    }

    pub async fn get_order_by_id(&self, id: Uuid) -> Result<Order, AppError> {
        sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found(format!("order {}", id)))
    }

    pub async fn get_orders_by_user_id(&self, user_id: Uuid) -> Result<Vec<Order>, AppError> {
        let orders = sqlx::query_as::<_, Order>(
            "SELECT * FROM orders WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }

    /// Atomic PENDING -> CANCELLED transition. Anything else (absent row,
    /// already matched, already cancelled) reports not-found, matching the
    /// RPC contract.
    pub async fn cancel_order(&self, id: Uuid) -> Result<Order, AppError> {
        sqlx::query_as::<_, Order>(
            r#"
            UPDATE orders
            SET status = 'cancelled', updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::not_found("order not found or not in pending status"))
    }

    /// Apply a fill to the parent order. A terminal row is left untouched
    /// and reported as a conflict so the caller can treat the event as
    /// already applied.
    pub async fn update_order_status(
        &self,
        id: Uuid,
        filled_quantity: Decimal,
        avg_fill_price: Decimal,
        status: OrderStatus,
    ) -> Result<Order, AppError> {
        let updated = sqlx::query_as::<_, Order>(
            r#"
            UPDATE orders
            SET filled_quantity = $2, avg_fill_price = $3, status = $4, updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'partially_filled')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(filled_quantity)
        .bind(avg_fill_price)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(order) => Ok(order),
            None => self.explain_blocked_transition(id).await,
        }
    }

    /// Status -> REJECTED. Same terminal-state discipline as fills.
    pub async fn reject_order(&self, id: Uuid) -> Result<Order, AppError> {
        let updated = sqlx::query_as::<_, Order>(
            r#"
            UPDATE orders
            SET status = 'rejected', updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(order) => Ok(order),
            None => self.explain_blocked_transition(id).await,
        }
    }

    pub async fn insert_order_fill(
        &self,
        order_id: Uuid,
        fill_quantity: Decimal,
        fill_price: Decimal,
        filled_at: DateTime<Utc>,
    ) -> Result<OrderFill, AppError> {
        let fill = sqlx::query_as::<_, OrderFill>(
            r#"
            INSERT INTO order_fills (order_id, fill_quantity, fill_price, filled_at)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(order_id)
        .bind(fill_quantity)
        .bind(fill_price)
        .bind(filled_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(fill)
    }

    /// A guarded UPDATE matched no row: either the order is gone (retry
    /// may help if the created event raced ahead of the insert) or it is
    /// already terminal (the transition is a no-op).
    async fn explain_blocked_transition(&self, id: Uuid) -> Result<Order, AppError> {
        let existing = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match existing {
            Some(order) if order.status.is_terminal() => Err(AppError::conflict(format!(
                "order {} already in terminal status {:?}",
                id, order.status
            ))),
            Some(order) => Err(AppError::internal(format!(
                "order {} in unexpected status {:?}",
                id, order.status
            ))),
            None => Err(AppError::not_found(format!("order {}", id))),
        }
    }
}
