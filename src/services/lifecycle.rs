//! Order Lifecycle Updater
//!
//! Queue-group consumer that reflects engine outcomes back onto the order
//! rows: a fill writes the fill ledger row and flips the parent order to
//! FILLED; a rejection flips it to REJECTED. Terminal rows are never
//! touched again, which is what makes redelivered events harmless.

use std::sync::Arc;

use crate::bus::EventBus;
use crate::db::OrderStore;
use crate::error::AppError;
use crate::models::events::{groups, subjects, OrderFilledEvent, OrderRejectedEvent};
use crate::models::order::OrderStatus;

const DURABLE_NAME: &str = "order-service-durable";

pub struct OrderLifecycleUpdater {
    store: OrderStore,
}

impl OrderLifecycleUpdater {
    pub fn new(store: OrderStore) -> Arc<Self> {
        Arc::new(Self { store })
    }

    /// Attach the durable consumers for `orders.filled` and
    /// `orders.rejected`.
    pub async fn start(self: &Arc<Self>, bus: &Arc<EventBus>) -> Result<(), AppError> {
        let updater = self.clone();
        bus.queue_subscribe(
            subjects::ORDERS_FILLED,
            groups::ORDER_SERVICE,
            DURABLE_NAME,
            move |payload| {
                let updater = updater.clone();
                async move {
                    let event: OrderFilledEvent = serde_json::from_slice(&payload)?;
                    updater.handle_order_filled(event).await
                }
            },
        )
        .await?;

        let updater = self.clone();
        bus.queue_subscribe(
            subjects::ORDERS_REJECTED,
            groups::ORDER_SERVICE,
            DURABLE_NAME,
            move |payload| {
                let updater = updater.clone();
                async move {
                    let event: OrderRejectedEvent = serde_json::from_slice(&payload)?;
                    updater.handle_order_rejected(event).await
                }
            },
        )
        .await?;

        tracing::info!("order lifecycle updater started");
        Ok(())
    }

    /// Apply a fill. The terminal-state check runs first so a redelivered
    /// fill acks without writing a second ledger row; a genuinely unknown
    /// order naks, covering a created event that raced ahead of the
    /// insert's visibility.
    async fn handle_order_filled(&self, event: OrderFilledEvent) -> Result<(), AppError> {
        let order = self.store.get_order_by_id(event.order_id).await.map_err(
            |e| match e {
                // Unknown order: the fill may have overtaken the insert.
                AppError::NotFound(msg) => AppError::unavailable(msg),
                other => other,
            },
        )?;

        if order.status.is_terminal() {
            tracing::warn!(
                order_id = %event.order_id,
                status = ?order.status,
                "duplicate fill ignored for terminal order"
            );
            return Ok(());
        }

        self.store
            .insert_order_fill(
                event.order_id,
                event.fill_quantity,
                event.fill_price,
                event.filled_at,
            )
            .await?;

        match self
            .store
            .update_order_status(
                event.order_id,
                event.fill_quantity,
                event.fill_price,
                OrderStatus::Filled,
            )
            .await
        {
            Ok(_) => {
                tracing::info!(
                    order_id = %event.order_id,
                    fill_price = %event.fill_price,
                    "order marked filled"
                );
                Ok(())
            }
            // Lost the race to another terminal transition after our
            // check; the event is already accounted for.
            Err(AppError::Conflict(msg)) => {
                tracing::warn!(order_id = %event.order_id, "fill superseded: {}", msg);
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    /// Apply a rejection; a terminal-state conflict is acked and logged.
    async fn handle_order_rejected(&self, event: OrderRejectedEvent) -> Result<(), AppError> {
        match self.store.reject_order(event.order_id).await {
            Ok(_) => {
                tracing::info!(
                    order_id = %event.order_id,
                    reason = %event.reason,
                    "order marked rejected"
                );
                Ok(())
            }
            Err(AppError::Conflict(msg)) => {
                tracing::warn!(order_id = %event.order_id, "rejection superseded: {}", msg);
                Ok(())
            }
            Err(AppError::NotFound(msg)) => {
                // The created row may not be visible yet; retry.
                Err(AppError::unavailable(msg))
            }
            Err(other) => Err(other),
        }
    }
}
