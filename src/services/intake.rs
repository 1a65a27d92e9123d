//! Order Intake & Lifecycle RPC surface
//!
//! Validates and persists new orders, emits lifecycle events, and serves
//! order lookups. The order row is the source of truth: a publish failure
//! after the insert is logged and the RPC still succeeds.

use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::bus::EventBus;
use crate::db::orders::InsertOrderParams;
use crate::db::OrderStore;
use crate::error::AppError;
use crate::market::MarketDataClient;
use crate::metrics;
use crate::models::events::{subjects, OrderCancelledEvent, OrderCreatedEvent};
use crate::models::order::{CreateOrderRequest, Order};

pub struct OrderService {
    store: OrderStore,
    bus: Arc<EventBus>,
    market: MarketDataClient,
}

impl OrderService {
    pub fn new(store: OrderStore, bus: Arc<EventBus>, market: MarketDataClient) -> Self {
        Self { store, bus, market }
    }

    /// Validate, persist and announce a new order. Always persisted as
    /// PENDING; callers cannot supply a status.
    pub async fn insert_order(&self, req: CreateOrderRequest) -> Result<Order, AppError> {
        validate_order_request(&req)?;

        // Unknown symbols are refused before anything is written.
        self.market.validate_symbol(&req.symbol).await?;

        let order = self
            .store
            .insert_order(InsertOrderParams {
                user_id: req.user_id,
                symbol: req.symbol,
                side: req.side,
                order_type: req.order_type,
                quantity: req.quantity,
                price: req.price,
                stop_price: req.stop_price,
            })
            .await?;

        metrics::record_order_submitted(&order.symbol);

        let event = OrderCreatedEvent {
            order_id: order.id,
            user_id: order.user_id,
            symbol: order.symbol.clone(),
            side: order.side,
            order_type: order.order_type,
            quantity: order.quantity,
            price: order.price,
            created_at: order.created_at,
        };

        // The row is committed; losing the event only delays matching, so
        // the failure is logged rather than failing the RPC.
        if let Err(e) = self.bus.publish_event(subjects::ORDERS_CREATED, &event).await {
            tracing::error!(
                order_id = %order.id,
                "failed to publish orders.created: {}",
                e
            );
        }

        Ok(order)
    }

    /// Atomic PENDING -> CANCELLED; publishes the advisory cancellation
    /// event on success.
    pub async fn cancel_order(&self, id: Uuid) -> Result<Order, AppError> {
        let order = self.store.cancel_order(id).await?;

        let event = OrderCancelledEvent {
            order_id: order.id,
            user_id: order.user_id,
            symbol: order.symbol.clone(),
            side: order.side,
            status: order.status,
            cancelled_at: order.updated_at,
        };

        if let Err(e) = self
            .bus
            .publish_event(subjects::ORDERS_CANCELLED, &event)
            .await
        {
            tracing::error!(
                order_id = %order.id,
                "failed to publish orders.cancelled: {}",
                e
            );
        }

        metrics::record_order_cancelled(&order.symbol);
        Ok(order)
    }

    pub async fn get_order_by_id(&self, id: Uuid) -> Result<Order, AppError> {
        self.store.get_order_by_id(id).await
    }

    pub async fn get_orders_by_user_id(&self, user_id: Uuid) -> Result<Vec<Order>, AppError> {
        self.store.get_orders_by_user_id(user_id).await
    }
}

/// Intake validation: positive quantity, and the price fields the order
/// type requires.
fn validate_order_request(req: &CreateOrderRequest) -> Result<(), AppError> {
    if req.quantity <= Decimal::ZERO {
        return Err(AppError::invalid_argument("quantity must be positive"));
    }

    if req.order_type.requires_price() {
        match req.price {
            Some(price) if price > Decimal::ZERO => {}
            Some(_) => return Err(AppError::invalid_argument("limit price must be positive")),
            None => {
                return Err(AppError::invalid_argument(format!(
                    "{} orders require a price",
                    req.order_type
                )))
            }
        }
    }

    if req.order_type.requires_stop_price() {
        match req.stop_price {
            Some(stop) if stop > Decimal::ZERO => {}
            Some(_) => return Err(AppError::invalid_argument("stop price must be positive")),
            None => {
                return Err(AppError::invalid_argument(format!(
                    "{} orders require a stop price",
                    req.order_type
                )))
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::order::{OrderSide, OrderType};
    use rust_decimal_macros::dec;

    fn request(
        order_type: OrderType,
        quantity: Decimal,
        price: Option<Decimal>,
        stop_price: Option<Decimal>,
    ) -> CreateOrderRequest {
        CreateOrderRequest {
            user_id: Uuid::new_v4(),
            symbol: "AAPL".to_string(),
            side: OrderSide::Buy,
            order_type,
            quantity,
            price,
            stop_price,
        }
    }

    #[test]
    fn zero_quantity_is_invalid() {
        let err =
            validate_order_request(&request(OrderType::Market, dec!(0), None, None)).unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
    }

    #[test]
    fn limit_order_without_price_is_invalid() {
        let err =
            validate_order_request(&request(OrderType::Limit, dec!(1), None, None)).unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
    }

    #[test]
    fn stop_limit_requires_both_prices() {
        assert!(validate_order_request(&request(
            OrderType::StopLimit,
            dec!(1),
            Some(dec!(10)),
            None
        ))
        .is_err());

        assert!(validate_order_request(&request(
            OrderType::StopLimit,
            dec!(1),
            Some(dec!(10)),
            Some(dec!(9))
        ))
        .is_ok());
    }

    #[test]
    fn market_order_needs_no_price() {
        assert!(validate_order_request(&request(OrderType::Market, dec!(1), None, None)).is_ok());
    }
}
