//! Bus Event Payloads
//!
//! The pipeline's services interact only through these events. Payloads are
//! serde-encoded onto durable streams; consumers must tolerate unknown
//! fields so producers can evolve independently.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::order::{OrderSide, OrderStatus, OrderType};
use super::portfolio::Currency;

/// Subjects carried on the bus. The `orders` stream prefix covers the
/// trade pipeline; `users` subjects belong to the auth collaborator.
pub mod subjects {
    pub const ORDERS_CREATED: &str = "orders.created";
    pub const ORDERS_FILLED: &str = "orders.filled";
    pub const ORDERS_REJECTED: &str = "orders.rejected";
    pub const ORDERS_CANCELLED: &str = "orders.cancelled";
}

/// Queue groups (one durable consumer group per subscribing service).
pub mod groups {
    pub const TRADE_ENGINE: &str = "trade-engine";
    pub const ORDER_SERVICE: &str = "order-service";
    pub const PORTFOLIO_SERVICE: &str = "portfolio-service";
}

/// Emitted by Order Intake after the order row is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedEvent {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

/// Emitted by the Matching Engine when an order executes. Consumed by two
/// independent queue groups: the Order Lifecycle Updater and Settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFilledEvent {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub fill_quantity: Decimal,
    pub fill_price: Decimal,
    pub filled_at: DateTime<Utc>,
    pub fx_rate: Decimal,
    pub settlement_amount: Decimal,
    pub settlement_currency: Currency,
}

/// Emitted by the Matching Engine when an order fails preflight or cannot
/// execute. Consumed by the Order Lifecycle Updater only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRejectedEvent {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub symbol: String,
    pub reason: String,
    pub rejected_at: DateTime<Utc>,
}

/// Advisory event published on cancellation; the engine uses it to drop
/// resting entries best-effort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelledEvent {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub cancelled_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn filled_event_preserves_decimal_precision() {
        let event = OrderFilledEvent {
            order_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            symbol: "AAPL".to_string(),
            side: OrderSide::Buy,
            fill_quantity: dec!(10),
            fill_price: dec!(100.05),
            filled_at: Utc::now(),
            fx_rate: dec!(1.35),
            settlement_amount: dec!(1350.675),
            settlement_currency: Currency::Cad,
        };

        let bytes = serde_json::to_vec(&event).unwrap();
        let back: OrderFilledEvent = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.settlement_amount, dec!(1350.675));
        assert_eq!(back.fx_rate, dec!(1.35));
    }

    #[test]
    fn created_event_tolerates_unknown_fields() {
        let raw = serde_json::json!({
            "order_id": Uuid::new_v4(),
            "user_id": Uuid::new_v4(),
            "symbol": "TSLA",
            "side": "sell",
            "order_type": "limit",
            "quantity": "5",
            "price": "200",
            "created_at": Utc::now(),
            "emitted_by": "a-future-producer"
        });

        let event: OrderCreatedEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.symbol, "TSLA");
        assert_eq!(event.price, Some(dec!(200)));
    }
}
