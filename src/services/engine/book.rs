//! Resting Limit-Order Book
//!
//! Per-symbol queues of unmatched limit orders awaiting a favourable
//! quote, plus the active-symbols set the ticker batches quotes for. The
//! book is process-wide mutable state touched by exactly two code paths
//! (the new-order handler and the ticker), so one coarse lock guards it;
//! an order removed under the lock can never be matched twice.

use std::collections::HashMap;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::events::OrderCreatedEvent;

use super::rules;

pub struct RestingBook {
    orders: Mutex<HashMap<String, Vec<OrderCreatedEvent>>>,
}

impl RestingBook {
    pub fn new() -> Self {
        Self {
            orders: Mutex::new(HashMap::new()),
        }
    }

    /// Park an unmatched limit order under its symbol.
    pub fn add(&self, order: OrderCreatedEvent) {
        let mut orders = self.orders.lock();
        orders.entry(order.symbol.clone()).or_default().push(order);
    }

    /// Symbols with at least one resting order.
    pub fn active_symbols(&self) -> Vec<String> {
        let orders = self.orders.lock();
        orders.keys().cloned().collect()
    }

    /// Partition the symbol's resting orders against a fresh quote:
    /// matchable entries are removed and returned (removal happens before
    /// any fill is emitted), the rest are written back. An emptied symbol
    /// leaves the active set.
    pub fn evaluate(&self, symbol: &str, quote: Decimal) -> Vec<OrderCreatedEvent> {
        let mut orders = self.orders.lock();

        let Some(resting) = orders.remove(symbol) else {
            return Vec::new();
        };

        let (filled, remaining): (Vec<_>, Vec<_>) = resting
            .into_iter()
            .partition(|order| rules::limit_matches(order.side, order.price, quote));

        if !remaining.is_empty() {
            orders.insert(symbol.to_string(), remaining);
        }

        filled
    }

    /// Best-effort removal on cancellation. A missed removal just leaves a
    /// stale entry whose eventual fill is refused downstream by the
    /// terminal-state guard.
    pub fn remove(&self, symbol: &str, order_id: Uuid) -> bool {
        let mut orders = self.orders.lock();

        let Some(resting) = orders.get_mut(symbol) else {
            return false;
        };

        let before = resting.len();
        resting.retain(|order| order.order_id != order_id);
        let removed = resting.len() < before;

        if resting.is_empty() {
            orders.remove(symbol);
        }

        removed
    }

    pub fn len(&self) -> usize {
        let orders = self.orders.lock();
        orders.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RestingBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::order::{OrderSide, OrderType};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn limit_order(symbol: &str, side: OrderSide, price: Decimal) -> OrderCreatedEvent {
        OrderCreatedEvent {
            order_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Limit,
            quantity: dec!(5),
            price: Some(price),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn unmatched_limit_orders_keep_their_symbol_active() {
        let book = RestingBook::new();
        book.add(limit_order("TSLA", OrderSide::Buy, dec!(200)));

        assert_eq!(book.active_symbols(), vec!["TSLA".to_string()]);

        // Quote above the buy limit: nothing fills, entry stays.
        let filled = book.evaluate("TSLA", dec!(210));
        assert!(filled.is_empty());
        assert_eq!(book.len(), 1);
        assert_eq!(book.active_symbols(), vec!["TSLA".to_string()]);
    }

    #[test]
    fn favourable_quote_drains_the_symbol() {
        let book = RestingBook::new();
        book.add(limit_order("TSLA", OrderSide::Buy, dec!(200)));

        let filled = book.evaluate("TSLA", dec!(195));
        assert_eq!(filled.len(), 1);
        assert!(book.is_empty());
        assert!(book.active_symbols().is_empty());
    }

    #[test]
    fn partition_keeps_unmatched_side() {
        let book = RestingBook::new();
        book.add(limit_order("NVDA", OrderSide::Buy, dec!(100)));
        book.add(limit_order("NVDA", OrderSide::Sell, dec!(120)));

        // 95 satisfies the buy limit but not the sell limit.
        let filled = book.evaluate("NVDA", dec!(95));
        assert_eq!(filled.len(), 1);
        assert_eq!(filled[0].side, OrderSide::Buy);
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn remove_drops_a_single_order_and_cleans_the_symbol() {
        let book = RestingBook::new();
        let order = limit_order("AMZN", OrderSide::Sell, dec!(150));
        let id = order.order_id;
        book.add(order);

        assert!(book.remove("AMZN", id));
        assert!(!book.remove("AMZN", id));
        assert!(book.active_symbols().is_empty());
    }

    #[test]
    fn evaluate_unknown_symbol_is_a_no_op() {
        let book = RestingBook::new();
        assert!(book.evaluate("AAPL", dec!(1)).is_empty());
    }

    #[tokio::test]
    async fn concurrent_adds_and_evaluations_lose_nothing() {
        use std::sync::Arc;

        let book = Arc::new(RestingBook::new());
        let mut handles = Vec::new();

        // Handler path parks orders while the ticker path drains them.
        for _ in 0..4 {
            let book = book.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    book.add(limit_order("TSLA", OrderSide::Buy, dec!(200)));
                }
            }));
        }

        let evaluator = {
            let book = book.clone();
            tokio::spawn(async move {
                let mut drained = 0usize;
                for _ in 0..200 {
                    drained += book.evaluate("TSLA", dec!(195)).len();
                    tokio::task::yield_now().await;
                }
                drained
            })
        };

        for handle in handles {
            handle.await.unwrap();
        }
        let drained = evaluator.await.unwrap();

        // Every order is either drained or still resting, exactly once.
        assert_eq!(drained + book.len(), 200);
    }
}
