//! Matching Engine
//!
//! Consumes `orders.created`, evaluates each order against the live quote
//! and the owner's investment account, and emits `orders.filled` or
//! `orders.rejected`. Unmatched limit orders rest in the book; a periodic
//! ticker re-evaluates the book against fresh batch quotes.
//!
//! Two loops touch the book (the new-order handler and the ticker). Both
//! remove an order under the book's lock before emitting anything for it,
//! so a single order cannot produce two fills from this process.

mod book;
mod rules;

pub use book::RestingBook;
pub use rules::{Evaluation, EvaluationContext};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bus::EventBus;
use crate::db::PortfolioStore;
use crate::error::AppError;
use crate::market::MarketDataClient;
use crate::metrics;
use crate::models::events::{
    groups, subjects, OrderCancelledEvent, OrderCreatedEvent, OrderFilledEvent, OrderRejectedEvent,
};
use crate::models::portfolio::{AccountType, Currency};

const DURABLE_NAME: &str = "trade-engine-durable";

pub struct MatchingEngine {
    bus: Arc<EventBus>,
    market: MarketDataClient,
    portfolio: PortfolioStore,
    book: RestingBook,
    tick_interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl MatchingEngine {
    pub fn new(
        bus: Arc<EventBus>,
        market: MarketDataClient,
        portfolio: PortfolioStore,
        tick_interval: Duration,
    ) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Arc::new(Self {
            bus,
            market,
            portfolio,
            book: RestingBook::new(),
            tick_interval,
            shutdown_tx,
            shutdown_rx,
            ticker: Mutex::new(None),
        })
    }

    /// Subscribe to the order streams and start the re-evaluation ticker.
    pub async fn start(self: &Arc<Self>) -> Result<(), AppError> {
        let engine = self.clone();
        self.bus
            .queue_subscribe(
                subjects::ORDERS_CREATED,
                groups::TRADE_ENGINE,
                DURABLE_NAME,
                move |payload| {
                    let engine = engine.clone();
                    async move {
                        let event: OrderCreatedEvent = serde_json::from_slice(&payload)?;
                        engine.handle_order_created(event).await
                    }
                },
            )
            .await?;

        let engine = self.clone();
        self.bus
            .queue_subscribe(
                subjects::ORDERS_CANCELLED,
                groups::TRADE_ENGINE,
                DURABLE_NAME,
                move |payload| {
                    let engine = engine.clone();
                    async move {
                        let event: OrderCancelledEvent = serde_json::from_slice(&payload)?;
                        engine.handle_order_cancelled(event);
                        Ok(())
                    }
                },
            )
            .await?;

        self.start_ticker();
        tracing::info!(
            tick_secs = self.tick_interval.as_secs(),
            "matching engine started"
        );
        Ok(())
    }

    /// Stop the ticker. Bus subscriptions drain with the bus itself.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.ticker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("engine ticker did not stop cleanly: {}", e);
            }
        }
        tracing::info!("matching engine stopped");
    }

    // ==================== New-order handler ====================

    async fn handle_order_created(&self, event: OrderCreatedEvent) -> Result<(), AppError> {
        tracing::info!(
            order_id = %event.order_id,
            symbol = %event.symbol,
            side = %event.side,
            order_type = %event.order_type,
            "evaluating order"
        );

        // Quote and metadata failures are transient: nak and redeliver.
        let quote = self.market.get_quote(&event.symbol).await?;
        let stock_meta = self.market.get_metadata(&event.symbol).await?;

        let Some(ctx) = self
            .build_context(&event, quote.last_price, stock_meta.currency)
            .await?
        else {
            self.publish_rejected(&event, "no investment account")
                .await?;
            return Ok(());
        };

        match rules::evaluate(&event, &ctx) {
            Evaluation::Fill {
                fill_price,
                fx_rate,
                settlement_amount,
                settlement_currency,
            } => {
                self.publish_filled(
                    &event,
                    fill_price,
                    fx_rate,
                    settlement_amount,
                    settlement_currency,
                )
                .await?;
            }
            Evaluation::Reject { reason } => {
                self.publish_rejected(&event, &reason).await?;
            }
            Evaluation::Rest => {
                self.book.add(event.clone());
                metrics::record_order_rested(&event.symbol);
                tracing::info!(
                    order_id = %event.order_id,
                    symbol = %event.symbol,
                    quote = %ctx.quote,
                    "order resting in book"
                );
            }
            Evaluation::Discard => {
                tracing::warn!(
                    order_id = %event.order_id,
                    "unmatched market order discarded"
                );
            }
        }

        Ok(())
    }

    fn handle_order_cancelled(&self, event: OrderCancelledEvent) {
        if self.book.remove(&event.symbol, event.order_id) {
            tracing::info!(
                order_id = %event.order_id,
                symbol = %event.symbol,
                "cancelled order removed from resting book"
            );
        }
    }

    // ==================== Resting-book re-evaluation ====================

    fn start_ticker(self: &Arc<Self>) {
        let engine = self.clone();
        let mut shutdown = self.shutdown_rx.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {}
                }

                if let Err(e) = engine.reevaluate_book().await {
                    tracing::warn!("resting book re-evaluation failed: {}", e);
                }
            }
        });

        *self.ticker.lock() = Some(handle);
    }

    /// One ticker pass: batch-quote every active symbol, drain matchable
    /// resting orders, re-run preflight on each and emit the outcome.
    async fn reevaluate_book(&self) -> Result<(), AppError> {
        let symbols = self.book.active_symbols();
        if symbols.is_empty() {
            return Ok(());
        }

        let quotes = self.market.get_quotes(&symbols).await?;

        for quote in quotes {
            let matchable = self.book.evaluate(&quote.symbol, quote.last_price);
            if matchable.is_empty() {
                continue;
            }

            let stock_meta = match self.market.get_metadata(&quote.symbol).await {
                Ok(meta) => meta,
                Err(e) => {
                    // Metadata is gone this tick; put the orders back and
                    // retry on the next one.
                    tracing::warn!(symbol = %quote.symbol, "metadata fetch failed: {}", e);
                    for order in matchable {
                        self.book.add(order);
                    }
                    continue;
                }
            };

            for order in matchable {
                self.settle_resting_order(order, quote.last_price, stock_meta.currency)
                    .await;
            }
        }

        Ok(())
    }

    /// The order has already been removed from the book; preflight decides
    /// between a fill and a rejection. A transient failure re-parks the
    /// order so the next tick retries instead of losing it.
    async fn settle_resting_order(
        &self,
        order: OrderCreatedEvent,
        quote: Decimal,
        stock_currency: Currency,
    ) {
        let context = self.build_context(&order, quote, stock_currency).await;

        let outcome = match context {
            Ok(Some(ctx)) => rules::evaluate(&order, &ctx),
            Ok(None) => Evaluation::Reject {
                reason: "no investment account".to_string(),
            },
            Err(e) => {
                tracing::warn!(order_id = %order.order_id, "preflight lookup failed: {}", e);
                self.book.add(order);
                return;
            }
        };

        let published = match outcome {
            Evaluation::Fill {
                fill_price,
                fx_rate,
                settlement_amount,
                settlement_currency,
            } => {
                self.publish_filled(
                    &order,
                    fill_price,
                    fx_rate,
                    settlement_amount,
                    settlement_currency,
                )
                .await
            }
            Evaluation::Reject { reason } => self.publish_rejected(&order, &reason).await,
            // The quote matched moments ago; a different answer now means
            // the market moved between the partition and this check.
            Evaluation::Rest | Evaluation::Discard => {
                self.book.add(order);
                return;
            }
        };

        if let Err(e) = published {
            tracing::warn!(order_id = %order.order_id, "publish failed, re-parking order: {}", e);
            self.book.add(order);
        }
    }

    // ==================== Shared helpers ====================

    /// Locate the user's investment account and assemble the evaluation
    /// context. `None` means the user has no investment account.
    async fn build_context(
        &self,
        order: &OrderCreatedEvent,
        quote: Decimal,
        stock_currency: Currency,
    ) -> Result<Option<EvaluationContext>, AppError> {
        let accounts = self.portfolio.get_accounts_by_user_id(order.user_id).await?;
        let Some(account) = accounts
            .into_iter()
            .find(|acc| acc.account_type == AccountType::Investment)
        else {
            return Ok(None);
        };

        let held_quantity = self
            .portfolio
            .get_holding(account.id, &order.symbol)
            .await?
            .map(|h| h.quantity)
            .unwrap_or(Decimal::ZERO);

        Ok(Some(EvaluationContext {
            quote,
            stock_currency,
            account_currency: account.currency,
            account_balance: account.balance,
            held_quantity,
        }))
    }

    async fn publish_filled(
        &self,
        order: &OrderCreatedEvent,
        fill_price: Decimal,
        fx_rate: Decimal,
        settlement_amount: Decimal,
        settlement_currency: Currency,
    ) -> Result<(), AppError> {
        let event = OrderFilledEvent {
            order_id: order.order_id,
            user_id: order.user_id,
            symbol: order.symbol.clone(),
            side: order.side,
            fill_quantity: order.quantity,
            fill_price,
            filled_at: Utc::now(),
            fx_rate,
            settlement_amount,
            settlement_currency,
        };

        self.bus
            .publish_event(subjects::ORDERS_FILLED, &event)
            .await?;

        metrics::record_order_filled(&order.symbol, settlement_amount);
        tracing::info!(
            order_id = %order.order_id,
            symbol = %order.symbol,
            fill_price = %fill_price,
            settlement = %settlement_amount,
            currency = %settlement_currency,
            "order filled"
        );
        Ok(())
    }

    async fn publish_rejected(
        &self,
        order: &OrderCreatedEvent,
        reason: &str,
    ) -> Result<(), AppError> {
        let event = OrderRejectedEvent {
            order_id: order.order_id,
            user_id: order.user_id,
            symbol: order.symbol.clone(),
            reason: reason.to_string(),
            rejected_at: Utc::now(),
        };

        self.bus
            .publish_event(subjects::ORDERS_REJECTED, &event)
            .await?;

        metrics::record_order_rejected(&order.symbol, reason);
        tracing::info!(
            order_id = %order.order_id,
            symbol = %order.symbol,
            reason,
            "order rejected"
        );
        Ok(())
    }
}
