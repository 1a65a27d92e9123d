//! Settlement
//!
//! Consumes `orders.filled` on its own queue group (independent of the
//! lifecycle updater, so both see every fill) and books the money moves
//! inside one portfolio transaction: balance delta, holding change, audit
//! row.
//!
//! This consumer never naks. A settlement that failed for a business
//! reason would fail identically on every redelivery, and retrying one
//! that partially applied risks draining funds; failures roll back, are
//! logged loudly for operators, and the message is acked.

use std::sync::Arc;

use rust_decimal::Decimal;
use sqlx::PgConnection;

use crate::bus::EventBus;
use crate::db::portfolio::{self, InsertAuditLogParams};
use crate::db::PortfolioStore;
use crate::error::AppError;
use crate::metrics;
use crate::models::events::{groups, subjects, OrderFilledEvent};
use crate::models::order::OrderSide;
use crate::models::portfolio::TransactionType;

const DURABLE_NAME: &str = "portfolio-service-durable";

pub struct SettlementService {
    store: PortfolioStore,
}

impl SettlementService {
    pub fn new(store: PortfolioStore) -> Arc<Self> {
        Arc::new(Self { store })
    }

    pub async fn start(self: &Arc<Self>, bus: &Arc<EventBus>) -> Result<(), AppError> {
        let settlement = self.clone();
        bus.queue_subscribe(
            subjects::ORDERS_FILLED,
            groups::PORTFOLIO_SERVICE,
            DURABLE_NAME,
            move |payload| {
                let settlement = settlement.clone();
                async move {
                    let event: OrderFilledEvent = serde_json::from_slice(&payload)?;

                    if let Err(e) = settlement.settle(&event).await {
                        // Deliberate ack-on-failure: see module docs.
                        tracing::error!(
                            order_id = %event.order_id,
                            user_id = %event.user_id,
                            symbol = %event.symbol,
                            "settlement failed, transaction rolled back: {}",
                            e
                        );
                        metrics::record_settlement_failed(&event.symbol);
                    }

                    Ok(())
                }
            },
        )
        .await?;

        tracing::info!("settlement service started");
        Ok(())
    }

    /// Book one fill. Everything runs inside a single transaction; any
    /// error (including the duplicate-settlement conflict on the audit
    /// insert) rolls the whole settlement back.
    async fn settle(&self, event: &OrderFilledEvent) -> Result<(), AppError> {
        // Settlement amount from the event; qty * price is the fallback
        // for producers that did not price the FX leg.
        let (settlement_amount, avg_cost_basis) = if event.settlement_amount > Decimal::ZERO {
            (
                event.settlement_amount,
                event.settlement_amount / event.fill_quantity,
            )
        } else {
            (event.fill_quantity * event.fill_price, event.fill_price)
        };

        let fill = event.clone();
        self.store
            .with_transaction(move |conn: &mut PgConnection| {
                Box::pin(async move {
                    let event = fill;
                    let account = portfolio::find_investment_account(&mut *conn, event.user_id)
                        .await?
                        .ok_or_else(|| {
                            AppError::not_found(format!(
                                "no investment account for user {}",
                                event.user_id
                            ))
                        })?;

                    let (transaction_type, description) = match event.side {
                        OrderSide::Buy => {
                            portfolio::update_account_balance(
                                &mut *conn,
                                account.id,
                                -settlement_amount,
                            )
                            .await?;

                            portfolio::upsert_holding(
                                &mut *conn,
                                account.id,
                                &event.symbol,
                                event.fill_quantity,
                                avg_cost_basis,
                            )
                            .await?;

                            (
                                TransactionType::Buy,
                                format!(
                                    "Bought {} shares of {}",
                                    event.fill_quantity, event.symbol
                                ),
                            )
                        }
                        OrderSide::Sell => {
                            portfolio::update_account_balance(
                                &mut *conn,
                                account.id,
                                settlement_amount,
                            )
                            .await?;

                            portfolio::decrease_holding(
                                &mut *conn,
                                account.id,
                                &event.symbol,
                                event.fill_quantity,
                            )
                            .await?;

                            (
                                TransactionType::Sell,
                                format!("Sold {} shares of {}", event.fill_quantity, event.symbol),
                            )
                        }
                    };

                    portfolio::insert_trade_audit_log(
                        &mut *conn,
                        InsertAuditLogParams {
                            account_id: account.id,
                            transaction_type,
                            amount: settlement_amount,
                            description,
                            reference_id: Some(event.order_id),
                        },
                    )
                    .await?;

                    Ok(())
                })
            })
            .await?;

        metrics::record_settlement(&event.symbol, settlement_amount);
        tracing::info!(
            order_id = %event.order_id,
            symbol = %event.symbol,
            side = %event.side,
            amount = %settlement_amount,
            currency = %event.settlement_currency,
            "settlement committed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::portfolio::Currency;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn fill_event(settlement_amount: Decimal, quantity: Decimal, price: Decimal) -> OrderFilledEvent {
        OrderFilledEvent {
            order_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            symbol: "AAPL".to_string(),
            side: OrderSide::Buy,
            fill_quantity: quantity,
            fill_price: price,
            filled_at: Utc::now(),
            fx_rate: dec!(1),
            settlement_amount,
            settlement_currency: Currency::Usd,
        }
    }

    #[test]
    fn settlement_amount_from_event_drives_cost_basis() {
        // 2 shares at $100 settled as 270 CAD: cost basis 135 per share.
        let event = fill_event(dec!(270), dec!(2), dec!(100));
        let basis = event.settlement_amount / event.fill_quantity;
        assert_eq!(basis, dec!(135));
    }

    #[test]
    fn missing_settlement_amount_falls_back_to_qty_times_price() {
        let event = fill_event(dec!(0), dec!(10), dec!(100));
        let fallback = event.fill_quantity * event.fill_price;
        assert_eq!(fallback, dec!(1000));
    }
}
