//! Match and Preflight Rules
//!
//! Pure decision logic for the engine, separated from the bus/database
//! orchestration so the rules can be exercised directly against quotes and
//! account snapshots.

use rust_decimal::Decimal;

use crate::fx;
use crate::models::events::OrderCreatedEvent;
use crate::models::order::{OrderSide, OrderType};
use crate::models::portfolio::Currency;

/// Snapshot of everything the match decision needs besides the order.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    /// Latest market price in the stock's currency.
    pub quote: Decimal,
    /// Currency the stock trades in.
    pub stock_currency: Currency,
    /// Currency of the settling account.
    pub account_currency: Currency,
    /// Balance of the settling account.
    pub account_balance: Decimal,
    /// Quantity currently held of this symbol, zero if none.
    pub held_quantity: Decimal,
}

/// Outcome of evaluating one order against the market.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// Emit `orders.filled` at `fill_price`, settling `settlement_amount`
    /// in the account currency.
    Fill {
        fill_price: Decimal,
        fx_rate: Decimal,
        settlement_amount: Decimal,
        settlement_currency: Currency,
    },
    /// Emit `orders.rejected` with this reason.
    Reject { reason: String },
    /// Park in the resting book awaiting a better quote.
    Rest,
    /// Unfillable and unbookable (a pathological unmatched market order);
    /// log and drop.
    Discard,
}

/// Full evaluation: settlement pricing, strict preflight, then the match
/// rule. Preflight runs first so an order the account cannot cover is
/// rejected immediately rather than parked.
pub fn evaluate(order: &OrderCreatedEvent, ctx: &EvaluationContext) -> Evaluation {
    let fx_rate = fx::exchange_rate(ctx.stock_currency, ctx.account_currency);
    let settlement_amount = ctx.quote * order.quantity * fx_rate;

    if let Some(reason) = preflight(order, ctx, settlement_amount) {
        return Evaluation::Reject { reason };
    }

    if matches(order, ctx.quote) {
        Evaluation::Fill {
            fill_price: ctx.quote,
            fx_rate,
            settlement_amount,
            settlement_currency: ctx.account_currency,
        }
    } else if order.order_type == OrderType::Market {
        Evaluation::Discard
    } else {
        Evaluation::Rest
    }
}

/// Strict funds/holdings check against the would-be settlement. Equality
/// passes: a BUY with balance exactly equal to the settlement amount is
/// accepted, which is why everything stays in fixed-point.
fn preflight(
    order: &OrderCreatedEvent,
    ctx: &EvaluationContext,
    settlement_amount: Decimal,
) -> Option<String> {
    match order.side {
        OrderSide::Buy if ctx.account_balance < settlement_amount => {
            Some("insufficient funds".to_string())
        }
        OrderSide::Sell if ctx.held_quantity < order.quantity => {
            Some("insufficient holdings".to_string())
        }
        _ => None,
    }
}

/// Market orders always match. Limit rules also cover STOP and STOP_LIMIT,
/// which are accepted but not yet triggered separately.
fn matches(order: &OrderCreatedEvent, quote: Decimal) -> bool {
    match order.order_type {
        OrderType::Market => true,
        OrderType::Limit | OrderType::Stop | OrderType::StopLimit => {
            limit_matches(order.side, order.price, quote)
        }
    }
}

/// Limit rule: a buy fills when the market is at or below the limit, a
/// sell when at or above. An order with no limit price never matches (it
/// should have been refused at intake).
pub fn limit_matches(side: OrderSide, limit_price: Option<Decimal>, quote: Decimal) -> bool {
    let Some(limit) = limit_price else {
        return false;
    };

    match side {
        OrderSide::Buy => quote <= limit,
        OrderSide::Sell => quote >= limit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn order(
        side: OrderSide,
        order_type: OrderType,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> OrderCreatedEvent {
        OrderCreatedEvent {
            order_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            symbol: "AAPL".to_string(),
            side,
            order_type,
            quantity,
            price,
            created_at: Utc::now(),
        }
    }

    fn ctx(quote: Decimal, balance: Decimal, held: Decimal) -> EvaluationContext {
        EvaluationContext {
            quote,
            stock_currency: Currency::Usd,
            account_currency: Currency::Usd,
            account_balance: balance,
            held_quantity: held,
        }
    }

    #[test]
    fn market_buy_fills_at_the_quote() {
        // AAPL x10 at $100 with $2000 on the account.
        let result = evaluate(
            &order(OrderSide::Buy, OrderType::Market, dec!(10), None),
            &ctx(dec!(100), dec!(2000), dec!(0)),
        );

        assert_eq!(
            result,
            Evaluation::Fill {
                fill_price: dec!(100),
                fx_rate: dec!(1),
                settlement_amount: dec!(1000),
                settlement_currency: Currency::Usd,
            }
        );
    }

    #[test]
    fn buy_with_exactly_enough_balance_is_accepted() {
        let result = evaluate(
            &order(OrderSide::Buy, OrderType::Market, dec!(10), None),
            &ctx(dec!(100), dec!(1000), dec!(0)),
        );
        assert!(matches!(result, Evaluation::Fill { .. }));
    }

    #[test]
    fn insufficient_funds_rejects_before_matching() {
        // 100 shares at $50 against a $100 balance.
        let result = evaluate(
            &order(OrderSide::Buy, OrderType::Market, dec!(100), None),
            &ctx(dec!(50), dec!(100), dec!(0)),
        );
        assert_eq!(
            result,
            Evaluation::Reject {
                reason: "insufficient funds".to_string()
            }
        );
    }

    #[test]
    fn sell_without_holdings_is_rejected() {
        let result = evaluate(
            &order(OrderSide::Sell, OrderType::Market, dec!(1), None),
            &ctx(dec!(300), dec!(0), dec!(0)),
        );
        assert_eq!(
            result,
            Evaluation::Reject {
                reason: "insufficient holdings".to_string()
            }
        );
    }

    #[test]
    fn limit_buy_above_market_rests() {
        // Limit $200, market at $210: wait for the pullback.
        let result = evaluate(
            &order(OrderSide::Buy, OrderType::Limit, dec!(5), Some(dec!(200))),
            &ctx(dec!(210), dec!(10000), dec!(0)),
        );
        assert_eq!(result, Evaluation::Rest);
    }

    #[test]
    fn limit_buy_fills_when_market_drops_through() {
        let result = evaluate(
            &order(OrderSide::Buy, OrderType::Limit, dec!(5), Some(dec!(200))),
            &ctx(dec!(195), dec!(10000), dec!(0)),
        );
        assert_eq!(
            result,
            Evaluation::Fill {
                fill_price: dec!(195),
                fx_rate: dec!(1),
                settlement_amount: dec!(975),
                settlement_currency: Currency::Usd,
            }
        );
    }

    #[test]
    fn limit_sell_fills_at_or_above_the_limit() {
        assert!(limit_matches(OrderSide::Sell, Some(dec!(100)), dec!(100)));
        assert!(limit_matches(OrderSide::Sell, Some(dec!(100)), dec!(101)));
        assert!(!limit_matches(OrderSide::Sell, Some(dec!(100)), dec!(99)));
    }

    #[test]
    fn cross_currency_buy_settles_in_the_account_currency() {
        // USD stock, CAD account: 2 x $100 x 1.35 = 270 CAD.
        let result = evaluate(
            &order(OrderSide::Buy, OrderType::Market, dec!(2), None),
            &EvaluationContext {
                quote: dec!(100),
                stock_currency: Currency::Usd,
                account_currency: Currency::Cad,
                account_balance: dec!(300),
                held_quantity: dec!(0),
            },
        );

        assert_eq!(
            result,
            Evaluation::Fill {
                fill_price: dec!(100),
                fx_rate: dec!(1.35),
                settlement_amount: dec!(270.00),
                settlement_currency: Currency::Cad,
            }
        );
    }

    #[test]
    fn stop_limit_is_evaluated_with_the_limit_rules() {
        let result = evaluate(
            &order(OrderSide::Sell, OrderType::StopLimit, dec!(1), Some(dec!(90))),
            &ctx(dec!(95), dec!(0), dec!(1)),
        );
        assert!(matches!(result, Evaluation::Fill { .. }));
    }

    #[test]
    fn limit_without_price_never_matches() {
        assert!(!limit_matches(OrderSide::Buy, None, dec!(1)));
        assert!(!limit_matches(OrderSide::Sell, None, dec!(1000000)));
    }
}
