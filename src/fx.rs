//! Fixed FX Lookup Table
//!
//! Converts a stock-currency amount into the account's currency. Rates are
//! a simulation constant, not configurable.

use rust_decimal::Decimal;

use crate::models::portfolio::Currency;

/// Multiplicative rate for `from` -> `to`. Unknown pairs fall back to 1.0.
pub fn exchange_rate(from: Currency, to: Currency) -> Decimal {
    match (from, to) {
        (a, b) if a == b => Decimal::ONE,
        (Currency::Usd, Currency::Cad) => Decimal::new(135, 2),
        (Currency::Cad, Currency::Usd) => Decimal::new(74, 2),
        _ => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn same_currency_is_identity() {
        assert_eq!(exchange_rate(Currency::Usd, Currency::Usd), dec!(1));
        assert_eq!(exchange_rate(Currency::Cad, Currency::Cad), dec!(1));
    }

    #[test]
    fn cross_rates_match_the_table() {
        assert_eq!(exchange_rate(Currency::Usd, Currency::Cad), dec!(1.35));
        assert_eq!(exchange_rate(Currency::Cad, Currency::Usd), dec!(0.74));
    }

    #[test]
    fn usd_cad_round_trip_is_lossy() {
        // The table is not arbitrage-free; 1 USD -> CAD -> USD = 0.999.
        let rate = exchange_rate(Currency::Usd, Currency::Cad)
            * exchange_rate(Currency::Cad, Currency::Usd);
        assert_eq!(rate, dec!(0.9990));
    }
}
