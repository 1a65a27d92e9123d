//! Pipeline Metrics
//!
//! Counters and histograms for the trade execution pipeline, recorded
//! through the `metrics` facade. Exposition is owned by the deployment's
//! observability collaborator, so no exporter is installed here.

#![allow(dead_code)]

use metrics::{counter, histogram};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Metric names as constants for consistency
pub mod names {
    // Order flow
    pub const ORDERS_SUBMITTED_TOTAL: &str = "orders_submitted_total";
    pub const ORDERS_FILLED_TOTAL: &str = "orders_filled_total";
    pub const ORDERS_REJECTED_TOTAL: &str = "orders_rejected_total";
    pub const ORDERS_CANCELLED_TOTAL: &str = "orders_cancelled_total";
    pub const ORDERS_RESTED_TOTAL: &str = "orders_rested_total";

    // Settlement
    pub const SETTLEMENTS_TOTAL: &str = "settlements_total";
    pub const SETTLEMENTS_FAILED_TOTAL: &str = "settlements_failed_total";
    pub const SETTLEMENT_AMOUNT: &str = "settlement_amount";
}

pub fn record_order_submitted(symbol: &str) {
    counter!(names::ORDERS_SUBMITTED_TOTAL, "symbol" => symbol.to_string()).increment(1);
}

pub fn record_order_filled(symbol: &str, settlement_amount: Decimal) {
    counter!(names::ORDERS_FILLED_TOTAL, "symbol" => symbol.to_string()).increment(1);
    histogram!(names::SETTLEMENT_AMOUNT, "symbol" => symbol.to_string())
        .record(settlement_amount.to_f64().unwrap_or(0.0));
}

pub fn record_order_rejected(symbol: &str, reason: &str) {
    counter!(
        names::ORDERS_REJECTED_TOTAL,
        "symbol" => symbol.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

pub fn record_order_cancelled(symbol: &str) {
    counter!(names::ORDERS_CANCELLED_TOTAL, "symbol" => symbol.to_string()).increment(1);
}

pub fn record_order_rested(symbol: &str) {
    counter!(names::ORDERS_RESTED_TOTAL, "symbol" => symbol.to_string()).increment(1);
}

pub fn record_settlement(symbol: &str, amount: Decimal) {
    counter!(names::SETTLEMENTS_TOTAL, "symbol" => symbol.to_string()).increment(1);
    histogram!(names::SETTLEMENT_AMOUNT, "symbol" => symbol.to_string())
        .record(amount.to_f64().unwrap_or(0.0));
}

pub fn record_settlement_failed(symbol: &str) {
    counter!(names::SETTLEMENTS_FAILED_TOTAL, "symbol" => symbol.to_string()).increment(1);
}
