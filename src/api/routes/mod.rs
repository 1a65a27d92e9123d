//! API Route Definitions

use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;

use super::handlers::{accounts, orders, watchlist};
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Order service RPC surface
        .route("/orders", post(orders::create_order).get(orders::list_orders))
        .route(
            "/orders/:order_id",
            get(orders::get_order).delete(orders::cancel_order),
        )
        // Portfolio service
        .route("/accounts", post(accounts::create_account))
        .route(
            "/accounts/:account_id",
            get(accounts::get_account).delete(accounts::delete_account),
        )
        .route("/accounts/:account_id/deposit", post(accounts::deposit))
        .route("/accounts/:account_id/holdings", get(accounts::get_holdings))
        .route(
            "/accounts/:account_id/holdings/:symbol",
            get(accounts::get_holding),
        )
        .route(
            "/accounts/:account_id/transactions",
            get(accounts::get_transactions),
        )
        .route("/transfers", post(accounts::transfer))
        .route(
            "/users/:user_id/portfolio",
            get(accounts::get_portfolio_summary),
        )
        // Watchlist
        .route(
            "/users/:user_id/watchlist",
            get(watchlist::get_watchlist).post(watchlist::add_to_watchlist),
        )
        .route(
            "/users/:user_id/watchlist/:symbol",
            delete(watchlist::remove_from_watchlist),
        )
        .with_state(state)
}
