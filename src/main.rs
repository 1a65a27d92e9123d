use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod bus;
mod config;
mod db;
mod error;
mod fx;
mod market;
mod metrics;
mod models;
mod services;
mod utils;

use crate::bus::{BusConfig, EventBus};
use crate::config::AppConfig;
use crate::db::{Database, OrderStore, PortfolioStore};
use crate::market::MarketDataClient;
use crate::services::engine::MatchingEngine;
use crate::services::intake::OrderService;
use crate::services::lifecycle::OrderLifecycleUpdater;
use crate::services::portfolio::PortfolioService;
use crate::services::settlement::SettlementService;

pub struct AppState {
    pub config: AppConfig,
    pub orders: OrderService,
    pub portfolio: PortfolioService,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "papertrade_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = AppConfig::load()?;

    tracing::info!("Starting papertrade backend v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {}", config.environment);

    // Initialize database
    let database = Database::connect(&config.database_url).await?;
    tracing::info!("Database connected");

    // Initialize the durable event bus
    let event_bus = EventBus::connect(BusConfig {
        redis_url: config.redis_url.clone(),
        max_len: config.stream_max_len,
        max_age_secs: config.stream_max_age_secs,
    })
    .await?;

    // Market-data collaborator client (bounded outbound deadline)
    let market = MarketDataClient::new(
        &config.market_data_url,
        Duration::from_secs(config.request_timeout_secs),
    )?;

    let order_store = OrderStore::new(database.pool.clone());
    let portfolio_store = PortfolioStore::new(database.pool.clone());

    // Matching engine: orders.created consumer + resting-book ticker
    let engine = MatchingEngine::new(
        event_bus.clone(),
        market.clone(),
        portfolio_store.clone(),
        Duration::from_secs(config.engine_tick_secs),
    );
    engine.start().await?;

    // Order lifecycle updater: orders.filled / orders.rejected consumer
    let lifecycle = OrderLifecycleUpdater::new(OrderStore::new(database.pool.clone()));
    lifecycle.start(&event_bus).await?;

    // Settlement: independent orders.filled consumer
    let settlement = SettlementService::new(PortfolioStore::new(database.pool.clone()));
    settlement.start(&event_bus).await?;

    // Build application state for the RPC surface
    let state = Arc::new(AppState {
        config: config.clone(),
        orders: OrderService::new(order_store, event_bus.clone(), market.clone()),
        portfolio: PortfolioService::new(portfolio_store),
    });

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api::routes::create_router(state.clone()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cooperative shutdown: stop the ticker, drain in-flight bus handlers,
    // then release the pools.
    tracing::info!("Shutting down");
    engine.stop().await;
    event_bus.close().await;
    database.close().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
    }
}

async fn health_check() -> &'static str {
    "OK"
}
