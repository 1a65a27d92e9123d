//! Database Connection Management
//!
//! One Postgres pool per process, shared across handlers. Startup retries
//! the initial connection so the service tolerates the database coming up
//! after it in a compose environment.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::AppError;

pub mod orders;
pub mod portfolio;

pub use orders::OrderStore;
pub use portfolio::PortfolioStore;

const MAX_CONNECT_ATTEMPTS: u32 = 10;
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct Database {
    pub pool: PgPool,
}

impl Database {
    /// Connect with retry; each attempt is bounded by the pool's acquire
    /// timeout so a hung database cannot stall startup forever.
    pub async fn connect(database_url: &str) -> Result<Self, AppError> {
        let mut last_error = None;

        for attempt in 1..=MAX_CONNECT_ATTEMPTS {
            let connected = PgPoolOptions::new()
                .max_connections(16)
                .acquire_timeout(Duration::from_secs(5))
                .connect(database_url)
                .await;

            match connected {
                Ok(pool) => {
                    tracing::info!("database connected on attempt {}", attempt);
                    return Ok(Self { pool });
                }
                Err(e) => {
                    tracing::warn!(
                        "database connection attempt {}/{} failed: {}",
                        attempt,
                        MAX_CONNECT_ATTEMPTS,
                        e
                    );
                    last_error = Some(e);
                    if attempt < MAX_CONNECT_ATTEMPTS {
                        tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
                    }
                }
            }
        }

        Err(AppError::unavailable(format!(
            "could not connect to database after {} attempts: {}",
            MAX_CONNECT_ATTEMPTS,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
