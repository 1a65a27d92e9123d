//! Durable Event Bus Adapter
//!
//! Wraps Redis Streams as an at-least-once pub/sub substrate with queue
//! groups and manual acknowledgement:
//!
//! - `publish` appends to a capped stream (`XADD`); the returned entry id is
//!   the server-side acknowledgement.
//! - `queue_subscribe` attaches a named durable consumer group
//!   (`XGROUP CREATE ... MKSTREAM`, idempotent) and load-balances entries
//!   across group members (`XREADGROUP`).
//! - A handler acks by returning `Ok` (`XACK`); a retriable failure naks by
//!   withholding the ack, and a pending-claim sweep redelivers the entry
//!   once it has been idle past the redelivery threshold.
//! - A janitor task trims entries older than the retention window.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamClaimReply, StreamId, StreamMaxlen, StreamPendingCountReply, StreamReadOptions,
    StreamReadReply,
};
use redis::AsyncCommands;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::AppError;
use crate::models::events::subjects;

/// Entries idle longer than this are considered nak'd (or orphaned by a
/// dead consumer) and are claimed for redelivery.
const REDELIVERY_IDLE_MS: usize = 30_000;

/// Max entries fetched per read / claim round.
const READ_BATCH: usize = 16;

/// Block timeout for `XREADGROUP`, milliseconds.
const READ_BLOCK_MS: usize = 5_000;

/// How often the janitor enforces the age cap.
const TRIM_INTERVAL_SECS: u64 = 3_600;

/// Stream key for a bus subject.
fn stream_key(subject: &str) -> String {
    format!("events:{}", subject)
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    pub redis_url: String,
    /// Approximate per-stream entry cap (size retention).
    pub max_len: usize,
    /// Age retention window, seconds.
    pub max_age_secs: u64,
}

pub struct EventBus {
    conn: ConnectionManager,
    config: BusConfig,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EventBus {
    /// Connect to the bus substrate and start the retention janitor.
    pub async fn connect(config: BusConfig) -> Result<Arc<Self>, AppError> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let conn = ConnectionManager::new(client).await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let bus = Arc::new(Self {
            conn,
            config,
            shutdown_tx,
            shutdown_rx,
            tasks: Mutex::new(Vec::new()),
        });

        bus.clone().start_trim_janitor();
        tracing::info!("Event bus connected at {}", bus.config.redis_url);
        Ok(bus)
    }

    /// Publish a payload to a subject. Returns the stream entry id assigned
    /// by the server; a failure here is retriable and must be surfaced to
    /// the caller.
    pub async fn publish(&self, subject: &str, payload: &[u8]) -> Result<String, AppError> {
        let mut conn = self.conn.clone();
        let key = stream_key(subject);

        let entry_id: String = conn
            .xadd_maxlen(
                &key,
                StreamMaxlen::Approx(self.config.max_len),
                "*",
                &[("data", payload)],
            )
            .await?;

        tracing::debug!(subject, entry_id, "published event");
        Ok(entry_id)
    }

    /// Serialize and publish an event.
    pub async fn publish_event<T: serde::Serialize>(
        &self,
        subject: &str,
        event: &T,
    ) -> Result<String, AppError> {
        let payload = serde_json::to_vec(event)?;
        self.publish(subject, &payload).await
    }

    /// Attach a durable queue-group consumer to a subject and dispatch
    /// entries to `handler` until shutdown.
    ///
    /// Ack/nak policy: `Ok` acks; a retriable error withholds the ack so
    /// the pending sweep redelivers; a deterministic error is acked and
    /// logged, since redelivery would fail identically forever.
    pub async fn queue_subscribe<F, Fut>(
        self: &Arc<Self>,
        subject: &str,
        group: &str,
        consumer: &str,
        handler: F,
    ) -> Result<(), AppError>
    where
        F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        let key = stream_key(subject);
        self.ensure_group(&key, group).await?;

        let subject = subject.to_string();
        let group = group.to_string();
        let consumer = consumer.to_string();
        let mut conn = self.conn.clone();
        let mut shutdown = self.shutdown_rx.clone();

        let handle = tokio::spawn(async move {
            tracing::info!(subject, group, consumer, "queue subscriber started");

            loop {
                if *shutdown.borrow() {
                    break;
                }

                // Redeliver entries nak'd (or orphaned) past the idle
                // threshold before reading new ones.
                if let Err(e) =
                    Self::claim_stale(&mut conn, &key, &group, &consumer, &handler).await
                {
                    tracing::warn!(subject, group, "pending sweep failed: {}", e);
                }

                let options = StreamReadOptions::default()
                    .group(&group, &consumer)
                    .count(READ_BATCH)
                    .block(READ_BLOCK_MS);

                let keys = [&key];
                let ids = [">"];
                let read = tokio::select! {
                    _ = shutdown.changed() => break,
                    r = conn.xread_options::<_, _, StreamReadReply>(&keys, &ids, &options) => r,
                };

                let reply = match read {
                    Ok(reply) => reply,
                    Err(e) => {
                        tracing::warn!(subject, group, "stream read failed: {}", e);
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        continue;
                    }
                };

                for stream in reply.keys {
                    for entry in stream.ids {
                        Self::dispatch(&mut conn, &key, &group, &entry, &handler).await;
                    }
                }
            }

            tracing::info!(subject, group, consumer, "queue subscriber stopped");
        });

        self.tasks.lock().push(handle);
        Ok(())
    }

    /// Drain in-flight handlers and release the connection.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!("bus task did not drain cleanly: {}", e);
            }
        }
        tracing::info!("event bus drained");
    }

    /// Idempotent consumer-group creation; the stream is created alongside
    /// it if missing.
    async fn ensure_group(&self, key: &str, group: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let created: Result<String, redis::RedisError> =
            conn.xgroup_create_mkstream(key, group, "0").await;

        match created {
            Ok(_) => {
                tracing::info!(key, group, "created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Claim and re-dispatch pending entries idle past the redelivery
    /// threshold.
    async fn claim_stale<F, Fut>(
        conn: &mut ConnectionManager,
        key: &str,
        group: &str,
        consumer: &str,
        handler: &F,
    ) -> Result<(), AppError>
    where
        F: Fn(Vec<u8>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<(), AppError>> + Send,
    {
        let pending: StreamPendingCountReply = conn
            .xpending_count(key, group, "-", "+", READ_BATCH)
            .await?;

        let stale: Vec<String> = pending
            .ids
            .iter()
            .filter(|p| p.last_delivered_ms >= REDELIVERY_IDLE_MS)
            .map(|p| p.id.clone())
            .collect();

        if stale.is_empty() {
            return Ok(());
        }

        let claimed: StreamClaimReply = conn
            .xclaim(key, group, consumer, REDELIVERY_IDLE_MS, &stale)
            .await?;

        for entry in claimed.ids {
            tracing::debug!(key, id = %entry.id, "redelivering nak'd entry");
            Self::dispatch(conn, key, group, &entry, handler).await;
        }

        Ok(())
    }

    async fn dispatch<F, Fut>(
        conn: &mut ConnectionManager,
        key: &str,
        group: &str,
        entry: &StreamId,
        handler: &F,
    ) where
        F: Fn(Vec<u8>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<(), AppError>> + Send,
    {
        let payload = match entry.map.get("data") {
            Some(value) => match redis::from_redis_value::<Vec<u8>>(value) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!(key, id = %entry.id, "undecodable entry payload: {}", e);
                    Self::ack(conn, key, group, &entry.id).await;
                    return;
                }
            },
            None => {
                tracing::error!(key, id = %entry.id, "entry missing data field");
                Self::ack(conn, key, group, &entry.id).await;
                return;
            }
        };

        match handler(payload).await {
            Ok(()) => Self::ack(conn, key, group, &entry.id).await,
            Err(e) if e.is_retriable() => {
                // Nak: leave the entry pending for the sweep to redeliver.
                tracing::warn!(key, id = %entry.id, "handler nak'd entry: {}", e);
            }
            Err(e) => {
                tracing::error!(key, id = %entry.id, "handler failed permanently: {}", e);
                Self::ack(conn, key, group, &entry.id).await;
            }
        }
    }

    async fn ack(conn: &mut ConnectionManager, key: &str, group: &str, id: &str) {
        let acked: Result<i64, redis::RedisError> = conn.xack(key, group, &[id]).await;
        if let Err(e) = acked {
            tracing::warn!(key, id, "ack failed (entry will be redelivered): {}", e);
        }
    }

    /// Hourly age-cap enforcement across the pipeline's streams.
    fn start_trim_janitor(self: Arc<Self>) {
        let mut shutdown = self.shutdown_rx.clone();
        let bus = self.clone();

        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(TRIM_INTERVAL_SECS));

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {}
                }

                let horizon_ms = chrono::Utc::now().timestamp_millis()
                    - (bus.config.max_age_secs as i64) * 1_000;
                let min_id = format!("{}-0", horizon_ms.max(0));

                for subject in [
                    subjects::ORDERS_CREATED,
                    subjects::ORDERS_FILLED,
                    subjects::ORDERS_REJECTED,
                    subjects::ORDERS_CANCELLED,
                ] {
                    let key = stream_key(subject);
                    let mut conn = bus.conn.clone();
                    let trimmed: Result<i64, redis::RedisError> = redis::cmd("XTRIM")
                        .arg(&key)
                        .arg("MINID")
                        .arg("~")
                        .arg(&min_id)
                        .query_async(&mut conn)
                        .await;

                    match trimmed {
                        Ok(n) if n > 0 => tracing::debug!(key, n, "trimmed aged entries"),
                        Ok(_) => {}
                        Err(e) => tracing::warn!(key, "stream trim failed: {}", e),
                    }
                }
            }
        });

        self.tasks.lock().push(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_keys_are_namespaced_per_subject() {
        assert_eq!(stream_key(subjects::ORDERS_CREATED), "events:orders.created");
        assert_eq!(stream_key(subjects::ORDERS_FILLED), "events:orders.filled");
        assert_ne!(
            stream_key(subjects::ORDERS_REJECTED),
            stream_key(subjects::ORDERS_CANCELLED)
        );
    }
}
