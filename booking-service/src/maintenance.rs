use diesel_async::pooled_connection::bb8::Pool;
use diesel_async::AsyncPgConnection;
use std::time::Duration;
use tokio::time;
use tracing::{error, info};
use shared::BookingError;

use crate::idempotency;

type DbPool = Pool<AsyncPgConnection>;

/// Background reclamation of expired idempotency records.
///
/// Runs outside every request path; expiry only stops replay and conflict
/// detection for old keys, never the appointments created under them.
pub struct IdempotencyPurger {
    pool: DbPool,
    interval: Duration,
}

impl IdempotencyPurger {
    pub fn new(pool: DbPool, interval: Duration) -> Self {
        Self { pool, interval }
    }

    pub async fn run(&self) {
        let mut interval = time::interval(self.interval);

        loop {
            interval.tick().await;

            match self.sweep().await {
                Ok(0) => {}
                Ok(purged) => info!("Purged {} expired idempotency records", purged),
                Err(e) => error!("Error purging idempotency records: {}", e),
            }
        }
    }

    async fn sweep(&self) -> Result<usize, BookingError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| BookingError::Storage(format!("connection pool: {e}")))?;
        idempotency::purge_expired(&mut conn).await
    }
}
