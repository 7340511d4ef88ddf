//! Redis-backed lock and idempotency stores.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use redis::aio::ConnectionManager;
use tracing::{info, instrument};

use super::{IdempotencyConfig, LockConfig, ttl_millis};
use crate::domain::{AppError, CacheError, IdempotencyStore, LockStore};

/// Open a reconnecting connection to Redis
pub async fn connect(redis_url: &str) -> Result<ConnectionManager, AppError> {
    info!("Connecting to Redis...");
    let client = redis::Client::open(redis_url)
        .map_err(|e| AppError::Cache(CacheError::Connection(e.to_string())))?;
    let manager = ConnectionManager::new(client)
        .await
        .map_err(|e| AppError::Cache(CacheError::Connection(e.to_string())))?;
    info!("Connected to Redis");
    Ok(manager)
}

/// Lock value: the expiry as ISO-8601 UTC with millisecond precision
fn lock_value(expires_at: DateTime<Utc>) -> String {
    expires_at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Lock store shared by every process connected to the same Redis.
///
/// Keys are `{prefix}:{key}` holding the ISO-8601 expiry; the TTL is enforced
/// by Redis itself through `PX`.
#[derive(Clone)]
pub struct RedisLockStore {
    conn: ConnectionManager,
    config: LockConfig,
}

impl RedisLockStore {
    #[must_use]
    pub fn new(conn: ConnectionManager, config: LockConfig) -> Self {
        Self { conn, config }
    }

    fn expires_at(&self) -> DateTime<Utc> {
        let ttl = TimeDelta::from_std(self.config.ttl).unwrap_or(TimeDelta::MAX);
        Utc::now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    #[instrument(skip(self))]
    async fn acquire(&self, key: &str) -> Result<bool, AppError> {
        let mut conn = self.conn.clone();
        // SET .. NX replies nil when the key already exists
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.config.key(key))
            .arg(lock_value(self.expires_at()))
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(self.config.ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    #[instrument(skip(self))]
    async fn release(&self, key: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(self.config.key(key))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// Idempotency store shared through Redis
#[derive(Clone)]
pub struct RedisIdempotencyStore {
    conn: ConnectionManager,
    config: IdempotencyConfig,
}

impl RedisIdempotencyStore {
    #[must_use]
    pub fn new(conn: ConnectionManager, config: IdempotencyConfig) -> Self {
        Self { conn, config }
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(self.config.key(key))
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        if !self.config.is_enabled() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("SET")
            .arg(self.config.key(key))
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(self.config.ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(self.config.key(key))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_lock_value_is_iso_millis_utc() {
        let at = Utc
            .with_ymd_and_hms(2025, 3, 1, 12, 30, 5)
            .unwrap()
            .checked_add_signed(TimeDelta::nanoseconds(123_456_789))
            .unwrap();
        assert_eq!(lock_value(at), "2025-03-01T12:30:05.123Z");
    }
}
