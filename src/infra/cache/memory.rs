//! In-process lock and idempotency stores backed by `DashMap`.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::Instant;
use tracing::{debug, instrument};

use super::{IdempotencyConfig, LockConfig};
use crate::domain::{AppError, IdempotencyStore, LockStore};

/// Lock store for single-process deployments and tests
pub struct InMemoryLockStore {
    config: LockConfig,
    locks: DashMap<String, Instant>,
}

impl InMemoryLockStore {
    #[must_use]
    pub fn new(config: LockConfig) -> Self {
        Self {
            config,
            locks: DashMap::new(),
        }
    }

    /// Number of locks currently held (expired entries included until reused)
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Default for InMemoryLockStore {
    fn default() -> Self {
        Self::new(LockConfig::default())
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    #[instrument(skip(self))]
    async fn acquire(&self, key: &str) -> Result<bool, AppError> {
        let now = Instant::now();
        let expires_at = now + self.config.ttl;
        // The entry guard holds the shard lock, so check-and-set is atomic
        match self.locks.entry(self.config.key(key)) {
            Entry::Occupied(mut entry) => {
                if *entry.get() <= now {
                    debug!("Reclaiming expired lock");
                    entry.insert(expires_at);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(expires_at);
                Ok(true)
            }
        }
    }

    #[instrument(skip(self))]
    async fn release(&self, key: &str) -> Result<(), AppError> {
        self.locks.remove(&self.config.key(key));
        Ok(())
    }
}

struct CachedRecord {
    value: String,
    expires_at: Instant,
}

/// Idempotency store for single-process deployments and tests
pub struct InMemoryIdempotencyStore {
    config: IdempotencyConfig,
    records: DashMap<String, CachedRecord>,
}

impl InMemoryIdempotencyStore {
    #[must_use]
    pub fn new(config: IdempotencyConfig) -> Self {
        Self {
            config,
            records: DashMap::new(),
        }
    }
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new(IdempotencyConfig::default())
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let key = self.config.key(key);
        let now = Instant::now();
        if let Some(record) = self.records.get(&key) {
            if record.expires_at > now {
                return Ok(Some(record.value.clone()));
            }
        }
        self.records.remove_if(&key, |_, record| record.expires_at <= now);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), AppError> {
        if !self.config.is_enabled() {
            return Ok(());
        }
        self.records.insert(
            self.config.key(key),
            CachedRecord {
                value: value.to_string(),
                expires_at: Instant::now() + self.config.ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        self.records.remove(&self.config.key(key));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn short_lock(ttl_ms: u64) -> InMemoryLockStore {
        InMemoryLockStore::new(LockConfig {
            ttl: Duration::from_millis(ttl_ms),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_acquire_is_exclusive_until_release() {
        let store = InMemoryLockStore::default();
        assert!(store.acquire("k").await.unwrap());
        assert!(!store.acquire("k").await.unwrap());
        assert!(store.acquire("other").await.unwrap());

        store.release("k").await.unwrap();
        assert!(store.acquire("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lock_can_be_reacquired() {
        let store = short_lock(20);
        assert!(store.acquire("k").await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.acquire("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_acquire_has_single_winner() {
        let store = Arc::new(InMemoryLockStore::default());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.acquire("contended").await.unwrap() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_idempotency_store_roundtrip_and_delete() {
        let store = InMemoryIdempotencyStore::default();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", "{\"a\":1}").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("{\"a\":1}"));

        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_idempotency_records_expire() {
        let store = InMemoryIdempotencyStore::new(IdempotencyConfig {
            ttl: Duration::from_millis(20),
            ..Default::default()
        });
        store.set("k", "v").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_zero_ttl_disables_storing() {
        let store = InMemoryIdempotencyStore::new(IdempotencyConfig {
            ttl: Duration::ZERO,
            ..Default::default()
        });
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
