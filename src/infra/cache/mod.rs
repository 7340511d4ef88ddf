//! Lock and idempotency stores.
//!
//! Redis is the shared store for multi-process deployments. The in-memory
//! stores keep the same semantics inside one process and back the tests.

pub mod memory;
pub mod redis_store;

use std::env;
use std::time::Duration;

pub use memory::{InMemoryIdempotencyStore, InMemoryLockStore};
pub use redis_store::{RedisIdempotencyStore, RedisLockStore, connect};

/// Distributed lock configuration
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Prefix of every lock key, stored as `{prefix}:{key}`
    pub key_prefix: String,
    /// Lifetime of a lock that is never released
    pub ttl: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            key_prefix: "lock".to_string(),
            ttl: Duration::from_secs(10),
        }
    }
}

impl LockConfig {
    /// Load from `LOCK_KEY_PREFIX` / `LOCK_TTL_MS`. A zero TTL falls back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let key_prefix = env::var("LOCK_KEY_PREFIX")
            .ok()
            .filter(|p| !p.is_empty())
            .unwrap_or(defaults.key_prefix);
        let ttl = env::var("LOCK_TTL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(defaults.ttl);
        Self { key_prefix, ttl }
    }

    pub fn key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }
}

/// Idempotency cache configuration
#[derive(Debug, Clone)]
pub struct IdempotencyConfig {
    pub key_prefix: String,
    /// Record lifetime; zero disables storing
    pub ttl: Duration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            key_prefix: "idempotency".to_string(),
            ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl IdempotencyConfig {
    /// Load from `IDEMPOTENCY_KEY_PREFIX` / `IDEMPOTENCY_TTL_MS`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let key_prefix = env::var("IDEMPOTENCY_KEY_PREFIX")
            .ok()
            .filter(|p| !p.is_empty())
            .unwrap_or(defaults.key_prefix);
        let ttl = env::var("IDEMPOTENCY_TTL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.ttl);
        Self { key_prefix, ttl }
    }

    pub fn key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }
}

/// Milliseconds for a Redis `PX` argument, at least 1
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_config_default() {
        let config = LockConfig::default();
        assert_eq!(config.key_prefix, "lock");
        assert_eq!(config.ttl, Duration::from_secs(10));
        assert_eq!(config.key("abc"), "lock:abc");
    }

    #[test]
    fn test_idempotency_config_default() {
        let config = IdempotencyConfig::default();
        assert_eq!(config.key("abc"), "idempotency:abc");
        assert_eq!(config.ttl, Duration::from_millis(86_400_000));
        assert!(config.is_enabled());

        let disabled = IdempotencyConfig {
            ttl: Duration::ZERO,
            ..config
        };
        assert!(!disabled.is_enabled());
    }

    #[test]
    fn test_ttl_millis() {
        assert_eq!(ttl_millis(Duration::from_secs(10)), 10_000);
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
    }
}
