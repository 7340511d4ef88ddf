//! Infrastructure layer implementations.

pub mod cache;
pub mod database;

pub use cache::{
    IdempotencyConfig, InMemoryIdempotencyStore, InMemoryLockStore, LockConfig,
    RedisIdempotencyStore, RedisLockStore,
};
pub use database::{KeysetQuery, PostgresClient, PostgresConfig};
