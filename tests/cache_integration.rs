//! Redis lock and idempotency store tests using testcontainers.
//!
//! These tests require Docker to be running.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use testcontainers::{
    GenericImage,
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
};

use ledger_core::app::IdempotencyMiddleware;
use ledger_core::domain::{AppError, IdempotencyError, IdempotencyStore, LockStore};
use ledger_core::infra::cache::connect;
use ledger_core::infra::{IdempotencyConfig, LockConfig, RedisIdempotencyStore, RedisLockStore};

async fn setup_redis() -> (ConnectionManager, testcontainers::ContainerAsync<GenericImage>) {
    let container = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379.tcp())
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
        .start()
        .await
        .expect("Failed to start redis container");

    let port = container
        .get_host_port_ipv4(6379)
        .await
        .expect("Failed to get redis port");

    let conn = connect(&format!("redis://127.0.0.1:{}", port))
        .await
        .expect("Failed to connect to redis");
    (conn, container)
}

#[tokio::test]
async fn test_lock_is_exclusive_until_released() {
    let (conn, _container) = setup_redis().await;
    let lock = RedisLockStore::new(conn.clone(), LockConfig::default());

    assert!(lock.acquire("k").await.unwrap());
    assert!(!lock.acquire("k").await.unwrap());
    assert!(lock.acquire("other").await.unwrap());

    lock.release("k").await.unwrap();
    assert!(lock.acquire("k").await.unwrap());
    assert!(lock.health_check().await.is_ok());
}

#[tokio::test]
async fn test_lock_key_format_and_expiry_value() {
    let (conn, _container) = setup_redis().await;
    let lock = RedisLockStore::new(conn.clone(), LockConfig::default());
    assert!(lock.acquire("payment-1").await.unwrap());

    let mut conn = conn;
    let value: Option<String> = redis::cmd("GET")
        .arg("lock:payment-1")
        .query_async(&mut conn)
        .await
        .unwrap();
    let value = value.expect("lock key missing");
    // e.g. 2025-03-01T12:30:05.123Z
    assert_eq!(value.len(), 24, "{value}");
    assert!(value.ends_with('Z'), "{value}");
    assert_eq!(&value[19..20], ".", "{value}");
    let expires_at = DateTime::parse_from_rfc3339(&value)
        .unwrap()
        .with_timezone(&Utc);
    assert!(expires_at > Utc::now());

    let ttl: i64 = redis::cmd("PTTL")
        .arg("lock:payment-1")
        .query_async(&mut conn)
        .await
        .unwrap();
    assert!(ttl > 0 && ttl <= 10_000, "ttl {ttl}");
}

#[tokio::test]
async fn test_lock_expires_after_ttl() {
    let (conn, _container) = setup_redis().await;
    let lock = RedisLockStore::new(
        conn,
        LockConfig {
            ttl: Duration::from_millis(100),
            ..Default::default()
        },
    );

    assert!(lock.acquire("k").await.unwrap());
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(lock.acquire("k").await.unwrap());
}

#[tokio::test]
async fn test_concurrent_acquire_has_one_winner() {
    let (conn, _container) = setup_redis().await;
    let lock = Arc::new(RedisLockStore::new(conn, LockConfig::default()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move { lock.acquire("contended").await.unwrap() })
        })
        .collect();
    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_idempotency_store_roundtrip() {
    let (conn, _container) = setup_redis().await;
    let store = RedisIdempotencyStore::new(conn, IdempotencyConfig::default());

    assert_eq!(store.get("k").await.unwrap(), None);
    store.set("k", "{\"a\":1}").await.unwrap();
    assert_eq!(store.get("k").await.unwrap().as_deref(), Some("{\"a\":1}"));
    store.delete("k").await.unwrap();
    assert_eq!(store.get("k").await.unwrap(), None);
}

#[tokio::test]
async fn test_middleware_over_redis() {
    let (conn, _container) = setup_redis().await;
    let middleware = IdempotencyMiddleware::new(
        Arc::new(RedisLockStore::new(conn.clone(), LockConfig::default())),
        Arc::new(RedisIdempotencyStore::new(conn, IdempotencyConfig::default())),
    );

    let run = |params: serde_json::Value, value: u32| {
        let middleware = middleware.clone();
        async move {
            middleware
                .execute(
                    Some("key-1"),
                    "createThing",
                    &params,
                    || async move { Ok::<_, AppError>(value) },
                    || IdempotencyError::ConcurrentRequest.into(),
                    || {
                        IdempotencyError::ParamsMismatch {
                            operation: "createThing".to_string(),
                        }
                        .into()
                    },
                )
                .await
        }
    };

    assert_eq!(run(serde_json::json!({"n": 1}), 7).await.unwrap(), 7);
    // Replayed, the new request body is never run
    assert_eq!(run(serde_json::json!({"n": 1}), 8).await.unwrap(), 7);
    let err = run(serde_json::json!({"n": 2}), 9).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::Idempotency(IdempotencyError::ParamsMismatch { .. })
    ));
}
