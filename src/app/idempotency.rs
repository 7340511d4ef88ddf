//! Idempotency keys for mutating operations.
//!
//! A key is guarded by the distributed lock for the duration of one call, so
//! two requests with the same key never run concurrently. Successful results
//! are cached together with the operation name and its parameters; a retry
//! with the same key replays the cached result, a reuse of the key for
//! different parameters is rejected.

use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::domain::{AppError, IdempotencyRecord, IdempotencyStore, LockStore};

/// Releases the lock when dropped, so a cancelled request does not keep
/// the key blocked until the lock TTL runs out.
struct LockGuard {
    lock: Arc<dyn LockStore>,
    key: String,
    released: bool,
}

impl LockGuard {
    fn new(lock: Arc<dyn LockStore>, key: &str) -> Self {
        Self {
            lock,
            key: key.to_string(),
            released: false,
        }
    }

    async fn release(mut self) {
        self.released = true;
        if let Err(e) = self.lock.release(&self.key).await {
            warn!(key = %self.key, error = %e, "Failed to release idempotency lock");
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(key = %self.key, "No runtime to release idempotency lock, waiting for TTL");
            return;
        };
        let lock = Arc::clone(&self.lock);
        let key = std::mem::take(&mut self.key);
        handle.spawn(async move {
            if let Err(e) = lock.release(&key).await {
                warn!(key = %key, error = %e, "Failed to release idempotency lock");
            }
        });
    }
}

/// Wraps mutating operations with idempotency-key semantics
#[derive(Clone)]
pub struct IdempotencyMiddleware {
    lock: Arc<dyn LockStore>,
    store: Arc<dyn IdempotencyStore>,
}

impl IdempotencyMiddleware {
    #[must_use]
    pub fn new(lock: Arc<dyn LockStore>, store: Arc<dyn IdempotencyStore>) -> Self {
        Self { lock, store }
    }

    pub fn lock_store(&self) -> &Arc<dyn LockStore> {
        &self.lock
    }

    /// Run `request` at most once per `key`.
    ///
    /// Without a key the request runs directly. `on_concurrent` builds the
    /// error returned while another call holds the key, `on_mismatch` the
    /// error returned when the key was used for a different request.
    #[instrument(skip_all, fields(key = ?key, operation = %operation_name))]
    pub async fn execute<P, R, F, Fut, C, M>(
        &self,
        key: Option<&str>,
        operation_name: &str,
        params: &P,
        request: F,
        on_concurrent: C,
        on_mismatch: M,
    ) -> Result<R, AppError>
    where
        P: Serialize + ?Sized,
        R: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, AppError>>,
        C: FnOnce() -> AppError,
        M: FnOnce() -> AppError,
    {
        let Some(key) = key else {
            return request().await;
        };

        if !self.lock.acquire(key).await? {
            debug!("Idempotency key is locked by a concurrent request");
            return Err(on_concurrent());
        }
        let guard = LockGuard::new(Arc::clone(&self.lock), key);
        let result = self
            .execute_locked(key, operation_name, params, request, on_mismatch)
            .await;
        guard.release().await;
        result
    }

    async fn execute_locked<P, R, F, Fut, M>(
        &self,
        key: &str,
        operation_name: &str,
        params: &P,
        request: F,
        on_mismatch: M,
    ) -> Result<R, AppError>
    where
        P: Serialize + ?Sized,
        R: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, AppError>>,
        M: FnOnce() -> AppError,
    {
        let params = serde_json::to_value(params)?;

        if let Some(raw) = self.store.get(key).await? {
            match serde_json::from_str::<IdempotencyRecord>(&raw) {
                Ok(record) if record.operation_name == operation_name && record.params == params => {
                    match serde_json::from_value::<R>(record.result) {
                        Ok(result) => {
                            debug!("Replaying cached result");
                            return Ok(result);
                        }
                        Err(e) => {
                            warn!(error = %e, "Cached idempotency result is unreadable, running request again");
                            self.forget(key).await;
                        }
                    }
                }
                Ok(_) => return Err(on_mismatch()),
                Err(e) => {
                    warn!(error = %e, "Cached idempotency record is unreadable, running request again");
                    self.forget(key).await;
                }
            }
        }

        let result = request().await?;
        self.remember(key, operation_name, params, &result).await;
        Ok(result)
    }

    /// Drop an unreadable record so later retries start clean
    async fn forget(&self, key: &str) {
        if let Err(e) = self.store.delete(key).await {
            warn!(error = %e, "Failed to delete unreadable idempotency record");
        }
    }

    /// Cache a successful result. The cache is advisory: failures are logged only.
    async fn remember<R: Serialize>(&self, key: &str, operation_name: &str, params: Value, result: &R) {
        let encoded = serde_json::to_value(result).and_then(|result| {
            serde_json::to_string(&IdempotencyRecord {
                operation_name: operation_name.to_string(),
                params,
                result,
            })
        });
        let encoded = match encoded {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(error = %e, "Failed to encode idempotency record");
                return;
            }
        };
        if let Err(e) = self.store.set(key, &encoded).await {
            warn!(error = %e, "Failed to store idempotency record");
        }
    }
}
