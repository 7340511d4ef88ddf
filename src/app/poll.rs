//! Bounded polling for values that appear asynchronously.

use std::future::Future;
use std::time::Duration;

use crate::domain::AppError;

/// Call `request` every `frequency` until it yields a value or `timeout` elapses.
///
/// Returns `Ok(None)` on timeout. Errors from `request` stop polling.
pub async fn poll<T, F, Fut>(
    request: F,
    frequency: Duration,
    timeout: Duration,
) -> Result<Option<T>, AppError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Option<T>, AppError>>,
{
    match tokio::time::timeout(timeout, poll_until_found(&request, frequency)).await {
        Ok(result) => result.map(Some),
        Err(_) => Ok(None),
    }
}

async fn poll_until_found<T, F, Fut>(request: &F, frequency: Duration) -> Result<T, AppError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Option<T>, AppError>>,
{
    loop {
        if let Some(value) = request().await? {
            return Ok(value);
        }
        tokio::time::sleep(frequency).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_returns_value_once_available() {
        let calls = AtomicUsize::new(0);
        let result = poll(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AppError>((n >= 2).then_some(n))
            },
            Duration::from_millis(1),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert_eq!(result, Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_times_out_with_none() {
        let result = poll(
            || async { Ok::<Option<u8>, AppError>(None) },
            Duration::from_millis(5),
            Duration::from_millis(30),
        )
        .await
        .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_error_stops_polling() {
        let calls = AtomicUsize::new(0);
        let result = poll(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<Option<u8>, _>(AppError::Internal("boom".to_string()))
            },
            Duration::from_millis(1),
            Duration::from_secs(1),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
