use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::StateError;

/// Default attempt bound for transient storage errors.
pub const DEFAULT_ATTEMPTS: u32 = 3;

const BASE_DELAY: Duration = Duration::from_millis(50);

/// Run `op`, retrying transient storage errors up to `attempts` times
/// with exponential backoff. Non-transient errors fail immediately.
pub async fn with_retry<T, F, Fut>(
    operation: &str,
    attempts: u32,
    mut op: F,
) -> Result<T, StateError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StateError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < attempts => {
                let delay = BASE_DELAY * 2u32.pow(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = %delay.as_millis(),
                    error = %err,
                    "transient storage error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test", 3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StateError::Backend("database is locked".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_fails_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry("test", 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StateError::Backend("no such table".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
