//! Shared retry/back-off policy used uniformly by all three Model Gateway
//! capabilities (`4.B`: "retries up to 3 attempts with a fixed 2-second
//! back-off, then surfaces failure").

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{GatewayError, Result};

pub const MAX_ATTEMPTS: u32 = 3;
pub const BACKOFF: Duration = Duration::from_secs(2);

/// Runs `f` up to `MAX_ATTEMPTS` times, sleeping `BACKOFF` between
/// attempts. The future `f` produces is awaited cooperatively, so dropping
/// the caller's own future aborts whichever attempt is in flight (`4.B`:
/// "Cancellation propagates").
///
/// Only `GatewayError::Transport` is retried (`4.B`, `7`: retry is scoped
/// to timeout/connection failures); a `BadResponse` or `Cancelled` surfaces
/// on the first failure instead of being retried 3x.
pub async fn with_retry<F, Fut, T>(capability: &'static str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 1..=MAX_ATTEMPTS {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if matches!(e, GatewayError::Transport { .. }) => {
                warn!(capability, attempt, error = %e, "model gateway call failed");
                last_err = Some(e);
                if attempt < MAX_ATTEMPTS {
                    tokio::time::sleep(BACKOFF).await;
                }
            }
            Err(e) => {
                warn!(capability, attempt, error = %e, "model gateway call failed, not retrying");
                return Err(e);
            }
        }
    }
    Err(last_err.unwrap_or(GatewayError::Cancelled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_three_times_then_fails() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(GatewayError::Transport {
                    capability: "test",
                    source: anyhow::anyhow!("dead port"),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn succeeds_without_retry_on_first_try() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bad_response_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GatewayError::BadResponse("not json".into())) }
        })
        .await;
        assert!(matches!(result, Err(GatewayError::BadResponse(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
