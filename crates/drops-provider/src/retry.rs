use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::{Cancel, ProviderError};

/// Fixed-delay retry applied to every provider call.
///
/// Defaults: 10 attempts, 3s apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. Both the call and the inter-attempt delay race `cancel`.
    pub async fn run<T, F, Fut>(&self, operation: &str, cancel: &Cancel, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match cancel.guard(op()).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if err.is_cancelled() {
                return Err(err);
            }
            if attempt >= attempts || !err.is_retryable() {
                return Err(ProviderError::Exhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    last: Box::new(err),
                });
            }
            warn!("{operation} attempt {attempt}/{attempts} failed: {err}");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel_pair;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::ZERO)
    }

    fn unavailable() -> ProviderError {
        ProviderError::Api { status: 503, message: "unavailable".into() }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = &AtomicU32::new(0);
        let res = quick(5)
            .run("list droplets", &Cancel::never(), move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(unavailable())
                } else {
                    Ok("page")
                }
            })
            .await;
        assert_eq!(res.unwrap(), "page");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn surfaces_single_error_when_exhausted() {
        let calls = &AtomicU32::new(0);
        let res: Result<(), _> = quick(4)
            .run("delete volume", &Cancel::never(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(unavailable())
            })
            .await;
        assert!(matches!(res, Err(ProviderError::Exhausted { attempts: 4, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn does_not_retry_client_errors() {
        let calls = &AtomicU32::new(0);
        let res: Result<(), _> = quick(10)
            .run("create droplet", &Cancel::never(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Api { status: 422, message: "bad size".into() })
            })
            .await;
        assert_eq!(res.unwrap_err().status(), Some(422));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_retrying() {
        let (handle, cancel) = cancel_pair();
        let policy = RetryPolicy::new(10, Duration::from_secs(3600));
        let calls = &AtomicU32::new(0);
        let handle = &handle;
        let res: Result<(), _> = policy
            .run("list volumes", &cancel, move || {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    handle.cancel();
                }
                async { Err(unavailable()) }
            })
            .await;
        assert!(matches!(res, Err(ProviderError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
