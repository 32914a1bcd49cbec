//! # Retry Policy
//!
//! Bounded exponential backoff for transient marketplace failures.
//!
//! ```text
//! attempt 1 ──✗ RateLimited──► sleep ~initial ──► attempt 2 ──✗──► sleep ~2×initial
//!     ──► attempt 3 ──✗──► surface the error
//! ```
//!
//! Only errors with [`SyncError::is_retryable`] are repeated. A
//! `Retry-After` hint from the platform replaces the computed interval
//! (capped at `max_backoff`).

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::SyncSettings;
use crate::error::SyncResult;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        RetryPolicy {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: settings.initial_backoff(),
            max_backoff: settings.max_backoff(),
        }
    }

    /// Runs `op` until it succeeds, fails permanently, or the attempt budget
    /// is spent.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let mut backoff = self.create_backoff();
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let wait = err
                        .retry_after()
                        .or_else(|| backoff.next_backoff())
                        .unwrap_or(self.max_backoff)
                        .min(self.max_backoff);

                    warn!(
                        op = %label,
                        attempt,
                        max_attempts = self.max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "Transient failure, backing off"
                    );

                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use skeo_core::Platform;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn throttled() -> SyncError {
        SyncError::RateLimited {
            platform: Platform::Lazada,
            retry_after: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_retried_up_to_bound() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::default();

        let result: SyncResult<()> = policy
            .run("update_stock", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(throttled())
            })
            .await;

        assert!(matches!(result, Err(SyncError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::default();

        let result = policy
            .run("list_products", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(SyncError::Timeout("slow".into()))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_errors_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::default();

        let result: SyncResult<()> = policy
            .run("update_stock", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(SyncError::AuthExpired {
                    platform: Platform::Shopee,
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
        };
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let started = tokio::time::Instant::now();

        let _ = policy
            .run("update_stock", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(SyncError::RateLimited {
                    platform: Platform::Lazada,
                    retry_after: Some(Duration::from_secs(600)),
                })
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(started.elapsed() <= Duration::from_secs(2));
    }
}
