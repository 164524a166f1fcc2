use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};

/// Decides whether a failed client call is retried and how long to back
/// off: `delay = (1 << attempted) * scale_factor`, optionally shaved by
/// a random jitter fraction.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed after the initial attempt.
    pub max_retries: u32,
    /// Base unit of the exponential backoff.
    pub scale_factor: Duration,
    /// Fraction of the delay randomly subtracted; 0 keeps the schedule
    /// exact.
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            scale_factor: Duration::from_millis(25),
            jitter_fraction: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Build a policy from the mount options' raw numbers.
    pub fn new(max_retries: u32, scale_factor: Duration) -> Self {
        Self {
            max_retries,
            scale_factor,
            jitter_fraction: 0.0,
        }
    }

    /// True when the error is transient and retries remain.
    /// `attempted` counts retries already performed.
    pub fn should_retry(&self, error: &ClientError, attempted: u32) -> bool {
        error.is_retryable() && attempted < self.max_retries
    }

    /// Backoff before retry number `attempted + 1`.
    pub fn delay_before_next(&self, attempted: u32) -> Duration {
        let base = self.scale_factor * (1u32 << attempted.min(20));
        if self.jitter_fraction > 0.0 {
            let shave = base.mul_f64(self.jitter_fraction.min(1.0));
            let jitter = shave.mul_f64(rand::random::<f64>());
            base - jitter
        } else {
            base
        }
    }
}

/// Run `op` under the policy, sleeping between attempts.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, context: &str, op: F) -> ClientResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ClientResult<T>>,
{
    with_retry_cancellable(policy, context, || false, op).await
}

/// Run `op` under the policy, checking `cancelled` before every backoff
/// sleep so cooperative cancellation does not wait out the schedule.
pub async fn with_retry_cancellable<T, C, F, Fut>(
    policy: &RetryPolicy,
    context: &str,
    cancelled: C,
    mut op: F,
) -> ClientResult<T>
where
    C: Fn() -> bool,
    F: FnMut() -> Fut,
    Fut: Future<Output = ClientResult<T>>,
{
    let mut attempted = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !policy.should_retry(&error, attempted) {
                    if error.is_retryable() {
                        warn!(context, attempts = attempted + 1, error = %error, "giving up after retries");
                    }
                    return Err(error);
                }
                if cancelled() {
                    return Err(ClientError::Cancelled {
                        context: context.to_string(),
                    });
                }
                let delay = policy.delay_before_next(attempted);
                debug!(context, attempted, delay_ms = delay.as_millis() as u64, error = %error, "retrying after backoff");
                tokio::time::sleep(delay).await;
                if cancelled() {
                    return Err(ClientError::Cancelled {
                        context: context.to_string(),
                    });
                }
                attempted += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn timeout() -> ClientError {
        ClientError::Timeout {
            context: "test".into(),
        }
    }

    #[test]
    fn test_should_retry_bounded_by_max() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        assert!(policy.should_retry(&timeout(), 0));
        assert!(policy.should_retry(&timeout(), 2));
        assert!(!policy.should_retry(&timeout(), 3));
    }

    #[test]
    fn test_permanent_error_never_retried() {
        let policy = RetryPolicy::default();
        let err = ClientError::KeyNotFound { key: "k".into() };
        assert!(!policy.should_retry(&err, 0));
    }

    #[test]
    fn test_delay_doubles_each_attempt() {
        let policy = RetryPolicy::new(5, Duration::from_millis(25));
        assert_eq!(policy.delay_before_next(0), Duration::from_millis(25));
        assert_eq!(policy.delay_before_next(1), Duration::from_millis(50));
        assert_eq!(policy.delay_before_next(2), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_below_base() {
        let policy = RetryPolicy {
            max_retries: 3,
            scale_factor: Duration::from_millis(100),
            jitter_fraction: 0.5,
        };
        for _ in 0..16 {
            let d = policy.delay_before_next(0);
            assert!(d <= Duration::from_millis(100));
            assert!(d >= Duration::from_millis(50));
        }
    }

    #[tokio::test]
    async fn test_with_retry_succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let result = with_retry(&policy, "op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(timeout())
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_returns_last_error_when_exhausted() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let result: ClientResult<()> = with_retry(&policy, "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(timeout()) }
        })
        .await;
        assert!(matches!(result, Err(ClientError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4, "initial try plus three retries");
    }

    #[tokio::test]
    async fn test_with_retry_backoff_schedule() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let start = Instant::now();
        let _: ClientResult<()> =
            with_retry(&policy, "op", || async { Err(timeout()) }).await;
        // 1x + 2x + 4x of the scale factor
        assert!(start.elapsed() >= Duration::from_millis(70));
    }

    #[tokio::test]
    async fn test_with_retry_permanent_error_fails_fast() {
        let policy = RetryPolicy::new(3, Duration::from_secs(10));
        let start = Instant::now();
        let result: ClientResult<()> = with_retry(&policy, "op", || async {
            Err(ClientError::AccessDenied {
                context: "test".into(),
            })
        })
        .await;
        assert!(matches!(result, Err(ClientError::AccessDenied { .. })));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_cancellation_short_circuits_backoff() {
        let policy = RetryPolicy::new(3, Duration::from_secs(10));
        let start = Instant::now();
        let result: ClientResult<()> =
            with_retry_cancellable(&policy, "op", || true, || async { Err(timeout()) }).await;
        assert!(matches!(result, Err(ClientError::Cancelled { .. })));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
