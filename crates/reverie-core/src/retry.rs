//! Backoff retry for transport failures on chat and TTS calls. Remote errors and timeouts
//! are not retried.
//!
//! Media jobs never go through here: a retried job would be charged twice and produce a
//! different output.

use std::future::Future;
use std::time::Duration;

use crate::error::ReverieResult;

/// Retry policy: `max_retries` extra attempts, delay doubling from `base_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based): base, 2*base, 4*base, ...
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, fails with a non-transient error, or retries run out.
/// `operation` receives the 1-based attempt number.
pub async fn retry_with_backoff<T, Op, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: Op,
) -> ReverieResult<T>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = ReverieResult<T>>,
{
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt <= policy.max_retries && err.is_retryable_transport() => {
                let delay = policy.backoff_delay(attempt);
                tracing::warn!(
                    target: "reverie::retry",
                    call = label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient failure, retrying"
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
    use super::*;
    use crate::error::ReverieError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn backoff_doubles_from_one_second() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(40), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transport_errors_until_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = attempts.clone();
        let result = retry_with_backoff(&RetryPolicy::default(), "test", move |_| {
            let seen = seen.clone();
            async move {
                if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ReverieError::Transport("connection reset".into()))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_three_retries() {
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = attempts.clone();
        let result: ReverieResult<()> =
            retry_with_backoff(&RetryPolicy::default(), "test", move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                async { Err(ReverieError::Transport("down".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn remote_client_errors_are_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = attempts.clone();
        let result: ReverieResult<()> =
            retry_with_backoff(&RetryPolicy::default(), "test", move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ReverieError::Remote {
                        status: 401,
                        body: "bad key".into(),
                    })
                }
            })
            .await;
        assert!(matches!(result, Err(ReverieError::Remote { status: 401, .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
