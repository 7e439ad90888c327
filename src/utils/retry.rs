//! Bounded retry/timeout wrapper shared by every external call.
//!
//! All on-chain reads and off-chain metadata fetches go through
//! [`retry_call`]: each attempt is individually time-bounded, any failure
//! (including timeout) is retried with exponential backoff, and the final
//! error only surfaces after every attempt is exhausted.

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};

/// Retry and timeout bounds for a single logical call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts before the failure surfaces.
    pub attempts: u32,
    /// Hard timeout applied to each individual attempt.
    pub timeout: Duration,
    /// Base delay between attempts (exponential backoff).
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            timeout: Duration::from_secs(30),
            base_delay: Duration::from_millis(100),
        }
    }
}

/// Run `op` under the given policy, returning the first success.
///
/// A timed-out attempt is an ordinary retryable failure, never an abort of
/// the surrounding batch.
pub async fn retry_call<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..policy.attempts {
        match tokio::time::timeout(policy.timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => last_error = Some(e),
            Err(_) => {
                last_error = Some(anyhow!("call timed out after {:?}", policy.timeout));
            },
        }

        if attempt + 1 < policy.attempts {
            let delay = policy.base_delay * 2_u32.pow(attempt);
            tokio::time::sleep(delay).await;
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow!("call failed with zero attempts configured")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            timeout: Duration::from_millis(50),
            base_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_always_failing_call_is_attempted_exactly_n_times() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_call(fast_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow!("boom")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_success_on_second_attempt_skips_the_third() {
        let calls = AtomicU32::new(0);
        let result = retry_call(fast_policy(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(anyhow!("transient"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_is_a_retryable_failure() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_call(fast_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                // Never resolves within the attempt timeout.
                std::future::pending::<()>().await;
                Ok(())
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(result.unwrap_err().to_string().contains("timed out"));
    }
}
