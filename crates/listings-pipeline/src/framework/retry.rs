//! Bounded retry with per-attempt timeout

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Delay between two attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    None,
    Fixed { delay_ms: u64 },
    Exponential { initial_ms: u64, factor: u32, max_ms: u64 },
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            initial_ms: 1_000,
            factor: 2,
            max_ms: 30_000,
        }
    }
}

impl Backoff {
    /// Delay to wait after the failed attempt number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Backoff::Exponential {
                initial_ms,
                factor,
                max_ms,
            } => {
                let exponent = attempt.saturating_sub(1);
                let multiplier = u64::from(factor.max(1)).saturating_pow(exponent);
                Duration::from_millis(initial_ms.saturating_mul(multiplier).min(max_ms))
            }
        }
    }
}

/// How many times a step is attempted and how long each attempt may take
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
            attempt_timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// Outcome of a retried operation together with the attempts it took
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T>,
    pub attempts: u32,
}

impl RetryPolicy {
    /// Single attempt, no timeout
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::None,
            attempt_timeout: None,
        }
    }

    /// Run `operation` until it succeeds, fails with a non-transient error,
    /// or the attempt budget is spent.
    ///
    /// A timed-out attempt counts as a failed transient attempt. When the
    /// budget runs out on transient failures the last error is wrapped in a
    /// [`PipelineError::Retrieval`], whatever the budget.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Attempted<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let outcome = match self.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, operation(attempt)).await {
                    Ok(result) => result,
                    Err(_) => Err(PipelineError::Timeout(limit)),
                },
                None => operation(attempt).await,
            };

            let err = match outcome {
                Ok(value) => {
                    return Attempted {
                        result: Ok(value),
                        attempts: attempt,
                    }
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                return Attempted {
                    result: Err(err),
                    attempts: attempt,
                };
            }

            if attempt >= max_attempts {
                let plural = if attempt == 1 { "" } else { "s" };
                return Attempted {
                    result: Err(PipelineError::Retrieval(format!(
                        "{label} failed after {attempt} attempt{plural}: {err}"
                    ))),
                    attempts: attempt,
                };
            }

            let delay = self.backoff.delay(attempt);
            warn!(
                step = label,
                attempt,
                max_attempts,
                error = %err,
                "Attempt {}/{} failed. Retrying in {:?}",
                attempt,
                max_attempts,
                delay
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Backoff::None,
            attempt_timeout: None,
        }
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(2));
        assert_eq!(backoff.delay(3), Duration::from_secs(4));
        assert_eq!(backoff.delay(10), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_succeeds_after_two_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let attempted = quick(3)
            .run("fetch", move |_| async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(PipelineError::Retrieval("503".into()))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(attempted.result.unwrap(), 42);
        assert_eq!(attempted.attempts, 3);
    }

    #[tokio::test]
    async fn test_exhausted_budget_is_retrieval_error() {
        let attempted: Attempted<()> = quick(3)
            .run("fetch", |_| async { Err(PipelineError::Retrieval("refused".into())) })
            .await;

        assert_eq!(attempted.attempts, 3);
        match attempted.result {
            Err(PipelineError::Retrieval(message)) => {
                assert!(message.contains("fetch failed after 3 attempts"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_single_attempt_transient_failure_is_retrieval_error() {
        let policy = RetryPolicy {
            max_attempts: 1,
            backoff: Backoff::None,
            attempt_timeout: Some(Duration::from_millis(10)),
        };

        let timed_out: Attempted<()> = policy
            .run("get_object", |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        let storage: Attempted<()> = RetryPolicy::none()
            .run("put_object", |_| async { Err(PipelineError::Storage("503".into())) })
            .await;

        for attempted in [timed_out, storage] {
            assert_eq!(attempted.attempts, 1);
            match attempted.result {
                Err(PipelineError::Retrieval(message)) => assert!(message.contains("after 1 attempt:")),
                other => panic!("unexpected result: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_non_transient_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let attempted: Attempted<()> = quick(3)
            .run("fetch", move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(PipelineError::Format("not csv".into()))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(attempted.result, Err(PipelineError::Format(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_attempt_counts_as_failure() {
        let policy = RetryPolicy {
            max_attempts: 2,
            backoff: Backoff::Fixed { delay_ms: 1_000 },
            attempt_timeout: Some(Duration::from_secs(60)),
        };

        let attempted = policy
            .run("fetch", |attempt| async move {
                if attempt == 1 {
                    tokio::time::sleep(Duration::from_secs(120)).await;
                }
                Ok(attempt)
            })
            .await;

        assert_eq!(attempted.result.unwrap(), 2);
        assert_eq!(attempted.attempts, 2);
    }

    proptest! {
        #[test]
        fn prop_exponential_delay_is_capped_and_monotonic(
            initial_ms in 0u64..10_000,
            factor in 1u32..5,
            max_ms in 0u64..120_000,
            attempt in 1u32..40,
        ) {
            let backoff = Backoff::Exponential { initial_ms, factor, max_ms };
            let delay = backoff.delay(attempt);
            prop_assert!(delay <= Duration::from_millis(max_ms));
            prop_assert!(delay <= backoff.delay(attempt + 1));
        }
    }
}
