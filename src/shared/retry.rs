//! Backoff policies for retrying transient adapter failures

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use crate::shared::errors::EngineError;

/// Exponential backoff parameterized by attempt count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Fraction of the delay randomised in either direction (0.0 disables jitter)
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 2_000,
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    /// Deterministic part only; jitter is applied by [`BackoffPolicy::jittered`].
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let raw = self.initial_delay_ms as f64 * self.multiplier.max(1.0).powi(exp);
        Duration::from_millis(raw.min(self.max_delay_ms as f64) as u64)
    }

    fn jittered(&self, base: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return base;
        }
        let spread = self.jitter.min(1.0);
        let factor = rand::thread_rng().gen_range((1.0 - spread)..=(1.0 + spread));
        Duration::from_millis((base.as_millis() as f64 * factor) as u64)
    }

    /// Whether another attempt should follow a failure on `attempt`
    pub fn should_retry(&self, attempt: u32, error: &EngineError) -> bool {
        error.is_transient() && attempt < self.max_attempts
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the policy gives up
pub async fn retry_with_backoff<F, Fut, T>(policy: &BackoffPolicy, mut op: F) -> Result<T, EngineError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if policy.should_retry(attempt, &e) => {
                let delay = policy.jittered(policy.delay_for(attempt));
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying after transient failure");
                sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = BackoffPolicy {
            max_attempts: 10,
            initial_delay_ms: 100,
            max_delay_ms: 500,
            multiplier: 2.0,
            jitter: 0.0,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&fast_policy(4), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(EngineError::NetworkTransient("reset".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, _> = retry_with_backoff(&fast_policy(5), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EngineError::Infeasible("no liquidity".into())) }
        })
        .await;

        assert!(matches!(result, Err(EngineError::Infeasible(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, _> = retry_with_backoff(&fast_policy(3), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(EngineError::NetworkTransient("timeout".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
