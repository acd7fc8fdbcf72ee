//! Global gate for outbound adapter calls

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::shared::errors::{AdapterError, EngineError};
use crate::shared::retry::{retry_with_backoff, BackoffPolicy};

/// Bounds in-flight network calls, applies a timeout to each call and retries
/// transient failures. Cloning shares the same permit pool.
#[derive(Clone)]
pub struct NetworkGate {
    permits: Arc<Semaphore>,
    timeout: Duration,
    backoff: BackoffPolicy,
}

impl NetworkGate {
    pub fn new(max_in_flight: usize, timeout: Duration, backoff: BackoffPolicy) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            timeout,
            backoff,
        }
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// One call under a permit and the timeout, no retry
    pub async fn call_once<F, T>(&self, fut: F) -> Result<T, AdapterError>
    where
        F: Future<Output = Result<T, AdapterError>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| AdapterError::Transport("network gate closed".to_string()))?;

        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    /// Call with retry/backoff; the closure is invoked once per attempt
    pub async fn call<F, Fut, T>(&self, mut op: F) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AdapterError>>,
    {
        retry_with_backoff(&self.backoff, |_| {
            let fut = op();
            async move { self.call_once(fut).await.map_err(EngineError::from) }
        })
        .await
    }
}

impl Default for NetworkGate {
    fn default() -> Self {
        Self::new(16, Duration::from_secs(2), BackoffPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_timeout_is_reported_as_transient() {
        let gate = NetworkGate::new(1, Duration::from_millis(5), BackoffPolicy::no_retry());
        let result: Result<(), _> = gate
            .call(|| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(EngineError::NetworkTransient(_))));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let gate = NetworkGate::new(2, Duration::from_secs(1), BackoffPolicy::no_retry());
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = gate.clone();
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                gate.call_once(async {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, AdapterError>(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
