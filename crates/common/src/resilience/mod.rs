//! Resilience primitives for external calls
//!
//! Provides:
//! - Bounded exponential-backoff retry for retryable errors
//! - A run deadline that abandons in-flight work on expiry
//! - A call gate bounding concurrency and request rate

use crate::config::{ResilienceConfig, RunConfig};
use crate::errors::{AppError, Result};
use crate::metrics;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::warn;

/// Retry settings for one external call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl From<&ResilienceConfig> for RetryPolicy {
    fn from(config: &ResilienceConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.multiplier,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ResilienceConfig::default())
    }
}

impl RetryPolicy {
    fn backoff(&self) -> impl Backoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_max_interval(self.max_backoff)
            .with_multiplier(self.multiplier)
            .with_randomization_factor(0.1)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out
///
/// Only errors with `is_retryable()` are retried.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts;
    let mut attempt = 0u32;

    backoff::future::retry_notify(
        policy.backoff(),
        || {
            attempt += 1;
            let current = attempt;
            let fut = op();
            async move {
                match fut.await {
                    Ok(value) => Ok(value),
                    Err(e) if e.is_retryable() && current < max_attempts => {
                        Err(backoff::Error::transient(e))
                    }
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            }
        },
        |e: AppError, wait: Duration| {
            warn!(
                call = label,
                max_attempts = max_attempts,
                wait_ms = wait.as_millis() as u64,
                error = %e,
                "External call failed, retrying"
            );
            metrics::record_retry(label);
        },
    )
    .await
}

/// Cancellation and timeout token threaded through every stage
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// Expires `timeout` from now
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Some(Instant::now() + timeout),
        }
    }

    /// Never expires
    pub fn none() -> Self {
        Self { at: None }
    }

    pub fn is_expired(&self) -> bool {
        self.at.map_or(false, |at| Instant::now() >= at)
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Race `fut` against the deadline; the future is dropped on expiry
    pub async fn run<T>(&self, stage: &str, fut: impl Future<Output = T>) -> Result<T> {
        match self.at {
            None => Ok(fut.await),
            Some(at) => tokio::time::timeout_at(at, fut)
                .await
                .map_err(|_| AppError::Timeout {
                    stage: stage.to_string(),
                }),
        }
    }
}

/// Bounds concurrent external calls and paces them
#[derive(Debug)]
pub struct CallGate {
    permits: Arc<Semaphore>,
    limiter: Arc<DefaultDirectRateLimiter>,
}

impl CallGate {
    pub fn new(max_concurrency: usize, requests_per_second: u32, burst: u32) -> Result<Self> {
        let rate = NonZeroU32::new(requests_per_second)
            .ok_or_else(|| AppError::configuration("run.requests_per_second", "must be >= 1"))?;
        let burst = NonZeroU32::new(burst)
            .ok_or_else(|| AppError::configuration("run.burst", "must be >= 1"))?;
        let quota = Quota::per_second(rate).allow_burst(burst);

        Ok(Self {
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    pub fn from_config(config: &RunConfig) -> Result<Self> {
        Self::new(config.max_concurrency, config.requests_per_second, config.burst)
    }

    /// Wait for a permit and a rate token, then run `fut`
    pub async fn run<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let _permit = self.permits.acquire().await.map_err(|e| AppError::Internal {
            message: format!("call gate closed: {}", e),
        })?;
        self.limiter.until_ready().await;
        fut.await
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

/// Gate plus retry policy: every external call goes through here
pub struct Resilience {
    pub gate: CallGate,
    pub policy: RetryPolicy,
}

impl Resilience {
    pub fn new(gate: CallGate, policy: RetryPolicy) -> Self {
        Self { gate, policy }
    }

    /// Retry `op`, passing each attempt through the gate
    pub async fn call<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = std::time::Instant::now();
        let result = retry(&self.policy, label, || self.gate.run(op())).await;
        metrics::record_external_call(label, result.is_ok(), started.elapsed().as_secs_f64());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_test::{assert_err, assert_ok, assert_pending, assert_ready, task};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_retry_stops_at_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry(&fast_policy(3), "llm", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::external("llm", "503")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = retry(&fast_policy(3), "embedding", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(AppError::EmbeddingUnavailable { message: "blip".into() })
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
    async fn test_non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry(&fast_policy(3), "llm", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::input("bad")) }
        })
        .await;
        assert!(matches!(result, Err(AppError::Input { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deadline_abandons_slow_future() {
        let deadline = Deadline::after(Duration::from_millis(10));
        let result = deadline
            .run("synthesis", tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert!(matches!(result, Err(AppError::Timeout { .. })));
        assert!(deadline.is_expired());
    }

    #[tokio::test]
    async fn test_unbounded_deadline_passes_through() {
        let deadline = Deadline::none();
        assert_eq!(deadline.run("chunking", async { 7 }).await.unwrap(), 7);
        assert!(deadline.remaining().is_none());
    }

    #[tokio::test]
    async fn test_gate_releases_permits() {
        let gate = CallGate::new(2, 1000, 1000).unwrap();
        let value = gate.run(async { Ok::<_, AppError>(1) }).await.unwrap();
        assert_eq!(value, 1);
        assert_eq!(gate.available_permits(), 2);
    }

    #[test]
    fn test_gate_holds_callers_beyond_concurrency() {
        let gate = CallGate::new(1, 1000, 1000).unwrap();
        let (release, held) = tokio::sync::oneshot::channel::<()>();

        let mut first = task::spawn(gate.run(async move {
            held.await.map_err(|e| AppError::Internal { message: e.to_string() })?;
            Ok::<_, AppError>(1)
        }));
        assert_pending!(first.poll());
        assert_eq!(gate.available_permits(), 0);

        let mut second = task::spawn(gate.run(async { Ok::<_, AppError>(2) }));
        assert_pending!(second.poll());

        release.send(()).unwrap();
        assert_eq!(assert_ok!(assert_ready!(first.poll())), 1);
        assert!(second.is_woken());
        assert_eq!(assert_ok!(assert_ready!(second.poll())), 2);
        assert_eq!(gate.available_permits(), 1);
    }

    #[test]
    fn test_gate_rejects_zero_rate() {
        assert_err!(CallGate::new(1, 0, 1));
        assert_err!(CallGate::new(1, 1, 0));
        assert_ok!(CallGate::new(0, 1, 1));
    }
}
