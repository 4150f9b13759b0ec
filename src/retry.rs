//! Bounded retry with exponential backoff for external calls.
//!
//! [`with_retry`] drives a single operation; [`Retrying`] wraps a whole capability (embedding
//! client, vector index) so every call made through it inherits the same policy. Each attempt
//! runs under its own timeout so a hung provider cannot hold a worker past its lease.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

use crate::metrics::ServiceMetrics;

/// Backoff and timeout parameters for external calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Growth factor applied after each retry.
    pub multiplier: f64,
    /// Timeout applied to each individual attempt.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Set the total number of attempts (clamped to at least one).
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the delay before the first retry.
    #[must_use]
    pub fn with_initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff = delay;
        self
    }

    /// Set the maximum delay between attempts.
    #[must_use]
    pub fn with_max_backoff(mut self, delay: Duration) -> Self {
        self.max_backoff = delay;
        self
    }

    /// Set the per-attempt timeout.
    #[must_use]
    pub fn with_call_timeout(mut self, limit: Duration) -> Self {
        self.call_timeout = limit;
        self
    }

    fn next_delay(&self, current: Duration) -> Duration {
        Duration::from_secs_f64(current.as_secs_f64() * self.multiplier).min(self.max_backoff)
    }
}

/// Classifies errors for the retry loop.
pub trait Retryable: Sized {
    /// Whether another attempt may succeed.
    fn is_transient(&self) -> bool;

    /// Error produced when an attempt exceeds the per-call timeout.
    fn timed_out(after: Duration) -> Self;
}

/// Result of a retried operation along with the number of attempts it took.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// Final result of the operation.
    pub result: Result<T, E>,
    /// Attempts made, including the first.
    pub attempts: u32,
}

/// Execute an async operation, retrying transient failures with exponential backoff.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> RetryOutcome<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempts = 0;
    let mut delay = policy.initial_backoff;

    loop {
        attempts += 1;
        let result = match timeout(policy.call_timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(E::timed_out(policy.call_timeout)),
        };

        match result {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                };
            }
            Err(error) if attempts >= policy.max_attempts || !error.is_transient() => {
                return RetryOutcome {
                    result: Err(error),
                    attempts,
                };
            }
            Err(error) => {
                let pause = delay + jitter(delay / 4);
                tracing::warn!(
                    operation = operation_name,
                    attempt = attempts,
                    max_attempts = policy.max_attempts,
                    delay_ms = pause.as_millis() as u64,
                    error = %error,
                    "Transient failure; retrying"
                );
                sleep(pause).await;
                delay = policy.next_delay(delay);
            }
        }
    }
}

fn jitter(max: Duration) -> Duration {
    let max_nanos = max.as_nanos() as u64;
    if max_nanos == 0 {
        return Duration::ZERO;
    }
    let seed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.subsec_nanos() as u64)
        .unwrap_or(0);
    Duration::from_nanos(seed % max_nanos)
}

/// Decorator applying a [`RetryPolicy`] to every call of the wrapped capability.
pub struct Retrying<T> {
    pub(crate) inner: T,
    pub(crate) policy: RetryPolicy,
    metrics: Option<Arc<ServiceMetrics>>,
}

impl<T> Retrying<T> {
    /// Wrap `inner` with the given policy.
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            metrics: None,
        }
    }

    /// Count retried attempts in the shared service metrics.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<ServiceMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run one operation under the policy, recording retries.
    pub(crate) async fn call<R, E, F, Fut>(&self, operation_name: &str, operation: F) -> Result<R, E>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let outcome = with_retry(&self.policy, operation_name, operation).await;
        if let Some(metrics) = &self.metrics {
            for _ in 1..outcome.attempts {
                metrics.record_provider_retry();
            }
        }
        outcome.result
    }
}
