//! Resilience primitives wrapping every external call: circuit breaker,
//! bounded retry with jittered exponential backoff, and a per-call timeout.
//!
//! The wrapper guarantees that breaker accounting happens on every exit path
//! and that suspension only occurs at the boundary of the wrapped operation.
//! Cancellation is cooperative: a propagated deadline is checked before each
//! attempt and bounds the per-call timeout; once it elapses the in-flight
//! call is abandoned and no further retries run.

use crate::error::{Error, Result};
use rand::Rng;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_probes: u32,
}

/// Circuit breaker shared across all tasks of the process for one adapter.
///
/// Transitions: CLOSED —failures ≥ threshold→ OPEN; OPEN —elapsed ≥
/// recovery_after→ HALF_OPEN; HALF_OPEN —probe succeeds→ CLOSED; HALF_OPEN
/// —probe fails→ OPEN. While OPEN, calls fail immediately without invoking
/// the underlying operation.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_after: Duration,
    half_open_probe_count: u32,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_settings(name, 5, Duration::from_secs(60), 1)
    }

    pub fn with_settings(
        name: impl Into<String>,
        failure_threshold: u32,
        recovery_after: Duration,
        half_open_probe_count: u32,
    ) -> Self {
        Self {
            name: name.into(),
            failure_threshold,
            recovery_after,
            half_open_probe_count: half_open_probe_count.max(1),
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                half_open_probes: 0,
            }),
        }
    }

    /// Admit or reject a call. Rejection means the breaker is open (or the
    /// half-open probe budget is spent).
    fn try_acquire(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.recovery_after {
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_probes = 1;
                    debug!(breaker = %self.name, "circuit breaker half-open, probing");
                    Ok(())
                } else {
                    Err(Error::CircuitOpen {
                        name: self.name.clone(),
                    })
                }
            }
            BreakerState::HalfOpen => {
                if inner.half_open_probes < self.half_open_probe_count {
                    inner.half_open_probes += 1;
                    Ok(())
                } else {
                    Err(Error::CircuitOpen {
                        name: self.name.clone(),
                    })
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == BreakerState::HalfOpen {
            debug!(breaker = %self.name, "circuit breaker recovered");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.half_open_probes = 0;
    }

    fn on_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.half_open_probes = 0;
                warn!(breaker = %self.name, "half-open probe failed, reopening");
            }
            _ => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "circuit breaker opened"
                    );
                }
            }
        }
    }

    /// Current state, for status surfaces.
    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }

    #[cfg(test)]
    fn force_open_elapsed(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.opened_at = Some(Instant::now() - self.recovery_after);
    }
}

/// Bounded retry with jittered exponential backoff.
///
/// Delay before attempt `n` (1-indexed):
/// `min(initial * base^(n-1), max_delay) * (1 + U[-jitter, +jitter])`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: f64,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: 2.0,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_ratio: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before retrying attempt `attempt` (1-indexed).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let exp = self.initial_delay.as_secs_f64() * self.base.powi(attempt.saturating_sub(1) as i32);
        let capped = exp.min(self.max_delay.as_secs_f64());
        let jitter = if self.jitter_ratio > 0.0 {
            rand::thread_rng().gen_range(-self.jitter_ratio..=self.jitter_ratio)
        } else {
            0.0
        };
        Duration::from_secs_f64((capped * (1.0 + jitter)).max(0.0))
    }
}

/// Wrapper counters exposed for status surfaces and metrics.
#[derive(Debug, Default)]
pub struct CallStats {
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
    retries: AtomicU64,
    timeouts: AtomicU64,
    total_latency_ms: AtomicU64,
}

/// Point-in-time snapshot of a [`ResilienceContext`].
#[derive(Debug, Clone, Serialize)]
pub struct ResilienceStatus {
    pub name: String,
    pub breaker_state: BreakerState,
    pub successes: u64,
    pub failures: u64,
    pub rejections: u64,
    pub retries: u64,
    pub timeouts: u64,
    pub avg_latency_ms: f64,
}

/// Combined breaker + retry + timeout guard for one named upstream.
#[derive(Debug)]
pub struct ResilienceContext {
    name: String,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    timeout: Duration,
    stats: CallStats,
}

impl ResilienceContext {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            breaker: CircuitBreaker::new(name.clone()),
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(30),
            stats: CallStats::default(),
            name,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute `op` under the breaker, retry and timeout guards.
    ///
    /// Only retryable errors consume retry budget; validation and
    /// state-machine errors surface immediately. The retry loop also stops
    /// once total elapsed time exceeds `max_attempts * timeout`, and the
    /// optional `deadline` bounds every individual attempt.
    pub async fn execute<T, F, Fut>(&self, deadline: Option<Instant>, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let overall_budget = self.timeout * self.retry.max_attempts;
        let started = Instant::now();

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            let attempt_timeout = match deadline {
                Some(d) => {
                    let remaining = d.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                        return Err(Error::Timeout(self.timeout));
                    }
                    remaining.min(self.timeout)
                }
                None => self.timeout,
            };

            if let Err(e) = self.breaker.try_acquire() {
                self.stats.rejections.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("strands_resilience_rejections_total", "upstream" => self.name.clone())
                    .increment(1);
                return Err(e);
            }

            let call_started = Instant::now();
            let outcome = tokio::time::timeout(attempt_timeout, op()).await;
            let latency = call_started.elapsed();
            self.stats
                .total_latency_ms
                .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);

            let err = match outcome {
                Ok(Ok(value)) => {
                    self.breaker.on_success();
                    self.stats.successes.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                }
                Ok(Err(e)) if e.is_retryable() => {
                    self.breaker.on_failure();
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    e
                }
                Ok(Err(e)) => {
                    // Non-transient errors do not trip the breaker and are
                    // never retried.
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    return Err(e);
                }
                Err(_elapsed) => {
                    self.breaker.on_failure();
                    self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                    Error::Timeout(attempt_timeout)
                }
            };

            let budget_left = started.elapsed() < overall_budget;
            let deadline_left = deadline.map(|d| Instant::now() < d).unwrap_or(true);
            if attempt >= self.retry.max_attempts || !budget_left || !deadline_left {
                warn!(
                    upstream = %self.name,
                    attempts = attempt,
                    error = %err,
                    "retry budget exhausted"
                );
                return Err(err);
            }

            let delay = self.retry.delay_before(attempt);
            debug!(
                upstream = %self.name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying after backoff"
            );
            self.stats.retries.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("strands_resilience_retries_total", "upstream" => self.name.clone())
                .increment(1);
            tokio::time::sleep(delay).await;
        }
    }

    /// Snapshot of counters and breaker state.
    pub fn status(&self) -> ResilienceStatus {
        let successes = self.stats.successes.load(Ordering::Relaxed);
        let failures = self.stats.failures.load(Ordering::Relaxed);
        let timeouts = self.stats.timeouts.load(Ordering::Relaxed);
        let total = successes + failures + timeouts;
        let avg_latency_ms = if total > 0 {
            self.stats.total_latency_ms.load(Ordering::Relaxed) as f64 / total as f64
        } else {
            0.0
        };
        ResilienceStatus {
            name: self.name.clone(),
            breaker_state: self.breaker.state(),
            successes,
            failures,
            rejections: self.stats.rejections.load(Ordering::Relaxed),
            retries: self.stats.retries.load(Ordering::Relaxed),
            timeouts,
            avg_latency_ms,
        }
    }
}
