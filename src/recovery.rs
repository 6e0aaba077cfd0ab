//! Error Recovery
//!
//! Retry with exponential backoff plus a failure-counting circuit breaker:
//! - Attempts are spaced `base * 2^(attempt-1)`
//! - The breaker opens after `failure_threshold` failures and closes again
//!   once `timeout` passes with no new failure
//! - Successes decrement the failure count

use crate::error::{ChatError, ErrorCode};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Circuit state as reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    Closed,
    Open,
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures before opening circuit
    pub failure_threshold: u32,
    /// Quiet period after the last failure before the count resets
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Default)]
struct BreakerInner {
    failure_count: u32,
    last_failure: Option<Instant>,
}

/// Failure-count circuit breaker
pub struct CircuitBreaker {
    name: String,
    inner: Mutex<BreakerInner>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(name: &str) -> Self {
        Self::with_config(name, CircuitBreakerConfig::default())
    }

    pub fn with_config(name: &str, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.to_string(),
            inner: Mutex::new(BreakerInner::default()),
            config,
        }
    }

    /// Get current state, resetting the count if the timeout has elapsed
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();

        if let Some(last) = inner.last_failure {
            if last.elapsed() >= self.config.timeout && inner.failure_count > 0 {
                let was_open = inner.failure_count >= self.config.failure_threshold;
                inner.failure_count = 0;
                inner.last_failure = None;
                if was_open {
                    info!("Circuit breaker '{}' closed after timeout", self.name);
                }
            }
        }

        if inner.failure_count >= self.config.failure_threshold {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_sub(1);
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        if inner.failure_count == self.config.failure_threshold {
            warn!(
                "Circuit breaker '{}' opened after {} failures",
                self.name, inner.failure_count
            );
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Reset the circuit breaker
    pub fn reset(&self) {
        *self.inner.lock() = BreakerInner::default();
        info!("Circuit breaker '{}' reset", self.name);
    }
}

/// Why a recovered operation gave up
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("Circuit breaker open")]
    CircuitOpen,

    #[error("Failed after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: ChatError,
    },
}

impl RecoveryError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::CircuitOpen => ErrorCode::AiProvider,
            Self::Exhausted { source, .. } => source.code(),
        }
    }
}

/// Metrics for recovery operations
#[derive(Default)]
struct RecoveryMetrics {
    total_operations: AtomicU64,
    successful: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    short_circuited: AtomicU64,
}

/// Retry loop plus circuit breaker shared across operations
pub struct ErrorRecovery {
    policy: RetryPolicy,
    breaker: CircuitBreaker,
    /// Failed attempts of operations still in flight
    attempts: Mutex<HashMap<String, u32>>,
    metrics: RecoveryMetrics,
}

impl ErrorRecovery {
    pub fn new(policy: RetryPolicy, breaker: CircuitBreaker) -> Self {
        Self {
            policy,
            breaker,
            attempts: Mutex::new(HashMap::new()),
            metrics: RecoveryMetrics::default(),
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(
            RetryPolicy {
                max_attempts: config.retry_max_attempts.max(1),
                base_delay: config.retry_base_delay,
            },
            CircuitBreaker::with_config(
                "gemini",
                CircuitBreakerConfig {
                    failure_threshold: config.circuit_failure_threshold.max(1),
                    timeout: config.circuit_timeout,
                },
            ),
        )
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Failed attempts recorded for an operation that has not finished
    pub fn attempt_count(&self, operation_id: &str) -> u32 {
        self.attempts.lock().get(operation_id).copied().unwrap_or(0)
    }

    /// Execute with recovery
    pub async fn execute<F, Fut, T>(&self, operation_id: &str, mut operation: F) -> Result<T, RecoveryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ChatError>>,
    {
        self.metrics.total_operations.fetch_add(1, Ordering::Relaxed);

        if self.breaker.is_open() {
            self.metrics.short_circuited.fetch_add(1, Ordering::Relaxed);
            debug!("Short-circuiting '{}': circuit open", operation_id);
            return Err(RecoveryError::CircuitOpen);
        }

        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(result) => {
                    self.breaker.record_success();
                    self.attempts.lock().remove(operation_id);
                    self.metrics.successful.fetch_add(1, Ordering::Relaxed);
                    return Ok(result);
                }
                Err(e) => {
                    self.breaker.record_failure();
                    self.attempts.lock().insert(operation_id.to_string(), attempt);

                    if !e.code().is_retryable() || attempt >= self.policy.max_attempts {
                        self.attempts.lock().remove(operation_id);
                        self.metrics.failed.fetch_add(1, Ordering::Relaxed);
                        warn!("'{}' failed after {} attempt(s): {}", operation_id, attempt, e);
                        return Err(RecoveryError::Exhausted {
                            attempts: attempt,
                            source: e,
                        });
                    }

                    let delay = self.policy.delay_for_attempt(attempt);
                    debug!(
                        "Retry {} for '{}' after {:?} (error: {})",
                        attempt, operation_id, delay, e
                    );

                    self.metrics.retried.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Get recovery stats
    pub fn stats(&self) -> RecoveryStats {
        RecoveryStats {
            total_operations: self.metrics.total_operations.load(Ordering::Relaxed),
            successful: self.metrics.successful.load(Ordering::Relaxed),
            retried: self.metrics.retried.load(Ordering::Relaxed),
            failed: self.metrics.failed.load(Ordering::Relaxed),
            short_circuited: self.metrics.short_circuited.load(Ordering::Relaxed),
            circuit: self.breaker.state(),
            failure_count: self.breaker.failure_count(),
        }
    }
}

/// Statistics for recovery operations
#[derive(Debug, Clone, serde::Serialize)]
pub struct RecoveryStats {
    pub total_operations: u64,
    pub successful: u64,
    pub retried: u64,
    pub failed: u64,
    pub short_circuited: u64,
    pub circuit: CircuitState,
    pub failure_count: u32,
}

impl RecoveryStats {
    /// Calculate success rate
    pub fn success_rate(&self) -> f64 {
        if self.total_operations == 0 {
            1.0
        } else {
            self.successful as f64 / self.total_operations as f64
        }
    }

    /// Format for display
    pub fn format(&self) -> String {
        format!(
            "{:.1}% success ({}/{} operations, {} retries, {} failed, {} short-circuited)",
            self.success_rate() * 100.0,
            self.successful,
            self.total_operations,
            self.retried,
            self.failed,
            self.short_circuited
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    fn fast_recovery(threshold: u32, timeout: Duration) -> ErrorRecovery {
        ErrorRecovery::new(
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
            },
            CircuitBreaker::with_config(
                "test",
                CircuitBreakerConfig {
                    failure_threshold: threshold,
                    timeout,
                },
            ),
        )
    }

    #[test]
    fn test_retry_policy_delay() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn test_circuit_breaker_opens_at_threshold() {
        let cb = CircuitBreaker::new("test");

        for _ in 0..4 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.is_open());
    }

    #[test]
    fn test_circuit_breaker_closes_after_timeout() {
        let cb = CircuitBreaker::with_config(
            "test",
            CircuitBreakerConfig {
                failure_threshold: 5,
                timeout: Duration::from_millis(30),
            },
        );

        for _ in 0..5 {
            cb.record_failure();
        }
        assert!(cb.is_open());

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_success_decrements_failures() {
        let cb = CircuitBreaker::new("test");
        for _ in 0..5 {
            cb.record_failure();
        }
        assert!(cb.is_open());

        cb.record_success();
        assert_eq!(cb.failure_count(), 4);
        assert!(!cb.is_open());

        cb.reset();
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_recovery_success() {
        let recovery = fast_recovery(5, Duration::from_secs(60));

        let result = recovery.execute("op", || async { Ok::<_, ChatError>(42) }).await;
        assert_eq!(assert_ok!(result), 42);

        let stats = recovery.stats();
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn test_recovery_succeeds_on_third_attempt() {
        let recovery = fast_recovery(5, Duration::from_secs(60));
        let calls = Arc::new(AtomicU32::new(0));
        let seen_attempts = Arc::new(Mutex::new(Vec::new()));

        let result = recovery
            .execute("flaky", || {
                let calls = calls.clone();
                let seen = seen_attempts.clone();
                let recovery = &recovery;
                async move {
                    seen.lock().push(recovery.attempt_count("flaky"));
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(ChatError::Network("connection reset".into()))
                    } else {
                        Ok("answer")
                    }
                }
            })
            .await;

        assert_eq!(assert_ok!(result), "answer");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Counter grew while retrying, then was cleared
        assert_eq!(*seen_attempts.lock(), vec![0, 1, 2]);
        assert_eq!(recovery.attempt_count("flaky"), 0);
        assert_eq!(recovery.stats().retried, 2);
    }

    #[tokio::test]
    async fn test_recovery_exhausts_retries() {
        let recovery = fast_recovery(10, Duration::from_secs(60));
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = recovery
            .execute("down", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ChatError::Provider("503 unavailable".into()))
                }
            })
            .await;

        match assert_err!(result) {
            RecoveryError::Exhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert_eq!(source.code(), ErrorCode::AiProvider);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(recovery.attempt_count("down"), 0);
        assert_eq!(recovery.breaker().failure_count(), 3);
    }

    #[tokio::test]
    async fn test_auth_errors_not_retried() {
        let recovery = fast_recovery(10, Duration::from_secs(60));
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = recovery
            .execute("auth", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(ChatError::Auth("API key not valid".into()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_circuit_short_circuits() {
        let recovery = fast_recovery(2, Duration::from_secs(60));
        let _ = recovery
            .execute("a", || async { Err::<(), _>(ChatError::Timeout("slow".into())) })
            .await;
        assert!(recovery.breaker().is_open());

        let calls = Arc::new(AtomicU32::new(0));
        let result = recovery
            .execute("b", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ChatError>(())
                }
            })
            .await;

        assert!(matches!(result, Err(RecoveryError::CircuitOpen)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(recovery.stats().short_circuited, 1);
    }

    #[test]
    fn test_recovery_stats_format() {
        let stats = RecoveryStats {
            total_operations: 100,
            successful: 95,
            retried: 10,
            failed: 5,
            short_circuited: 0,
            circuit: CircuitState::Closed,
            failure_count: 0,
        };

        let formatted = stats.format();
        assert!(formatted.contains("95.0%"));
        assert!(formatted.contains("95/100"));
    }
}
