/*!
 * # Circuit Breaker
 *
 * Guards outbound gateway calls. After `failure_threshold` consecutive
 * failures the circuit opens and calls fail fast until `timeout` elapses;
 * then a limited number of probes decide whether it closes again.
 */

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, allowing limited requests to test recovery
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Maximum number of failures before opening the circuit
    pub failure_threshold: u32,
    /// Duration to wait before transitioning from Open to HalfOpen
    pub timeout: Duration,
    /// Number of successful requests needed in HalfOpen to close the circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 1,
        }
    }
}

#[derive(Debug)]
struct CircuitBreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
}

/// Circuit breaker errors
#[derive(Error, Debug)]
pub enum CircuitBreakerError<E> {
    #[error("Circuit breaker is open")]
    CircuitOpen,
    #[error("Service call failed: {0}")]
    ServiceFailure(E),
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<CircuitBreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(CircuitBreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
            }),
        }
    }

    /// Runs `f` under protection; every error counts as a failure.
    pub async fn call<F, Fut, R, E>(&self, f: F) -> Result<R, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        self.call_classified(f, |_| true).await
    }

    /// Runs `f` under protection; only errors for which `is_failure` returns
    /// true move the breaker towards open. Other errors are passed through
    /// and treated as a healthy response from the remote side.
    pub async fn call_classified<F, Fut, R, E, C>(
        &self,
        f: F,
        is_failure: C,
    ) -> Result<R, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, E>>,
        C: FnOnce(&E) -> bool,
    {
        if !self.can_execute() {
            return Err(CircuitBreakerError::CircuitOpen);
        }

        match f().await {
            Ok(result) => {
                self.on_success();
                Ok(result)
            }
            Err(err) => {
                if is_failure(&err) {
                    self.on_failure();
                } else {
                    self.on_success();
                }
                Err(CircuitBreakerError::ServiceFailure(err))
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitBreakerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn can_execute(&self) -> bool {
        let mut state = self.lock();

        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => match state.last_failure_time {
                Some(last_failure) if last_failure.elapsed() >= self.config.timeout => {
                    state.state = CircuitState::HalfOpen;
                    state.success_count = 0;
                    info!(breaker = %self.name, "circuit half-open, probing");
                    true
                }
                _ => false,
            },
        }
    }

    fn on_success(&self) {
        let mut state = self.lock();

        match state.state {
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.last_failure_time = None;
                    info!(breaker = %self.name, "circuit closed");
                }
            }
            CircuitState::Open => {
                state.state = CircuitState::Closed;
                state.failure_count = 0;
                state.success_count = 0;
                state.last_failure_time = None;
            }
        }
    }

    fn on_failure(&self) {
        let mut state = self.lock();

        state.failure_count += 1;
        state.last_failure_time = Some(Instant::now());

        let opened = match state.state {
            CircuitState::Closed => state.failure_count >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };

        if opened {
            state.state = CircuitState::Open;
            state.success_count = 0;
            warn!(
                breaker = %self.name,
                failures = state.failure_count,
                "circuit opened"
            );
            metrics::counter!("checkout_circuit_breaker_opened_total", 1, "breaker" => self.name.clone());
        }
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }
}

/// Registry for managing one circuit breaker per named dependency
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            default_config,
        }
    }

    /// Get or create a circuit breaker for the given service
    pub fn get(&self, service_name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = match self.breakers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        breakers
            .entry(service_name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    service_name,
                    self.default_config.clone(),
                ))
            })
            .clone()
    }

    pub fn states(&self) -> HashMap<String, CircuitState> {
        let breakers = match self.breakers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        breakers
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.state()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn breaker(threshold: u32, timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                timeout,
                success_threshold: 1,
            },
        )
    }

    #[tokio::test]
    async fn stays_closed_on_success() {
        let cb = breaker(3, Duration::from_millis(100));
        let result = cb.call(|| async { Ok::<_, &str>(42) }).await;
        assert_matches!(result, Ok(42));
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn opens_after_threshold_and_fails_fast() {
        let cb = breaker(2, Duration::from_secs(60));

        let _ = cb.call(|| async { Err::<i32, _>("boom") }).await;
        assert_eq!(cb.state(), CircuitState::Closed);
        let _ = cb.call(|| async { Err::<i32, _>("boom") }).await;
        assert_eq!(cb.state(), CircuitState::Open);

        let mut invoked = false;
        let result = cb
            .call(|| {
                invoked = true;
                async { Ok::<i32, &str>(1) }
            })
            .await;
        assert_matches!(result, Err(CircuitBreakerError::CircuitOpen));
        assert!(!invoked);
    }

    #[tokio::test]
    async fn half_open_probe_closes_circuit() {
        let cb = breaker(1, Duration::from_millis(10));
        let _ = cb.call(|| async { Err::<i32, _>("boom") }).await;
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let result = cb.call(|| async { Ok::<_, &str>(7) }).await;
        assert_matches!(result, Ok(7));
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn unclassified_errors_do_not_open_circuit() {
        let cb = breaker(1, Duration::from_secs(60));
        let result = cb
            .call_classified(|| async { Err::<i32, _>("declined") }, |_| false)
            .await;
        assert_matches!(result, Err(CircuitBreakerError::ServiceFailure("declined")));
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn registry_reuses_breakers_by_name() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        let a = registry.get("asaas");
        let b = registry.get("asaas");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.states().len(), 1);
    }
}
