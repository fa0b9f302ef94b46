//! Circuit breaker: explicit CLOSED → OPEN → HALF_OPEN state machine.
//!
//! - CLOSED: calls pass through; consecutive failures are counted and the
//!   breaker trips OPEN at `failure_threshold`.
//! - OPEN: calls are rejected with [`EngineError::CircuitOpen`] until
//!   `reset_timeout` has elapsed since opening.
//! - HALF_OPEN: up to `half_open_max_probes` concurrent probes are admitted;
//!   `success_threshold` successes close the breaker, any failure reopens it.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::CircuitBreakerSettings;
use crate::errors::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub success_threshold: u32,
    pub half_open_max_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from_settings(&CircuitBreakerSettings::default())
    }
}

impl CircuitBreakerConfig {
    pub fn from_settings(settings: &CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold.max(1),
            reset_timeout: Duration::from_secs(settings.reset_timeout_secs),
            success_threshold: settings.half_open_successes.max(1),
            half_open_max_probes: settings.half_open_max_probes.max(1),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    probes_in_flight: u32,
    opened_at: Option<Instant>,
    last_transition: Option<DateTime<Utc>>,
}

impl BreakerState {
    fn transition(&mut self, to: CircuitState) {
        self.state = to;
        self.last_transition = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerMetrics {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub rejected_calls: u64,
    pub circuit_opens: u64,
    /// Wall-clock time of the most recent state change.
    pub last_transition: Option<DateTime<Utc>>,
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    total_calls: AtomicU64,
    total_failures: AtomicU64,
    rejected_calls: AtomicU64,
    circuit_opens: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                probes_in_flight: 0,
                opened_at: None,
                last_transition: None,
            }),
            total_calls: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
            circuit_opens: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, applying the OPEN → HALF_OPEN timeout transition.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        self.refresh(&mut inner);
        inner.state
    }

    /// Run `op` through the breaker.
    pub async fn execute<T, F, Fut>(&self, op: F) -> EngineResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        let probe = self.try_acquire()?;
        let mut guard = ProbeGuard {
            breaker: self,
            probe,
            settled: false,
        };

        let result = op().await;
        guard.settled = true;
        match &result {
            Ok(_) => self.on_success(probe),
            Err(_) => self.on_failure(probe),
        }
        result
    }

    /// Admit or reject a call. Returns whether the call is a half-open probe.
    fn try_acquire(&self) -> EngineResult<bool> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        self.refresh(&mut inner);

        match inner.state {
            CircuitState::Closed => Ok(false),
            CircuitState::HalfOpen if inner.probes_in_flight < self.config.half_open_max_probes => {
                inner.probes_in_flight += 1;
                Ok(true)
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                self.rejected_calls.fetch_add(1, Ordering::Relaxed);
                Err(EngineError::CircuitOpen {
                    name: self.name.clone(),
                })
            }
        }
    }

    fn refresh(&self, inner: &mut BreakerState) {
        if inner.state != CircuitState::Open {
            return;
        }
        let elapsed = inner
            .opened_at
            .map(|t| t.elapsed() >= self.config.reset_timeout)
            .unwrap_or(true);
        if elapsed {
            inner.transition(CircuitState::HalfOpen);
            inner.half_open_successes = 0;
            inner.probes_in_flight = 0;
            info!(breaker = %self.name, "circuit breaker half-open");
        }
    }

    fn on_success(&self, probe: bool) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if probe {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }

        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    inner.transition(CircuitState::Closed);
                    inner.consecutive_failures = 0;
                    inner.opened_at = None;
                    info!(breaker = %self.name, "circuit breaker closed");
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, probe: bool) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if probe {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }
        inner.consecutive_failures += 1;

        let trip = match inner.state {
            CircuitState::Closed => inner.consecutive_failures >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };

        if trip {
            inner.transition(CircuitState::Open);
            inner.opened_at = Some(Instant::now());
            inner.half_open_successes = 0;
            self.circuit_opens.fetch_add(1, Ordering::Relaxed);
            warn!(
                breaker = %self.name,
                failures = inner.consecutive_failures,
                cooldown_secs = self.config.reset_timeout.as_secs(),
                "circuit breaker opened"
            );
        }
    }

    fn release_probe(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let (state, consecutive_failures, last_transition) = {
            let mut inner = self.inner.lock().expect("breaker lock poisoned");
            self.refresh(&mut inner);
            (inner.state, inner.consecutive_failures, inner.last_transition)
        };
        CircuitBreakerMetrics {
            name: self.name.clone(),
            state,
            consecutive_failures,
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
            circuit_opens: self.circuit_opens.load(Ordering::Relaxed),
            last_transition,
        }
    }
}

/// Frees a half-open probe slot if the call future is dropped mid-flight.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            self.breaker.release_probe();
        }
    }
}
