//! # Resilience
//!
//! A `CircuitBreakerBehavior`-shaped trait wrapping calls into an external
//! collaborator (chiefly the backend adapter's `submit_tasks` /
//! `acquire_complete`), grounded on the teacher's own
//! `resilience::behavior::CircuitBreakerBehavior` module: a misbehaving
//! backend trips the breaker instead of being hammered by the nanny's
//! refill loop every `update()` call.

pub mod behavior;
pub mod metrics;

pub use behavior::CircuitBreakerBehavior;
pub use metrics::{CircuitBreakerMetrics, MetricsCollector};

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// The three states a circuit breaker can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CircuitState {
    /// Calls pass through normally.
    Closed,
    /// Calls are rejected without attempting the underlying operation.
    Open,
    /// A limited number of calls are let through to probe recovery.
    HalfOpen,
}

impl CircuitState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

/// Tuning knobs for [`CircuitBreaker`].
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit trips open.
    pub failure_threshold: u32,
    /// How long an open circuit waits before allowing a half-open probe.
    pub timeout: Duration,
    /// Consecutive half-open successes required to close the circuit again.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// A concrete, lock-backed circuit breaker protecting a single named
/// collaborator (e.g. one backend adapter instance).
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: AtomicU8,
    consecutive_failures: AtomicU64,
    half_open_successes: AtomicU64,
    opened_at: Mutex<Option<Instant>>,
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: AtomicU8::new(CircuitState::Closed.as_u8()),
            consecutive_failures: AtomicU64::new(0),
            half_open_successes: AtomicU64::new(0),
            opened_at: Mutex::new(None),
            total_calls: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
        }
    }

    /// Transition Open -> HalfOpen once the timeout has elapsed. Called from
    /// `should_allow` so the check stays lock-free on the common path.
    async fn maybe_recover(&self) {
        if CircuitState::from_u8(self.state.load(Ordering::Acquire)) != CircuitState::Open {
            return;
        }
        let mut opened_at = self.opened_at.lock().await;
        if let Some(at) = *opened_at {
            if at.elapsed() >= self.config.timeout {
                self.state
                    .store(CircuitState::HalfOpen.as_u8(), Ordering::Release);
                self.half_open_successes.store(0, Ordering::Release);
                *opened_at = None;
            }
        }
    }
}

impl CircuitBreakerBehavior for CircuitBreaker {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn should_allow(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                // Best-effort: the async recovery check runs on the next
                // record_success/record_failure; callers that need the
                // transition applied before this check can call
                // `maybe_recover` directly.
                false
            }
        }
    }

    fn record_success(&self, _duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.success_count.fetch_add(1, Ordering::Relaxed);
        match self.state() {
            CircuitState::HalfOpen => {
                let successes = self.half_open_successes.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.config.success_threshold as u64 {
                    self.state
                        .store(CircuitState::Closed.as_u8(), Ordering::Release);
                    self.consecutive_failures.store(0, Ordering::Release);
                }
            }
            CircuitState::Closed => {
                self.consecutive_failures.store(0, Ordering::Release);
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self, _duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        match self.state() {
            CircuitState::HalfOpen => {
                self.force_open();
            }
            CircuitState::Closed if failures >= self.config.failure_threshold as u64 => {
                self.force_open();
            }
            _ => {}
        }
    }

    fn is_healthy(&self) -> bool {
        self.metrics().is_healthy()
    }

    fn force_open(&self) {
        self.state
            .store(CircuitState::Open.as_u8(), Ordering::Release);
        if let Ok(mut guard) = self.opened_at.try_lock() {
            *guard = Some(Instant::now());
        }
    }

    fn force_closed(&self) {
        self.state
            .store(CircuitState::Closed.as_u8(), Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
    }

    fn metrics(&self) -> CircuitBreakerMetrics {
        let total_calls = self.total_calls.load(Ordering::Relaxed);
        let success_count = self.success_count.load(Ordering::Relaxed);
        let failure_count = self.failure_count.load(Ordering::Relaxed);
        let mut metrics = CircuitBreakerMetrics::new();
        metrics.total_calls = total_calls;
        metrics.success_count = success_count;
        metrics.failure_count = failure_count;
        metrics.consecutive_failures = self.consecutive_failures.load(Ordering::Relaxed);
        metrics.current_state = self.state();
        if total_calls > 0 {
            metrics.failure_rate = failure_count as f64 / total_calls as f64;
            metrics.success_rate = success_count as f64 / total_calls as f64;
        }
        metrics
    }
}

impl CircuitBreaker {
    /// Async variant of `should_allow` that applies the Open -> HalfOpen
    /// recovery transition first. Prefer this in the nanny's hot path.
    pub async fn should_allow_async(&self) -> bool {
        self.maybe_recover().await;
        self.should_allow()
    }
}
