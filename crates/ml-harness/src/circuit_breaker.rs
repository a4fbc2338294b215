use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use ml_core::config::CircuitBreakerSettings;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Outcome of a call that did not produce a value through [`guarded_call`].
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError {
    /// The gate refused the call. The wrapped operation was never started.
    #[error("circuit is open – refusing call")]
    Open,

    /// The call exceeded its deadline and was dropped. Counts as a failure.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The wrapped operation returned an error. Counts as a failure.
    #[error("{0}")]
    Inner(String),
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation – all calls pass through.
    Closed,
    /// Too many failures – calls are rejected until the cooldown elapses.
    Open,
    /// Testing recovery – a bounded number of trial calls are allowed through.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting trial calls.
    pub reset_timeout: Duration,
    /// Maximum trial calls admitted while half-open.
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(30),
            half_open_max_requests: 2,
        }
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold,
            reset_timeout: Duration::from_millis(settings.reset_timeout_ms),
            half_open_max_requests: settings.half_open_max_requests,
        }
    }
}

// ---------------------------------------------------------------------------
// CircuitGate trait
// ---------------------------------------------------------------------------

/// Admission gate in front of one pipeline stage.
///
/// Each method is atomic on its own. Implementations must be cheap: they are
/// consulted on every agent invocation.
pub trait CircuitGate: Send + Sync + fmt::Debug {
    /// Whether the next call may proceed. May move open -> half-open.
    fn allow_request(&self) -> bool;
    fn record_success(&self);
    fn record_failure(&self);
    fn state(&self) -> CircuitState;
}

// ---------------------------------------------------------------------------
// Inner state (behind Mutex)
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct InnerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    half_open_requests: u32,
}

// ---------------------------------------------------------------------------
// CircuitBreaker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<InnerState>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Arc::new(Mutex::new(InnerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
                half_open_requests: 0,
            })),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current consecutive-failure count.
    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Manually reset the circuit breaker to the **Closed** state.
    pub fn reset(&self) {
        let mut guard = self.lock();
        guard.state = CircuitState::Closed;
        guard.failure_count = 0;
        guard.half_open_requests = 0;
        guard.last_failure_time = None;
    }

    fn lock(&self) -> MutexGuard<'_, InnerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CircuitGate for CircuitBreaker {
    fn allow_request(&self) -> bool {
        let mut guard = self.lock();
        match guard.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled_down = guard
                    .last_failure_time
                    .map(|last| last.elapsed() >= self.config.reset_timeout)
                    .unwrap_or(true);
                if cooled_down {
                    info!(breaker = %self.name, "circuit breaker transitioning Open -> HalfOpen");
                    guard.state = CircuitState::HalfOpen;
                    // This request is the first trial.
                    guard.half_open_requests = 1;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if guard.half_open_requests < self.config.half_open_max_requests {
                    guard.half_open_requests += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        let mut guard = self.lock();
        match guard.state {
            CircuitState::HalfOpen => {
                info!(breaker = %self.name, "circuit breaker transitioning HalfOpen -> Closed");
                guard.state = CircuitState::Closed;
                guard.failure_count = 0;
                guard.half_open_requests = 0;
            }
            CircuitState::Closed => {
                // Only consecutive failures trip the breaker.
                guard.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut guard = self.lock();
        guard.failure_count += 1;
        guard.last_failure_time = Some(Instant::now());

        match guard.state {
            CircuitState::Closed => {
                if guard.failure_count >= self.config.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        failures = guard.failure_count,
                        "circuit breaker transitioning Closed -> Open"
                    );
                    guard.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                warn!(
                    breaker = %self.name,
                    "circuit breaker transitioning HalfOpen -> Open (failure during trial)"
                );
                guard.state = CircuitState::Open;
                guard.half_open_requests = 0;
            }
            CircuitState::Open => {}
        }
    }

    fn state(&self) -> CircuitState {
        self.lock().state
    }
}

// ---------------------------------------------------------------------------
// Fixed gates for tests and forced degradation
// ---------------------------------------------------------------------------

/// Gate that refuses every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOpen;

impl CircuitGate for AlwaysOpen {
    fn allow_request(&self) -> bool {
        false
    }
    fn record_success(&self) {}
    fn record_failure(&self) {}
    fn state(&self) -> CircuitState {
        CircuitState::Open
    }
}

/// Gate that admits every call regardless of outcomes.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysClosed;

impl CircuitGate for AlwaysClosed {
    fn allow_request(&self) -> bool {
        true
    }
    fn record_success(&self) {}
    fn record_failure(&self) {}
    fn state(&self) -> CircuitState {
        CircuitState::Closed
    }
}

// ---------------------------------------------------------------------------
// guarded_call
// ---------------------------------------------------------------------------

/// Execute `f` behind `gate` with a deadline.
///
/// When the gate refuses, `f` is never invoked. Otherwise the future races
/// `call_timeout`; on expiry it is dropped, which cancels it. Success and
/// failure are recorded on the gate before returning.
pub async fn guarded_call<F, Fut, T, E>(
    gate: &dyn CircuitGate,
    call_timeout: Duration,
    f: F,
) -> Result<T, CircuitBreakerError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    if !gate.allow_request() {
        return Err(CircuitBreakerError::Open);
    }

    match tokio::time::timeout(call_timeout, f()).await {
        Ok(Ok(value)) => {
            gate.record_success();
            Ok(value)
        }
        Ok(Err(e)) => {
            gate.record_failure();
            Err(CircuitBreakerError::Inner(e.to_string()))
        }
        Err(_elapsed) => {
            gate.record_failure();
            Err(CircuitBreakerError::Timeout(call_timeout))
        }
    }
}

// ---------------------------------------------------------------------------
// CircuitBreakerRegistry
// ---------------------------------------------------------------------------

/// Process-wide gates keyed by agent id.
///
/// Agents are constructed per request; the registry is what makes breaker
/// state survive across requests. Tests [`insert`](Self::insert) fixed gates.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    gates: DashMap<String, Arc<dyn CircuitGate>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            gates: DashMap::new(),
        }
    }

    /// Gate for `key`, creating a default breaker on first use.
    pub fn get_or_create(&self, key: &str) -> Arc<dyn CircuitGate> {
        self.gates
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(key, self.config.clone())) as Arc<dyn CircuitGate>
            })
            .value()
            .clone()
    }

    /// Override the gate for `key`.
    pub fn insert(&self, key: impl Into<String>, gate: Arc<dyn CircuitGate>) {
        self.gates.insert(key.into(), gate);
    }

    /// Current state per registered key, sorted by key.
    pub fn states(&self) -> Vec<(String, CircuitState)> {
        let mut states: Vec<_> = self
            .gates
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }
}
