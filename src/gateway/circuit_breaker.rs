use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Current state of the gateway circuit breaker.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Copy, Clone)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: usize,
    pub opened_at: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("gateway circuit breaker is open")]
pub struct CircuitOpen;

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: usize,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Closed/Open/Half-Open breaker shared by every clone of one gateway session.
///
/// After `failure_threshold` consecutive failures the breaker opens and rejects calls until
/// `cooldown` elapses; then a single probe call decides whether it closes or reopens.
#[derive(Debug, Clone)]
pub struct GatewayCircuitBreaker {
    state: Arc<Mutex<BreakerState>>,
    failure_threshold: usize,
    cooldown: Duration,
}

impl Default for GatewayCircuitBreaker {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30))
    }
}

impl GatewayCircuitBreaker {
    pub fn new(failure_threshold: usize, cooldown: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            })),
            failure_threshold: failure_threshold.max(1),
            cooldown: if cooldown.is_zero() {
                Duration::from_secs(1)
            } else {
                cooldown
            },
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let guard = self.lock();
        CircuitBreakerSnapshot {
            state: guard.state,
            consecutive_failures: guard.consecutive_failures,
            opened_at: guard.opened_at,
        }
    }

    /// Admits a call, moving an expired Open breaker to Half-Open for one probe.
    pub fn acquire(&self) -> Result<CircuitState, CircuitOpen> {
        let mut guard = self.lock();

        if guard.state == CircuitState::Open {
            let cooled_down = guard
                .opened_at
                .is_some_and(|opened_at| opened_at.elapsed() >= self.cooldown);
            if !cooled_down {
                return Err(CircuitOpen);
            }
            Self::transition(&mut guard, CircuitState::HalfOpen);
            guard.probe_in_flight = false;
        }

        if guard.state == CircuitState::HalfOpen {
            if guard.probe_in_flight {
                return Err(CircuitOpen);
            }
            guard.probe_in_flight = true;
        }

        Ok(guard.state)
    }

    pub fn record_success(&self) {
        let mut guard = self.lock();
        guard.consecutive_failures = 0;
        guard.probe_in_flight = false;
        if guard.state == CircuitState::HalfOpen {
            guard.opened_at = None;
            Self::transition(&mut guard, CircuitState::Closed);
        }
    }

    pub fn record_failure(&self) {
        let mut guard = self.lock();
        guard.consecutive_failures = guard.consecutive_failures.saturating_add(1);
        guard.probe_in_flight = false;

        let trip = match guard.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => guard.consecutive_failures >= self.failure_threshold,
            CircuitState::Open => false,
        };

        if trip {
            guard.opened_at = Some(Instant::now());
            Self::transition(&mut guard, CircuitState::Open);
        }
    }

    fn transition(guard: &mut BreakerState, next: CircuitState) {
        if guard.state != next {
            tracing::warn!(
                previous = ?guard.state,
                next = ?next,
                consecutive_failures = guard.consecutive_failures,
                "gateway circuit breaker state changed"
            );
            guard.state = next;
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().expect("circuit breaker mutex poisoned")
    }
}
