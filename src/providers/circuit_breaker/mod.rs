use crate::config::CircuitBreakerConfig;
use crate::providers::base::Capability;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open { .. } => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    /// Outcomes inside the rolling window, `true` for failure.
    window: VecDeque<(Instant, bool)>,
    /// Only one trial call may be in flight while half-open.
    probe_in_flight: bool,
}

/// Point-in-time view of a breaker, for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BreakerSnapshot {
    pub capability: Capability,
    pub state: String,
    pub consecutive_failures: u32,
    pub window_calls: usize,
    pub window_failures: usize,
}

/// One fault-isolation state machine, instantiated per capability.
///
/// The state lives behind a `std` mutex that is never held across an
/// `.await`; callers take a [`Permit`] before the network call and settle it
/// afterwards.
pub struct CircuitBreaker {
    capability: Capability,
    failure_threshold: u32,
    failure_rate_threshold: f64,
    minimum_calls: u32,
    window: Duration,
    cool_down: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(capability: Capability, config: &CircuitBreakerConfig) -> Self {
        Self {
            capability,
            failure_threshold: config.failure_threshold.max(1),
            failure_rate_threshold: config.failure_rate_threshold,
            minimum_calls: config.minimum_calls.max(1),
            window: Duration::from_secs(config.window_secs),
            cool_down: Duration::from_secs(config.recovery_timeout_secs),
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                window: VecDeque::new(),
                probe_in_flight: false,
            }),
        }
    }

    /// Override the cool-down with sub-second precision.
    #[must_use]
    pub fn with_cool_down(mut self, cool_down: Duration) -> Self {
        self.cool_down = cool_down;
        self
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask to make a call. `Err` carries the remaining cool-down.
    pub fn try_acquire(&self) -> Result<Permit<'_>, Duration> {
        let mut breaker = self.lock();
        match breaker.state {
            CircuitState::Closed => Ok(Permit::new(self, false)),
            CircuitState::HalfOpen => {
                if breaker.probe_in_flight {
                    Err(self.cool_down)
                } else {
                    breaker.probe_in_flight = true;
                    Ok(Permit::new(self, true))
                }
            }
            CircuitState::Open { since } => {
                let elapsed = since.elapsed();
                if elapsed >= self.cool_down {
                    info!(
                        "{} circuit breaker transitioning Open -> HalfOpen after {}ms",
                        self.capability,
                        elapsed.as_millis()
                    );
                    breaker.state = CircuitState::HalfOpen;
                    breaker.probe_in_flight = true;
                    Ok(Permit::new(self, true))
                } else {
                    Err(self.cool_down - elapsed)
                }
            }
        }
    }

    fn on_success(&self, probe: bool) {
        let mut breaker = self.lock();
        let now = Instant::now();
        breaker.consecutive_failures = 0;
        if probe {
            info!("{} circuit breaker probe succeeded: HalfOpen -> Closed", self.capability);
            breaker.state = CircuitState::Closed;
            breaker.probe_in_flight = false;
            breaker.window.clear();
        } else {
            self.push_outcome(&mut breaker, now, false);
        }
    }

    fn on_failure(&self, probe: bool, transient: bool) {
        let mut breaker = self.lock();
        let now = Instant::now();

        if probe {
            breaker.probe_in_flight = false;
            if transient {
                warn!("{} circuit breaker probe failed: HalfOpen -> Open", self.capability);
                breaker.state = CircuitState::Open { since: now };
            } else {
                // The dependency answered; a client-side error says it is up
                debug!(
                    "{} circuit breaker probe got a non-transient error: HalfOpen -> Closed",
                    self.capability
                );
                breaker.state = CircuitState::Closed;
                breaker.consecutive_failures = 0;
                breaker.window.clear();
            }
            return;
        }

        if !transient {
            return;
        }
        breaker.consecutive_failures += 1;
        self.push_outcome(&mut breaker, now, true);

        if breaker.state != CircuitState::Closed {
            return;
        }
        let failures = breaker.consecutive_failures;
        let (calls, failed) = window_counts(&breaker.window);
        let rate_tripped = calls >= self.minimum_calls as usize
            && failed as f64 / calls as f64 >= self.failure_rate_threshold;
        if failures >= self.failure_threshold || rate_tripped {
            warn!(
                "{} circuit breaker tripped ({} consecutive, {}/{} in window): Closed -> Open",
                self.capability, failures, failed, calls
            );
            breaker.state = CircuitState::Open { since: now };
        }
    }

    fn push_outcome(&self, breaker: &mut BreakerState, now: Instant, failed: bool) {
        breaker.window.push_back((now, failed));
        while let Some((at, _)) = breaker.window.front() {
            if now.duration_since(*at) > self.window {
                breaker.window.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let breaker = self.lock();
        let (calls, failed) = window_counts(&breaker.window);
        BreakerSnapshot {
            capability: self.capability,
            state: breaker.state.to_string(),
            consecutive_failures: breaker.consecutive_failures,
            window_calls: calls,
            window_failures: failed,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.lock().state, CircuitState::Open { .. })
    }
}

fn window_counts(window: &VecDeque<(Instant, bool)>) -> (usize, usize) {
    let failed = window.iter().filter(|(_, f)| *f).count();
    (window.len(), failed)
}

/// Admission to make one call. Must be settled with [`Permit::success`] or
/// [`Permit::failure`]; a permit dropped unsettled (the caller's future was
/// cancelled) is recorded as a transient failure.
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.probe);
    }

    pub fn failure(mut self, transient: bool) {
        self.settled = true;
        self.breaker.on_failure(self.probe, transient);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!("{} call abandoned before completion", self.breaker.capability);
            self.breaker.on_failure(self.probe, true);
        }
    }
}
