//! Circuit breaker state machine guarding broker calls.
//!
//! One breaker instance exists per protected call site, shared between all
//! relay workers of a process. Transitions are atomic with respect to
//! concurrent callers: outcome recording and admission both run under the
//! same lock, so a failure recorded in closed state cannot be lost to a
//! concurrent transition.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Circuit breaker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Failures within the evaluation window required to open the breaker.
    pub failure_threshold: u32,
    /// Rolling window over which failures are counted while closed.
    pub evaluation_window: Duration,
    /// Cooldown period while the breaker remains open.
    pub open_cooldown: Duration,
    /// Trial calls admitted concurrently while half-open.
    pub half_open_max_probes: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            evaluation_window: Duration::from_secs(60),
            open_cooldown: Duration::from_secs(30),
            half_open_max_probes: 1,
        }
    }
}

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakerState {
    /// Normal operation; calls pass through.
    Closed,
    /// Calls fail fast until the cooldown elapses.
    Open,
    /// A bounded number of trial calls probe the dependency.
    HalfOpen,
}

impl BreakerState {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// One observed state transition, reported to the caller for logging and
/// metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerTransition {
    /// State before the transition.
    pub from: BreakerState,
    /// State after the transition.
    pub to: BreakerState,
    /// Instant the transition was observed.
    pub at: DateTime<Utc>,
}

/// Admission decision for one guarded call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallAdmission {
    /// The call may proceed; the caller must report its outcome.
    Allowed,
    /// The breaker is open; fail without attempting the operation.
    FailFast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InternalState {
    Closed {
        failures: u32,
        window_start: DateTime<Utc>,
    },
    Open {
        opened_at: DateTime<Utc>,
    },
    HalfOpen {
        probes_in_flight: u32,
    },
}

impl InternalState {
    const fn snapshot(self) -> BreakerState {
        match self {
            Self::Closed { .. } => BreakerState::Closed,
            Self::Open { .. } => BreakerState::Open,
            Self::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }
}

/// Failure-tracking state machine for one protected call site.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<InternalState>,
}

impl CircuitBreaker {
    /// Build a closed breaker with the given name and configuration.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, now: DateTime<Utc>) -> Self {
        let config = CircuitBreakerConfig {
            failure_threshold: config.failure_threshold.max(1),
            half_open_max_probes: config.half_open_max_probes.max(1),
            ..config
        };
        Self {
            name: name.into(),
            config,
            state: Mutex::new(InternalState::Closed {
                failures: 0,
                window_start: now,
            }),
        }
    }

    /// Name of the protected call site.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Decide whether one call may proceed.
    ///
    /// An open breaker whose cooldown has elapsed transitions to half-open
    /// and admits the call as a probe; the returned transition, if any, is
    /// for the caller to log and count.
    pub fn admit_call(&self, now: DateTime<Utc>) -> (CallAdmission, Option<BreakerTransition>) {
        let mut state = self.lock_state();
        match *state {
            InternalState::Closed { .. } => (CallAdmission::Allowed, None),
            InternalState::Open { opened_at } => {
                if cooldown_elapsed(opened_at, now, self.config.open_cooldown) {
                    *state = InternalState::HalfOpen {
                        probes_in_flight: 1,
                    };
                    let transition = BreakerTransition {
                        from: BreakerState::Open,
                        to: BreakerState::HalfOpen,
                        at: now,
                    };
                    (CallAdmission::Allowed, Some(transition))
                } else {
                    (CallAdmission::FailFast, None)
                }
            }
            InternalState::HalfOpen { probes_in_flight } => {
                if probes_in_flight < self.config.half_open_max_probes {
                    *state = InternalState::HalfOpen {
                        probes_in_flight: probes_in_flight.saturating_add(1),
                    };
                    (CallAdmission::Allowed, None)
                } else {
                    (CallAdmission::FailFast, None)
                }
            }
        }
    }

    /// Record a successful call outcome.
    ///
    /// A half-open probe success closes the breaker and resets the failure
    /// count.
    pub fn record_success(&self, now: DateTime<Utc>) -> Option<BreakerTransition> {
        let mut state = self.lock_state();
        match *state {
            InternalState::HalfOpen { .. } => {
                *state = InternalState::Closed {
                    failures: 0,
                    window_start: now,
                };
                Some(BreakerTransition {
                    from: BreakerState::HalfOpen,
                    to: BreakerState::Closed,
                    at: now,
                })
            }
            InternalState::Closed { .. } => {
                *state = InternalState::Closed {
                    failures: 0,
                    window_start: now,
                };
                None
            }
            // A success observed while open belongs to a call admitted
            // before the breaker tripped; the cooldown still stands.
            InternalState::Open { .. } => None,
        }
    }

    /// Record a failed call outcome.
    ///
    /// While closed, failures accumulate within the evaluation window; the
    /// threshold failure opens the breaker. A half-open probe failure
    /// reopens it and restarts the cooldown.
    pub fn record_failure(&self, now: DateTime<Utc>) -> Option<BreakerTransition> {
        let mut state = self.lock_state();
        match *state {
            InternalState::Closed {
                failures,
                window_start,
            } => {
                let (failures, window_start) =
                    if window_expired(window_start, now, self.config.evaluation_window) {
                        (1, now)
                    } else {
                        (failures.saturating_add(1), window_start)
                    };

                if failures >= self.config.failure_threshold {
                    *state = InternalState::Open { opened_at: now };
                    Some(BreakerTransition {
                        from: BreakerState::Closed,
                        to: BreakerState::Open,
                        at: now,
                    })
                } else {
                    *state = InternalState::Closed {
                        failures,
                        window_start,
                    };
                    None
                }
            }
            InternalState::HalfOpen { .. } => {
                *state = InternalState::Open { opened_at: now };
                Some(BreakerTransition {
                    from: BreakerState::HalfOpen,
                    to: BreakerState::Open,
                    at: now,
                })
            }
            InternalState::Open { .. } => None,
        }
    }

    /// Force the breaker closed regardless of history.
    ///
    /// Operator intervention: returns the transition when the breaker was
    /// not already closed.
    pub fn reset(&self, now: DateTime<Utc>) -> Option<BreakerTransition> {
        let mut state = self.lock_state();
        let from = state.snapshot();
        *state = InternalState::Closed {
            failures: 0,
            window_start: now,
        };
        (from != BreakerState::Closed).then_some(BreakerTransition {
            from,
            to: BreakerState::Closed,
            at: now,
        })
    }

    /// Snapshot the current state without mutating it.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.lock_state().snapshot()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, InternalState> {
        // State mutations cannot panic, so a poisoned lock still holds a
        // consistent value.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registry handing out one shared breaker per protected call site.
///
/// Breakers are created lazily on first use with the registry's
/// configuration. The registry is the entry point for manual resets.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    /// Build a registry applying `config` to every breaker it creates.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the breaker for `name`, creating it closed if absent.
    pub fn breaker(&self, name: &str, now: DateTime<Utc>) -> Arc<CircuitBreaker> {
        let mut breakers = self
            .breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            breakers
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.config, now))),
        )
    }

    /// Manually reset the named breaker to closed.
    ///
    /// Returns `None` when the breaker does not exist or was already closed.
    pub fn reset(&self, name: &str, now: DateTime<Utc>) -> Option<BreakerTransition> {
        let breakers = self
            .breakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        breakers.get(name).and_then(|breaker| breaker.reset(now))
    }
}

fn cooldown_elapsed(opened_at: DateTime<Utc>, now: DateTime<Utc>, cooldown: Duration) -> bool {
    // Fail open when std->chrono conversion fails: this path is unlikely,
    // and returning true avoids holding the circuit open forever.
    let Ok(cooldown) = chrono::Duration::from_std(cooldown) else {
        return true;
    };
    now >= opened_at + cooldown
}

fn window_expired(window_start: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    let Ok(window) = chrono::Duration::from_std(window) else {
        return false;
    };
    now - window_start > window
}
