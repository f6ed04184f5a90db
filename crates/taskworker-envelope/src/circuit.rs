//! Per-host circuit breaker (spec §4.1).
//!
//! Unlike the workspace's generic sliding-window circuit breaker, the
//! envelope needs nothing more than a raw failure counter per host: the
//! spec's state machine is threshold-based, not rate-based.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use taskworker_core::{EventListeners, WorkerEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl CircuitState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// An event emitted by a circuit breaker. Shares the envelope's
/// [`WorkerEvent`] plumbing so a single `TracingListener` observes both
/// retries and breaker transitions.
#[derive(Debug, Clone)]
pub enum CircuitEvent {
    Transition {
        host: String,
        timestamp: Instant,
        from: CircuitState,
        to: CircuitState,
    },
    Rejected {
        host: String,
        timestamp: Instant,
    },
}

impl WorkerEvent for CircuitEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CircuitEvent::Transition { .. } => "circuit_transition",
            CircuitEvent::Rejected { .. } => "circuit_rejected",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            CircuitEvent::Transition { timestamp, .. } => *timestamp,
            CircuitEvent::Rejected { timestamp, .. } => *timestamp,
        }
    }

    fn source(&self) -> &str {
        match self {
            CircuitEvent::Transition { host, .. } => host,
            CircuitEvent::Rejected { host, .. } => host,
        }
    }
}

struct Inner {
    state: CircuitState,
    failure_count: u64,
    last_failure_at: Option<Instant>,
    half_open_trial_in_flight: bool,
}

/// The circuit breaker for one upstream host.
///
/// `state_atomic` lets readers (the `/metrics` gauge) observe the current
/// state without locking the mutex that guards transition logic.
pub struct CircuitBreaker {
    host: String,
    threshold: u64,
    recovery_timeout: Duration,
    state_atomic: Arc<AtomicU8>,
    failure_count_atomic: Arc<AtomicU64>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(host: impl Into<String>, threshold: u64, recovery_timeout: Duration) -> Self {
        Self {
            host: host.into(),
            threshold,
            recovery_timeout,
            state_atomic: Arc::new(AtomicU8::new(CircuitState::Closed as u8)),
            failure_count_atomic: Arc::new(AtomicU64::new(0)),
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
                half_open_trial_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state_atomic.load(Ordering::Acquire))
    }

    /// Returns `true` if a call may proceed. Transitions open → half-open
    /// when `recovery_timeout` has elapsed, and admits exactly one trial
    /// call while half-open.
    pub fn try_acquire(&self, events: &EventListeners<CircuitEvent>) -> bool {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.recovery_timeout {
                    self.transition(&mut inner, CircuitState::HalfOpen, events);
                    inner.half_open_trial_in_flight = true;
                    true
                } else {
                    events.emit(&CircuitEvent::Rejected {
                        host: self.host.clone(),
                        timestamp: Instant::now(),
                    });
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_trial_in_flight {
                    events.emit(&CircuitEvent::Rejected {
                        host: self.host.clone(),
                        timestamp: Instant::now(),
                    });
                    false
                } else {
                    inner.half_open_trial_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self, events: &EventListeners<CircuitEvent>) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        if inner.state == CircuitState::HalfOpen {
            inner.half_open_trial_in_flight = false;
            inner.failure_count = 0;
            self.failure_count_atomic.store(0, Ordering::Release);
            self.transition(&mut inner, CircuitState::Closed, events);
        }
    }

    pub fn record_failure(&self, events: &EventListeners<CircuitEvent>) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        inner.last_failure_at = Some(Instant::now());
        match inner.state {
            CircuitState::HalfOpen => {
                inner.half_open_trial_in_flight = false;
                self.transition(&mut inner, CircuitState::Open, events);
            }
            CircuitState::Closed => {
                inner.failure_count += 1;
                self.failure_count_atomic
                    .store(inner.failure_count, Ordering::Release);
                if inner.failure_count >= self.threshold {
                    self.transition(&mut inner, CircuitState::Open, events);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn transition(
        &self,
        inner: &mut Inner,
        to: CircuitState,
        events: &EventListeners<CircuitEvent>,
    ) {
        if inner.state == to {
            return;
        }
        let from = inner.state;
        inner.state = to;
        self.state_atomic.store(to as u8, Ordering::Release);

        tracing::warn!(host = %self.host, from = ?from, to = ?to, "circuit breaker transition");
        metrics::gauge!("circuit_breaker_state", "host" => self.host.clone()).set(to as u8 as f64);

        events.emit(&CircuitEvent::Transition {
            host: self.host.clone(),
            timestamp: Instant::now(),
            from,
            to,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new("host", 5, Duration::from_secs(60));
        let events = EventListeners::new();
        for _ in 0..4 {
            cb.record_failure(&events);
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        cb.record_failure(&events);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.try_acquire(&events));
    }

    #[test]
    fn half_open_admits_one_trial_and_closes_on_success() {
        let cb = CircuitBreaker::new("host", 1, Duration::from_millis(0));
        let events = EventListeners::new();
        cb.record_failure(&events);
        assert_eq!(cb.state(), CircuitState::Open);

        assert!(cb.try_acquire(&events));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(!cb.try_acquire(&events));

        cb.record_success(&events);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = CircuitBreaker::new("host", 1, Duration::from_millis(0));
        let events = EventListeners::new();
        cb.record_failure(&events);
        assert!(cb.try_acquire(&events));
        cb.record_failure(&events);
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
