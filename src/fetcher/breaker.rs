//! Per-source circuit breaker.
//!
//! ```text
//!            N consecutive failures              cooldown elapsed
//!  Closed ───────────────────────────▶ Open ───────────────────────▶ HalfOpen
//!    ▲                                  ▲                               │
//!    │          probe succeeded         │        probe failed           │
//!    └──────────────────────────────────┼───────────────────────────────┘
//!                                       └───────────────────────────────┘
//! ```
//!
//! Only one probe is admitted while half-open; concurrent callers are
//! rejected until the probe reports back. Results of requests admitted
//! before the breaker opened cannot close it.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Decision for one prospective request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// The cooldown has elapsed and this request is the half-open probe.
    Probe,
    Rejected { retry_in: Duration },
}

#[derive(Debug, Clone, Copy)]
enum State {
    Closed,
    Open { until: Instant },
    HalfOpen { probe_in_flight: bool },
}

#[derive(Debug)]
struct Inner {
    state: State,
    consecutive_failures: u32,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    ///
    /// # Arguments
    ///
    /// * `failure_threshold` - Consecutive failures that open the breaker (at least 1).
    /// * `cooldown` - How long the breaker stays open before admitting a probe.
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: Mutex::new(Inner {
                state: State::Closed,
                consecutive_failures: 0,
            }),
        }
    }

    /// Decide whether a request may go out now.
    ///
    /// The returned [`Admission`] must be passed back to the matching
    /// `record_*` call so that late results can be told apart from the probe.
    pub fn admit(&self) -> Admission {
        self.admit_at(Instant::now())
    }

    /// [`admit`](Self::admit) with an explicit clock.
    pub fn admit_at(&self, now: Instant) -> Admission {
        let mut inner = self.lock();
        match inner.state {
            State::Closed => Admission::Allowed,
            State::Open { until } if now >= until => {
                inner.state = State::HalfOpen {
                    probe_in_flight: true,
                };
                Admission::Probe
            }
            State::Open { until } => Admission::Rejected {
                retry_in: until - now,
            },
            State::HalfOpen {
                probe_in_flight: true,
            } => Admission::Rejected {
                retry_in: Duration::ZERO,
            },
            State::HalfOpen {
                probe_in_flight: false,
            } => {
                inner.state = State::HalfOpen {
                    probe_in_flight: true,
                };
                Admission::Probe
            }
        }
    }

    /// Report a successful request.
    ///
    /// Only the half-open probe closes the breaker. A request admitted while
    /// closed resets the failure count if the breaker is still closed, and is
    /// ignored otherwise.
    pub fn record_success(&self, admission: Admission) {
        let mut inner = self.lock();
        match (admission, inner.state) {
            (Admission::Probe, State::HalfOpen { .. }) => {
                inner.state = State::Closed;
                inner.consecutive_failures = 0;
            }
            (Admission::Allowed, State::Closed) => inner.consecutive_failures = 0,
            _ => {}
        }
    }

    /// Count a failure. Returns `true` when this call opened the breaker.
    pub fn record_failure(&self, admission: Admission) -> bool {
        self.record_failure_at(admission, Instant::now())
    }

    /// [`record_failure`](Self::record_failure) with an explicit clock.
    pub fn record_failure_at(&self, admission: Admission, now: Instant) -> bool {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        match (admission, inner.state) {
            (_, State::Closed) if inner.consecutive_failures >= self.failure_threshold => {
                inner.state = State::Open {
                    until: now + self.cooldown,
                };
                true
            }
            (Admission::Probe, State::HalfOpen { .. }) => {
                inner.state = State::Open {
                    until: now + self.cooldown,
                };
                true
            }
            _ => false,
        }
    }

    /// An outcome that says nothing about the source's health (e.g. a 404).
    /// A probe gives its slot back; the failure count is left alone.
    pub fn record_neutral(&self, admission: Admission) {
        let mut inner = self.lock();
        if let (Admission::Probe, State::HalfOpen { .. }) = (admission, inner.state) {
            inner.state = State::HalfOpen {
                probe_in_flight: false,
            };
        }
    }

    /// Current state, without advancing an expired cooldown.
    pub fn state(&self) -> BreakerState {
        match self.lock().state {
            State::Closed => BreakerState::Closed,
            State::Open { .. } => BreakerState::Open,
            State::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    /// Failures counted since the last success while closed.
    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // State is always left consistent, so a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(60);

    fn tripped(now: Instant) -> CircuitBreaker {
        let breaker = CircuitBreaker::new(5, COOLDOWN);
        for _ in 0..5 {
            breaker.record_failure_at(Admission::Allowed, now);
        }
        breaker
    }

    #[test]
    fn test_opens_after_threshold() {
        let now = Instant::now();
        let breaker = CircuitBreaker::new(5, COOLDOWN);
        for i in 0..4 {
            assert!(!breaker.record_failure_at(Admission::Allowed, now), "opened early at {i}");
            assert_eq!(breaker.admit_at(now), Admission::Allowed);
        }
        assert!(breaker.record_failure_at(Admission::Allowed, now));
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(
            breaker.admit_at(now + Duration::from_secs(10)),
            Admission::Rejected {
                retry_in: Duration::from_secs(50)
            }
        );
    }

    #[test]
    fn test_success_resets_count_while_closed() {
        let now = Instant::now();
        let breaker = CircuitBreaker::new(5, COOLDOWN);
        for _ in 0..4 {
            breaker.record_failure_at(Admission::Allowed, now);
        }
        breaker.record_success(Admission::Allowed);
        assert_eq!(breaker.consecutive_failures(), 0);
        for _ in 0..4 {
            breaker.record_failure_at(Admission::Allowed, now);
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_probe_success_closes() {
        let now = Instant::now();
        let breaker = tripped(now);
        let later = now + COOLDOWN;
        assert_eq!(breaker.admit_at(later), Admission::Probe);
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_success(Admission::Probe);
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
        assert_eq!(breaker.admit_at(later), Admission::Allowed);
    }

    #[test]
    fn test_probe_failure_reopens() {
        let now = Instant::now();
        let breaker = tripped(now);
        let later = now + COOLDOWN + Duration::from_secs(1);
        assert_eq!(breaker.admit_at(later), Admission::Probe);
        assert!(breaker.record_failure_at(Admission::Probe, later));
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(
            breaker.admit_at(later),
            Admission::Rejected { retry_in: COOLDOWN }
        );
    }

    #[test]
    fn test_single_probe_while_half_open() {
        let now = Instant::now();
        let breaker = tripped(now);
        let later = now + COOLDOWN;
        assert_eq!(breaker.admit_at(later), Admission::Probe);
        assert!(matches!(breaker.admit_at(later), Admission::Rejected { .. }));

        // a neutral outcome hands the probe slot to the next caller
        breaker.record_neutral(Admission::Probe);
        assert_eq!(breaker.admit_at(later), Admission::Probe);
    }

    #[test]
    fn test_late_success_does_not_close_open_breaker() {
        let now = Instant::now();
        let breaker = tripped(now);
        breaker.record_success(Admission::Allowed);
        assert_eq!(breaker.state(), BreakerState::Open);
        assert_eq!(breaker.consecutive_failures(), 5);
        assert_eq!(
            breaker.admit_at(now + Duration::from_secs(1)),
            Admission::Rejected {
                retry_in: COOLDOWN - Duration::from_secs(1)
            }
        );
    }

    #[test]
    fn test_late_outcomes_leave_half_open_alone() {
        let now = Instant::now();
        let breaker = tripped(now);
        let later = now + COOLDOWN;
        assert_eq!(breaker.admit_at(later), Admission::Probe);

        breaker.record_success(Admission::Allowed);
        breaker.record_neutral(Admission::Allowed);
        assert!(!breaker.record_failure_at(Admission::Allowed, later));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert!(matches!(breaker.admit_at(later), Admission::Rejected { .. }));

        breaker.record_success(Admission::Probe);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}
