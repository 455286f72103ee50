//! Consecutive-failure gate. Opens after `THRESHOLD` failures in a row;
//! closes implicitly once `RESET_TIME` has passed since the last one, no
//! separate half-open state, just a probe on the next request.

use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const THRESHOLD: u32 = 5;
pub const RESET_TIME: Duration = Duration::from_secs(30);

struct State {
    failures: u32,
    last_failure: Option<Instant>,
    open: bool,
}

/// Thread-safe circuit breaker shared across requests on one transport.
pub struct CircuitBreaker {
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        CircuitBreaker {
            state: Mutex::new(State {
                failures: 0,
                last_failure: None,
                open: false,
            }),
        }
    }

    /// Resets the failure counter and closes the breaker. Logs at info
    /// level if this was actually a transition from open to closed.
    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap();
        let was_open = state.open;
        state.failures = 0;
        state.open = false;
        if was_open {
            log::info!("circuit breaker closed after a successful call");
        }
    }

    /// Returns `true` only on the attempt that trips the breaker open.
    pub fn record_failure(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        state.failures += 1;
        state.last_failure = Some(Instant::now());
        if state.failures >= THRESHOLD && !state.open {
            state.open = true;
            log::info!(
                "circuit breaker opened after {} consecutive failures",
                state.failures
            );
            return true;
        }
        false
    }

    /// If open and past `RESET_TIME`, atomically closes and returns
    /// `false`; otherwise returns the open flag verbatim.
    pub fn is_open(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.open {
            if let Some(last) = state.last_failure {
                if last.elapsed() > RESET_TIME {
                    state.open = false;
                    state.failures = 0;
                    return false;
                }
            }
        }
        state.open
    }

    pub fn state(&self) -> &'static str {
        if self.is_open() { "open" } else { "closed" }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_on_threshold() {
        let breaker = CircuitBreaker::new();
        for _ in 0..THRESHOLD - 1 {
            assert!(!breaker.record_failure());
        }
        assert!(breaker.record_failure());
        assert_eq!(breaker.state(), "open");
    }

    #[test]
    fn stays_open_after_threshold_without_double_reporting() {
        let breaker = CircuitBreaker::new();
        for _ in 0..THRESHOLD {
            breaker.record_failure();
        }
        assert!(!breaker.record_failure());
        assert_eq!(breaker.state(), "open");
    }

    #[test]
    fn success_closes_breaker() {
        let breaker = CircuitBreaker::new();
        for _ in 0..THRESHOLD {
            breaker.record_failure();
        }
        assert!(breaker.is_open());
        breaker.record_success();
        assert!(!breaker.is_open());
        assert_eq!(breaker.state(), "closed");
    }

    #[test]
    fn resets_after_cooldown() {
        let breaker = CircuitBreaker::new();
        for _ in 0..THRESHOLD {
            breaker.record_failure();
        }
        {
            let mut state = breaker.state.lock().unwrap();
            state.last_failure = Some(Instant::now() - RESET_TIME - Duration::from_secs(1));
        }
        assert!(!breaker.is_open());
        assert_eq!(breaker.state(), "closed");
    }
}
