//! Global circuit breaker for the dispatch pipeline.
//!
//! # State Transitions
//! ```text
//! Closed → Open: failures >= threshold
//! Open → Closed: first check after the cooldown resets the counter
//! ```
//!
//! Only pipeline faults are recorded. Handler faults absorbed by the fault
//! stage never reach the breaker.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::DispatchError;

pub const DEFAULT_THRESHOLD: u32 = 5;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct State {
    failures: u32,
    last_failure: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<State>,
    threshold: u32,
    cooldown: Duration,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_COOLDOWN)
    }
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: Mutex::new(State {
                failures: 0,
                last_failure: None,
            }),
            threshold,
            cooldown,
        }
    }

    /// Rejects while open. Once the cooldown has elapsed the counter is reset
    /// and the request is let through unconditionally.
    pub fn check(&self) -> Result<(), DispatchError> {
        let mut state = self.state.lock();
        if state.failures < self.threshold {
            return Ok(());
        }

        let cooling = state
            .last_failure
            .is_some_and(|at| at.elapsed() < self.cooldown);
        if cooling {
            return Err(DispatchError::CircuitOpen);
        }

        tracing::info!(failures = state.failures, "Circuit breaker cooldown elapsed, resetting");
        state.failures = 0;
        Ok(())
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.failures += 1;
        state.last_failure = Some(Instant::now());

        if state.failures == self.threshold {
            tracing::warn!(
                failures = state.failures,
                cooldown_ms = self.cooldown.as_millis() as u64,
                "Circuit breaker opened"
            );
        }
    }

    pub fn failures(&self) -> u32 {
        self.state.lock().failures
    }

    pub fn is_open(&self) -> bool {
        let state = self.state.lock();
        state.failures >= self.threshold
            && state
                .last_failure
                .is_some_and(|at| at.elapsed() < self.cooldown)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}
