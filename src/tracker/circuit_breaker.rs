//! Circuit breaker for the remote price store.
//!
//! After enough consecutive failures the remote is skipped for a cooldown
//! period, so offline writes stop paying the full timeout on every call.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Health state of the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Remote is healthy and is called normally
    Healthy,
    /// Remote has been failing but is still tried
    Degraded,
    /// Remote is skipped until the cooldown expires
    CoolingDown,
}

const WINDOW: usize = 50;
const MIN_SUCCESS_RATE: f64 = 0.3;
const RECOVERY_SUCCESS_RATE: f64 = 0.7;

/// Tracks remote health from the outcome of each call.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: BreakerState,
    consecutive_failures: u32,
    recent_attempts: VecDeque<bool>,
    cooldown_start: Option<Instant>,
    failure_threshold: u32,
    cooldown_duration: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown_duration: Duration) -> Self {
        Self {
            state: BreakerState::Healthy,
            consecutive_failures: 0,
            recent_attempts: VecDeque::with_capacity(WINDOW),
            cooldown_start: None,
            failure_threshold: failure_threshold.max(1),
            cooldown_duration,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Share of successful calls in the recent window. 1.0 with no history.
    pub fn success_rate(&self) -> f64 {
        if self.recent_attempts.is_empty() {
            return 1.0;
        }
        let successes = self.recent_attempts.iter().filter(|&&ok| ok).count();
        successes as f64 / self.recent_attempts.len() as f64
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.push_attempt(true);
        self.update_state();
        debug!(
            "Remote call succeeded, success rate {:.2}%",
            self.success_rate() * 100.0
        );
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        self.push_attempt(false);
        self.update_state();
        warn!(
            "Remote call failed: {} consecutive failures, {:.2}% success rate",
            self.consecutive_failures,
            self.success_rate() * 100.0
        );
    }

    /// Whether the remote should be called now.
    ///
    /// An expired cooldown moves the breaker to `Degraded` and lets one call through.
    pub fn is_available(&mut self) -> bool {
        match self.state {
            BreakerState::Healthy | BreakerState::Degraded => true,
            BreakerState::CoolingDown => match self.cooldown_start {
                Some(start) if start.elapsed() < self.cooldown_duration => false,
                _ => {
                    self.state = BreakerState::Degraded;
                    self.cooldown_start = None;
                    self.consecutive_failures = 0;
                    debug!("Remote cooldown expired, moving to degraded state");
                    true
                }
            },
        }
    }

    fn push_attempt(&mut self, ok: bool) {
        if self.recent_attempts.len() == WINDOW {
            self.recent_attempts.pop_front();
        }
        self.recent_attempts.push_back(ok);
    }

    fn update_state(&mut self) {
        match self.state {
            BreakerState::Healthy => {
                if self.consecutive_failures >= self.failure_threshold {
                    self.state = BreakerState::Degraded;
                    debug!(
                        "Remote degraded: {} consecutive failures",
                        self.consecutive_failures
                    );
                }
            }
            BreakerState::Degraded => {
                let window_full = self.recent_attempts.len() >= WINDOW;
                if self.consecutive_failures >= self.failure_threshold * 2
                    || (window_full && self.success_rate() < MIN_SUCCESS_RATE)
                {
                    self.state = BreakerState::CoolingDown;
                    self.cooldown_start = Some(Instant::now());
                    warn!(
                        "Remote entering cooldown for {:?} after {} failures",
                        self.cooldown_duration, self.consecutive_failures
                    );
                } else if self.consecutive_failures == 0
                    && self.success_rate() > RECOVERY_SUCCESS_RATE
                {
                    self.state = BreakerState::Healthy;
                    debug!("Remote recovered to healthy state");
                }
            }
            BreakerState::CoolingDown => {}
        }
    }
}
