//! Reconnect backoff
//!
//! Exponential backoff driven entirely by the caller's clock. Nothing here
//! sleeps; the forwarding loop asks [`Backoff::ready`] once per iteration.

use crate::BackoffError;
use std::time::{Duration, Instant};

/// Default first retry delay
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(2);

/// Default ceiling on the retry delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(120);

/// Default growth factor
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Exponential reconnect backoff
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    multiplier: f64,
    current: Duration,
    /// `None` means an attempt is allowed immediately
    next_attempt: Option<Instant>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_DELAY,
            max: DEFAULT_MAX_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
            current: DEFAULT_BASE_DELAY,
            next_attempt: None,
        }
    }
}

impl Backoff {
    /// Create a backoff policy
    pub fn new(base: Duration, max: Duration, multiplier: f64) -> Result<Self, BackoffError> {
        if base.is_zero() {
            return Err(BackoffError::ZeroBaseDelay);
        }
        if max < base {
            return Err(BackoffError::MaxBelowBase { base, max });
        }
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(BackoffError::InvalidMultiplier(multiplier));
        }

        Ok(Self {
            base,
            max,
            multiplier,
            current: base,
            next_attempt: None,
        })
    }

    /// Delay that the next failure will impose
    pub fn current_delay(&self) -> Duration {
        self.current
    }

    /// Whether an attempt may be made at `now`
    pub fn ready(&self, now: Instant) -> bool {
        self.next_attempt.map_or(true, |next| now >= next)
    }

    /// Record a failed attempt
    ///
    /// Returns the delay until the next allowed attempt.
    pub fn record_failure(&mut self, now: Instant) -> Duration {
        let delay = self.current;
        self.next_attempt = Some(now + delay);

        let grown = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max);
        self.current = grown.min(self.max);

        delay
    }

    /// Record a successful attempt
    pub fn record_success(&mut self) {
        self.reset();
    }

    /// Return to the base delay and allow an attempt immediately
    pub fn reset(&mut self) {
        self.current = self.base;
        self.next_attempt = None;
    }
}
