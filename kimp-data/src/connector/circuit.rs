//! Reconnect circuit breaker & backoff.
//!
//! # States
//!
//! - **Closed**: connection attempts proceed, with exponential [`Backoff`] between them.
//! - **Open**: no attempts until the cooldown elapses.
//! - **HalfOpen**: exactly one attempt is in flight. Success closes the circuit, failure
//!   re-opens it for another cooldown.
//!
//! The breaker is a plain state machine driven by explicit `now` instants, so the
//! streaming task owns it without locking and tests drive it without sleeping.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    time::{Duration, Instant},
};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl Display for CircuitState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for a [`CircuitBreaker`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Time the circuit stays open after reaching the failure threshold.
    pub cooldown: Duration,
    /// Time the circuit stays open after a regional / legal block.
    pub block_cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(5 * 60),
            block_cooldown: Duration::from_secs(30 * 60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_block_cooldown(mut self, cooldown: Duration) -> Self {
        self.block_cooldown = cooldown;
        self
    }
}

/// Outcome of asking the [`CircuitBreaker`] for permission to connect.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Permit {
    /// Attempt now.
    Granted,
    /// No attempt before the provided instant.
    Denied { retry_at: Instant },
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            open_until: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn open_until(&self) -> Option<Instant> {
        self.open_until
    }

    /// Ask for permission to make one connection attempt.
    ///
    /// Once an open circuit's cooldown has elapsed, exactly one [`Permit::Granted`] is
    /// returned (the circuit moves to [`CircuitState::HalfOpen`]) until the outcome of that
    /// attempt is recorded.
    pub fn try_acquire(&mut self, now: Instant) -> Permit {
        match self.state {
            CircuitState::Closed => Permit::Granted,
            CircuitState::Open => match self.open_until {
                Some(retry_at) if now < retry_at => Permit::Denied { retry_at },
                _ => {
                    self.state = CircuitState::HalfOpen;
                    Permit::Granted
                }
            },
            CircuitState::HalfOpen => Permit::Denied {
                retry_at: self.open_until.unwrap_or(now) + self.config.cooldown,
            },
        }
    }

    /// Record a successful connection: close the circuit & reset the failure count.
    pub fn record_success(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.open_until = None;
    }

    /// Record a failed connection attempt or an errored session.
    pub fn record_failure(&mut self, now: Instant) -> CircuitState {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if self.state == CircuitState::HalfOpen
            || self.consecutive_failures >= self.config.failure_threshold
        {
            self.open(now, self.config.cooldown);
        }

        self.state
    }

    /// Record a regional / legal block: trip immediately with the long cooldown.
    pub fn record_block(&mut self, now: Instant) -> CircuitState {
        self.consecutive_failures = self.consecutive_failures.max(self.config.failure_threshold);
        self.open(now, self.config.block_cooldown);
        self.state
    }

    fn open(&mut self, now: Instant, cooldown: Duration) {
        self.state = CircuitState::Open;
        self.open_until = Some(now + cooldown);
    }
}

/// Capped exponential reconnect backoff: `min(base * 2^failures, max)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(3),
            max: Duration::from_secs(30),
        }
    }
}

impl Backoff {
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        let factor = 2u32.checked_pow(consecutive_failures).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}
