//! Circuit breaker to stop hammering a failing provider.
//!
//! Each provider has its own circuit. After `failure_threshold` consecutive
//! failures the circuit opens and calls are rejected without being made.
//! Once `reset_timeout` has passed, exactly one trial call is let through:
//! success closes the circuit, failure reopens it and restarts the timer.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use veritas_core::ProviderId;

use crate::config::duration_str;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,

    /// Time before a trial call is allowed
    #[serde(with = "duration_str")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// State of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation
    Closed,

    /// Calls are rejected
    Open { opened_at: Instant },

    /// One trial call decides whether to close
    HalfOpen { trial_in_flight: bool },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("circuit open for {provider}, retry in {retry_in:?}")]
pub struct CircuitOpenError {
    pub provider: ProviderId,
    pub retry_in: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<Instant>,
}

impl Default for CircuitSnapshot {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
        }
    }
}

pub struct CircuitBreaker {
    circuits: RwLock<HashMap<ProviderId, CircuitSnapshot>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            circuits: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Ask for permission to call `provider`.
    ///
    /// A granted half-open trial must be followed by `record_success`,
    /// `record_failure` or `release`.
    pub fn try_acquire(&self, provider: ProviderId) -> Result<(), CircuitOpenError> {
        let mut circuits = self.circuits.write();
        let circuit = circuits.entry(provider).or_default();

        match circuit.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open { opened_at } => {
                let elapsed = opened_at.elapsed();
                if elapsed >= self.config.reset_timeout {
                    circuit.state = CircuitState::HalfOpen {
                        trial_in_flight: true,
                    };
                    tracing::info!(provider = %provider, "Circuit half-open, allowing trial call");
                    Ok(())
                } else {
                    Err(CircuitOpenError {
                        provider,
                        retry_in: self.config.reset_timeout - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen {
                trial_in_flight: true,
            } => Err(CircuitOpenError {
                provider,
                retry_in: Duration::ZERO,
            }),
            CircuitState::HalfOpen {
                trial_in_flight: false,
            } => {
                circuit.state = CircuitState::HalfOpen {
                    trial_in_flight: true,
                };
                Ok(())
            }
        }
    }

    pub fn record_success(&self, provider: ProviderId) {
        let mut circuits = self.circuits.write();
        let circuit = circuits.entry(provider).or_default();
        if circuit.state != CircuitState::Closed {
            tracing::info!(provider = %provider, "Circuit closed after successful trial");
        }
        circuit.state = CircuitState::Closed;
        circuit.consecutive_failures = 0;
    }

    pub fn record_failure(&self, provider: ProviderId) {
        let mut circuits = self.circuits.write();
        let circuit = circuits.entry(provider).or_default();
        let now = Instant::now();
        circuit.consecutive_failures += 1;
        circuit.last_failure_at = Some(now);

        match circuit.state {
            CircuitState::Closed => {
                if circuit.consecutive_failures >= self.config.failure_threshold {
                    circuit.state = CircuitState::Open { opened_at: now };
                    tracing::warn!(
                        provider = %provider,
                        failures = circuit.consecutive_failures,
                        "Circuit opened after repeated failures"
                    );
                }
            }
            CircuitState::HalfOpen { .. } => {
                circuit.state = CircuitState::Open { opened_at: now };
                tracing::warn!(provider = %provider, "Circuit reopened after failed trial");
            }
            CircuitState::Open { .. } => {}
        }
    }

    /// Give back a half-open trial that was acquired but not used.
    pub fn release(&self, provider: ProviderId) {
        let mut circuits = self.circuits.write();
        if let Some(circuit) = circuits.get_mut(&provider) {
            if circuit.state
                == (CircuitState::HalfOpen {
                    trial_in_flight: true,
                })
            {
                circuit.state = CircuitState::HalfOpen {
                    trial_in_flight: false,
                };
            }
        }
    }

    /// Whether calls to `provider` are currently rejected outright.
    pub fn is_open(&self, provider: ProviderId) -> bool {
        match self.snapshot(provider).state {
            CircuitState::Open { opened_at } => opened_at.elapsed() < self.config.reset_timeout,
            CircuitState::HalfOpen { trial_in_flight } => trial_in_flight,
            CircuitState::Closed => false,
        }
    }

    pub fn snapshot(&self, provider: ProviderId) -> CircuitSnapshot {
        self.circuits
            .read()
            .get(&provider)
            .copied()
            .unwrap_or_default()
    }

    /// Reset all circuits to closed.
    pub fn reset(&self) {
        self.circuits.write().clear();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
