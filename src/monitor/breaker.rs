// src/monitor/breaker.rs
// Per-dependency circuit breaker gating outbound calls. Tracks consecutive
// classified failures and fails fast while a dependency is down.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::BreakerConfig;

/// Externally visible breaker phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerPhase {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
enum State {
    /// Normal operation — counting consecutive failures
    Closed { consecutive: u32 },
    /// Tripped — all calls rejected until the reset timeout elapses
    Open { since: Instant },
    /// Reset timeout elapsed — a bounded number of trial calls may pass
    HalfOpen { permits: u32 },
}

impl Default for State {
    fn default() -> Self {
        Self::Closed { consecutive: 0 }
    }
}

/// Thread-safe breaker keyed by dependency name
pub struct CircuitBreaker {
    config: BreakerConfig,
    states: Mutex<HashMap<String, State>>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            states: Mutex::new(HashMap::new()),
        }
    }

    fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.config.reset_timeout_secs)
    }

    /// Whether a call to the dependency may proceed. An open circuit
    /// transitions to half-open once the reset timeout has elapsed,
    /// admitting up to the configured number of trial calls.
    pub fn check(&self, service: &str) -> bool {
        let Ok(mut states) = self.states.lock() else {
            return true;
        };
        let state = states.entry(service.to_string()).or_default();

        match state {
            State::Closed { .. } => true,
            State::Open { since } => {
                if since.elapsed() >= self.reset_timeout() {
                    info!(service, "Circuit half-open, admitting trial call");
                    let permits = self.config.half_open_trials.saturating_sub(1);
                    *state = State::HalfOpen { permits };
                    true
                } else {
                    false
                }
            }
            State::HalfOpen { permits } => {
                if *permits > 0 {
                    *permits -= 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call — closes the circuit and clears the counter
    pub fn record_success(&self, service: &str) {
        let Ok(mut states) = self.states.lock() else {
            return;
        };
        let state = states.entry(service.to_string()).or_default();
        let was_half_open = matches!(state, State::HalfOpen { .. });
        *state = State::Closed { consecutive: 0 };
        if was_half_open {
            info!(service, "Circuit recovered (trial call succeeded)");
        }
    }

    /// Record a classified failure — may trip the circuit
    pub fn record_failure(&self, service: &str) {
        let Ok(mut states) = self.states.lock() else {
            return;
        };
        let state = states.entry(service.to_string()).or_default();

        match state {
            State::Closed { consecutive } => {
                *consecutive += 1;
                if *consecutive >= self.config.failure_threshold {
                    warn!(
                        service,
                        failures = *consecutive,
                        "Circuit tripped — failing fast for {}s",
                        self.config.reset_timeout_secs
                    );
                    *state = State::Open {
                        since: Instant::now(),
                    };
                }
            }
            State::HalfOpen { .. } => {
                warn!(service, "Trial call failed — circuit re-tripped");
                *state = State::Open {
                    since: Instant::now(),
                };
            }
            State::Open { .. } => {}
        }
    }

    /// Force the circuit open regardless of call outcomes. Used by the
    /// health monitor cascade when a service is reported unhealthy.
    pub fn force_open(&self, service: &str) {
        let Ok(mut states) = self.states.lock() else {
            return;
        };
        let state = states.entry(service.to_string()).or_default();
        if !matches!(state, State::Open { .. }) {
            warn!(service, "Circuit forced open by health monitor");
            *state = State::Open {
                since: Instant::now(),
            };
        }
    }

    pub fn phase(&self, service: &str) -> BreakerPhase {
        let Ok(mut states) = self.states.lock() else {
            return BreakerPhase::Closed;
        };
        match states.entry(service.to_string()).or_default() {
            State::Closed { .. } => BreakerPhase::Closed,
            State::Open { .. } => BreakerPhase::Open,
            State::HalfOpen { .. } => BreakerPhase::HalfOpen,
        }
    }

    #[cfg(test)]
    fn inject_open(&self, service: &str, since: Instant) {
        self.states
            .lock()
            .unwrap()
            .insert(service.to_string(), State::Open { since });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold: 5,
            reset_timeout_secs: 30,
            half_open_trials: 1,
        })
    }

    #[test]
    fn test_new_service_is_closed() {
        let cb = breaker();
        assert!(cb.check("vector"));
        assert_eq!(cb.phase("vector"), BreakerPhase::Closed);
    }

    #[test]
    fn test_threshold_failures_open_circuit() {
        let cb = breaker();
        for _ in 0..4 {
            cb.record_failure("graph");
            assert!(cb.check("graph"));
        }
        cb.record_failure("graph");
        assert!(!cb.check("graph"));
        assert_eq!(cb.phase("graph"), BreakerPhase::Open);
    }

    #[test]
    fn test_success_resets_counter() {
        let cb = breaker();
        for _ in 0..4 {
            cb.record_failure("graph");
        }
        cb.record_success("graph");
        cb.record_failure("graph");
        assert!(cb.check("graph"));
        assert_eq!(cb.phase("graph"), BreakerPhase::Closed);
    }

    #[test]
    fn test_open_blocks_until_reset_timeout() {
        let cb = breaker();
        cb.inject_open("vector", Instant::now());
        assert!(!cb.check("vector"));
    }

    #[test]
    fn test_open_transitions_to_half_open_after_timeout() {
        let cb = breaker();
        cb.inject_open(
            "vector",
            Instant::now() - Duration::from_secs(31),
        );
        // First check passes as the half-open trial
        assert!(cb.check("vector"));
        // Trial budget of one is exhausted
        assert!(!cb.check("vector"));
    }

    #[test]
    fn test_half_open_success_closes() {
        let cb = breaker();
        cb.inject_open("cache", Instant::now() - Duration::from_secs(31));
        assert!(cb.check("cache"));
        cb.record_success("cache");
        assert_eq!(cb.phase("cache"), BreakerPhase::Closed);
        assert!(cb.check("cache"));
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = breaker();
        cb.inject_open("cache", Instant::now() - Duration::from_secs(31));
        assert!(cb.check("cache"));
        cb.record_failure("cache");
        assert_eq!(cb.phase("cache"), BreakerPhase::Open);
        assert!(!cb.check("cache"));
    }

    #[test]
    fn test_force_open_overrides_closed() {
        let cb = breaker();
        assert!(cb.check("graph"));
        cb.force_open("graph");
        assert!(!cb.check("graph"));
    }

    #[test]
    fn test_independent_services() {
        let cb = breaker();
        for _ in 0..5 {
            cb.record_failure("graph");
        }
        assert!(!cb.check("graph"));
        assert!(cb.check("vector"));
    }
}
