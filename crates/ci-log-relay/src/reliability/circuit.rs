// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-target circuit breakers.
//!
//! A breaker opens after `threshold` consecutive failures and rejects every call for
//! `cooldown`. The first call after the cooldown is a trial: it closes the breaker on
//! success and re-opens it on failure. Concurrent calls are rejected while the trial is in
//! flight. A trial dropped before its outcome is known re-opens the breaker for another
//! cooldown.

use core::time::Duration;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Whether a call may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// The single call allowed through a half-open breaker.
    Trial,
    Rejected,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    target: String,
    threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(target: impl Into<String>, threshold: u32, cooldown: Duration) -> Self {
        Self {
            target: target.into(),
            threshold: threshold.max(1),
            cooldown,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                last_failure: None,
                trial_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    #[must_use]
    pub fn last_failure(&self) -> Option<Instant> {
        self.lock().last_failure
    }

    pub fn try_acquire(&self) -> Admission {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let cooled_down = inner
                    .opened_at
                    .map_or(true, |opened| opened.elapsed() >= self.cooldown);
                if cooled_down {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    info!(endpoint = %self.target, "CIRCUIT | Half-open, allowing one trial call");
                    Admission::Trial
                } else {
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Admission::Rejected
                } else {
                    inner.trial_in_flight = true;
                    Admission::Trial
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            info!(endpoint = %self.target, "CIRCUIT | Closed after successful trial");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        let now = Instant::now();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure = Some(now);
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.trial_in_flight = false;
                warn!(
                    endpoint = %self.target,
                    cooldown_secs = self.cooldown.as_secs(),
                    "CIRCUIT | Trial call failed, re-opening"
                );
            }
            CircuitState::Closed if inner.consecutive_failures >= self.threshold => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                warn!(
                    endpoint = %self.target,
                    failures = inner.consecutive_failures,
                    cooldown_secs = self.cooldown.as_secs(),
                    "CIRCUIT | Opened after consecutive failures"
                );
            }
            CircuitState::Closed => {}
            CircuitState::Open => {
                inner.opened_at = Some(now);
            }
        }
    }

    /// Gives up a trial whose call never completed.
    pub fn abandon_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen && inner.trial_in_flight {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.trial_in_flight = false;
            warn!(
                endpoint = %self.target,
                cooldown_secs = self.cooldown.as_secs(),
                "CIRCUIT | Trial call abandoned, re-opening"
            );
        }
    }
}

/// Breakers keyed by target identity, shared by every run in the process.
#[derive(Debug, Default)]
pub struct CircuitRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> Arc<CircuitRegistry> {
        static REGISTRY: OnceLock<Arc<CircuitRegistry>> = OnceLock::new();
        Arc::clone(REGISTRY.get_or_init(|| Arc::new(CircuitRegistry::new())))
    }

    /// Returns the breaker for `target`, creating it with the given settings on first use.
    pub fn breaker(&self, target: &str, threshold: u32, cooldown: Duration) -> Arc<CircuitBreaker> {
        let mut breakers = match self.breakers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(
            breakers
                .entry(target.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(target, threshold, cooldown))),
        )
    }

    #[must_use]
    pub fn state_of(&self, target: &str) -> Option<CircuitState> {
        let breakers = match self.breakers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        breakers.get(target).map(|breaker| breaker.state())
    }
}
