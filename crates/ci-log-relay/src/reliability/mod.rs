// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Retry and circuit breaking for every outbound call.
//!
//! [`Reliability::call`] checks the target's breaker before each attempt, retries retriable
//! failures with exponential backoff and reports the outcome back to the breaker.
//! Non-retriable failures prove the target is reachable and count as a success for the
//! breaker.

pub mod circuit;
pub mod retry;

use core::time::Duration;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Retriable;
use crate::reliability::circuit::{Admission, CircuitBreaker, CircuitRegistry};
use crate::reliability::retry::RetryPolicy;

/// Re-opens the breaker if a trial call is dropped before it reports an outcome.
struct TrialGuard<'a> {
    breaker: Option<&'a CircuitBreaker>,
}

impl TrialGuard<'_> {
    fn settle(mut self) {
        self.breaker = None;
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if let Some(breaker) = self.breaker {
            breaker.abandon_trial();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReliabilityConfig {
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay: Duration::from_millis(1_000),
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CallError<E> {
    /// The breaker rejected the call; no request was made.
    #[error("circuit open for {target}")]
    CircuitOpen { target: String },
    /// Every attempt failed with a retriable error.
    #[error("gave up after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },
    /// The target answered with a failure not worth retrying.
    #[error("{0}")]
    Rejected(E),
}

impl<E> CallError<E> {
    /// The underlying error of the last attempt, if a request was made.
    pub fn into_inner(self) -> Option<E> {
        match self {
            CallError::CircuitOpen { .. } => None,
            CallError::Exhausted { source, .. } | CallError::Rejected(source) => Some(source),
        }
    }

    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CallError::CircuitOpen { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Reliability {
    policy: RetryPolicy,
    failure_threshold: u32,
    cooldown: Duration,
    registry: Arc<CircuitRegistry>,
}

impl Reliability {
    /// Uses the process-wide breaker registry.
    #[must_use]
    pub fn new(config: &ReliabilityConfig) -> Self {
        Self::with_registry(config, CircuitRegistry::global())
    }

    #[must_use]
    pub fn with_registry(config: &ReliabilityConfig, registry: Arc<CircuitRegistry>) -> Self {
        Self {
            policy: RetryPolicy {
                attempts: config.retry_attempts.max(1),
                base_delay: config.retry_delay,
            },
            failure_threshold: config.failure_threshold,
            cooldown: config.cooldown,
            registry,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<CircuitRegistry> {
        &self.registry
    }

    pub async fn call<T, E, F, Fut>(&self, target: &str, op: F) -> Result<T, CallError<E>>
    where
        E: Retriable + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_counted(target, op).await.0
    }

    /// Like [`Reliability::call`], also returning how many attempts reached the target.
    pub async fn call_counted<T, E, F, Fut>(
        &self,
        target: &str,
        mut op: F,
    ) -> (Result<T, CallError<E>>, u32)
    where
        E: Retriable + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let breaker = self
            .registry
            .breaker(target, self.failure_threshold, self.cooldown);
        let mut attempts = 0;

        loop {
            let admission = breaker.try_acquire();
            if admission == Admission::Rejected {
                debug!(endpoint = target, attempt = attempts + 1, "RELIABILITY | Circuit open, call rejected");
                return (
                    Err(CallError::CircuitOpen {
                        target: target.to_string(),
                    }),
                    attempts,
                );
            }

            attempts += 1;
            let trial = TrialGuard {
                breaker: (admission == Admission::Trial).then_some(&*breaker),
            };
            let outcome = op().await;
            trial.settle();
            match outcome {
                Ok(value) => {
                    breaker.record_success();
                    return (Ok(value), attempts);
                }
                Err(e) if !e.is_retriable() => {
                    breaker.record_success();
                    debug!(endpoint = target, attempt = attempts, "RELIABILITY | Non-retriable failure: {}", e);
                    return (Err(CallError::Rejected(e)), attempts);
                }
                Err(e) => {
                    breaker.record_failure();
                    if attempts >= self.policy.attempts {
                        warn!(
                            endpoint = target,
                            attempt = attempts,
                            "RELIABILITY | Giving up after {} attempts: {}",
                            attempts,
                            e
                        );
                        return (Err(CallError::Exhausted { attempts, source: e }), attempts);
                    }
                    let delay = self.policy.delay_for(attempts);
                    warn!(
                        endpoint = target,
                        attempt = attempts,
                        backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "RELIABILITY | Retriable failure: {}",
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::HttpError;
    use crate::reliability::circuit::CircuitState;

    fn reliability(attempts: u32, threshold: u32) -> Reliability {
        Reliability::with_registry(
            &ReliabilityConfig {
                retry_attempts: attempts,
                retry_delay: Duration::from_millis(100),
                failure_threshold: threshold,
                cooldown: Duration::from_secs(60),
            },
            Arc::new(CircuitRegistry::new()),
        )
    }

    fn server_error() -> HttpError {
        HttpError::Status {
            status: 500,
            body: String::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let reliability = reliability(3, 5);
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let (result, attempts) = reliability
            .call_counted("api.example.com", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(server_error())
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.expect("should succeed"), "done");
        assert_eq!(attempts, 3);
        // 100ms + 200ms of backoff
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(
            reliability.registry().state_of("api.example.com"),
            Some(CircuitState::Closed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_last_error() {
        let reliability = reliability(3, 10);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = reliability
            .call("api.example.com", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(server_error())
            })
            .await;

        assert!(matches!(
            result,
            Err(CallError::Exhausted { attempts: 3, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retriable_fails_fast_and_counts_as_success() {
        let reliability = reliability(3, 1);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = reliability
            .call("api.example.com", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(HttpError::Status {
                    status: 404,
                    body: String::new(),
                })
            })
            .await;

        assert!(matches!(result, Err(CallError::Rejected(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            reliability.registry().state_of("api.example.com"),
            Some(CircuitState::Closed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_makes_no_calls() {
        let reliability = reliability(1, 2);
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let _: Result<(), _> = reliability
                .call("flaky.example.com", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(HttpError::Transport("connection refused".into()))
                })
                .await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        for _ in 0..5 {
            let (result, attempts): (Result<(), CallError<HttpError>>, _) = reliability
                .call_counted("flaky.example.com", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await;
            assert!(result.is_err_and(|e| e.is_circuit_open()));
            assert_eq!(attempts, 0);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_secs(60)).await;
        let result: Result<(), CallError<HttpError>> = reliability
            .call("flaky.example.com", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opening_mid_retry_stops_the_loop() {
        let reliability = reliability(5, 2);
        let calls = AtomicU32::new(0);

        let (result, attempts): (Result<(), CallError<HttpError>>, _) = reliability
            .call_counted("api.example.com", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(HttpError::Timeout("slow".into()))
            })
            .await;

        assert!(result.is_err_and(|e| e.is_circuit_open()));
        assert_eq!(attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_trial_does_not_wedge_the_breaker() {
        let reliability = reliability(1, 1);
        let _: Result<(), _> = reliability
            .call("stalled.example.com", || async {
                Err(HttpError::Transport("connection reset".into()))
            })
            .await;
        tokio::time::advance(Duration::from_secs(61)).await;

        let trial = tokio::time::timeout(
            Duration::from_secs(1),
            reliability.call("stalled.example.com", || {
                futures::future::pending::<Result<(), HttpError>>()
            }),
        )
        .await;
        assert!(trial.is_err(), "trial call should have timed out");
        assert_eq!(
            reliability.registry().state_of("stalled.example.com"),
            Some(CircuitState::Open)
        );

        let rejected: Result<(), CallError<HttpError>> = reliability
            .call("stalled.example.com", || async { Ok(()) })
            .await;
        assert!(rejected.is_err_and(|e| e.is_circuit_open()));

        tokio::time::advance(Duration::from_secs(60)).await;
        let recovered: Result<(), CallError<HttpError>> = reliability
            .call("stalled.example.com", || async { Ok(()) })
            .await;
        assert!(recovered.is_ok());
        assert_eq!(
            reliability.registry().state_of("stalled.example.com"),
            Some(CircuitState::Closed)
        );
    }

    #[test]
    fn test_into_inner() {
        let open: CallError<HttpError> = CallError::CircuitOpen {
            target: "x".into(),
        };
        assert!(open.into_inner().is_none());
        let rejected = CallError::Rejected(HttpError::Decode("bad".into()));
        assert_eq!(rejected.into_inner(), Some(HttpError::Decode("bad".into())));
    }
}
