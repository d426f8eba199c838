// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery state machine.
//!
//! ```text
//! dispatch -> POST -> Delivered            (api)
//!                  -> DeliveredAndStored   (dual)
//!          -> POST fails -> Fallback       (retries exhausted, circuit open, rejected)
//!          -> store -> Stored              (file)
//! any write failure without a delivered copy -> Failed
//! ```

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::delivery_mode::DeliveryMode;
use crate::delivery::payload::{build_payload, DeliveryPayload};
use crate::delivery::signer::{Claims, TokenSigner};
use crate::delivery::storage::FileStorage;
use crate::delivery::{AttemptOutcome, DeliveryAttempt, DeliveryConfig, DeliveryState, DeliveryTarget};
use crate::error::{HttpError, RelayError};
use crate::http::{check_response, target_of};
use crate::model::PipelineRun;
use crate::reliability::{CallError, Reliability};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub state: DeliveryState,
    pub attempts: Vec<DeliveryAttempt>,
}

#[derive(Clone)]
pub struct DeliveryDispatcher {
    config: DeliveryConfig,
    client: reqwest::Client,
    reliability: Reliability,
    signer: Option<Arc<dyn TokenSigner>>,
    storage: FileStorage,
}

impl std::fmt::Debug for DeliveryDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryDispatcher")
            .field("config", &self.config)
            .field("signer", &self.signer.is_some())
            .finish_non_exhaustive()
    }
}

impl DeliveryDispatcher {
    #[must_use]
    pub fn new(
        config: DeliveryConfig,
        client: reqwest::Client,
        reliability: Reliability,
        signer: Option<Arc<dyn TokenSigner>>,
    ) -> Self {
        let storage = FileStorage::new(config.storage_dir.clone());
        Self {
            config,
            client,
            reliability,
            signer,
            storage,
        }
    }

    #[must_use]
    pub fn storage(&self) -> &FileStorage {
        &self.storage
    }

    pub async fn dispatch(&self, run: &PipelineRun) -> DeliveryReport {
        let payload = build_payload(run, self.config.max_error_lines);
        let mut attempts = Vec::with_capacity(2);

        if self.config.mode == DeliveryMode::File {
            let state = match self.store(run, &payload, &mut attempts, AttemptOutcome::Success).await {
                Ok(path) => DeliveryState::Stored { path },
                Err(e) => failed(run, &e),
            };
            return DeliveryReport { state, attempts };
        }

        let started = Instant::now();
        let (result, tries) = self.post(run, &payload).await;
        attempts.push(DeliveryAttempt {
            target: DeliveryTarget::Api,
            outcome: if result.is_ok() {
                AttemptOutcome::Success
            } else {
                AttemptOutcome::Failure
            },
            latency: started.elapsed(),
            retries: tries.saturating_sub(1),
        });

        let state = match result {
            Ok(()) => {
                info!(
                    run_id = %run.run_id,
                    attempt = tries,
                    "DELIVERY | Delivered to analysis API"
                );
                if self.config.mode == DeliveryMode::Dual {
                    match self.store(run, &payload, &mut attempts, AttemptOutcome::Success).await {
                        Ok(path) => DeliveryState::DeliveredAndStored { path },
                        Err(e) => {
                            error!(
                                run_id = %run.run_id,
                                "DELIVERY | Delivered but failed to store copy: {}",
                                e
                            );
                            DeliveryState::Delivered
                        }
                    }
                } else {
                    DeliveryState::Delivered
                }
            }
            Err(reason) => {
                warn!(
                    run_id = %run.run_id,
                    attempt = tries,
                    "DELIVERY | API delivery failed, falling back to storage: {}",
                    reason
                );
                match self.store(run, &payload, &mut attempts, AttemptOutcome::Fallback).await {
                    Ok(path) => {
                        info!(
                            run_id = %run.run_id,
                            path = %path.display(),
                            "DELIVERY | Run stored as fallback"
                        );
                        DeliveryState::Fallback { path, reason }
                    }
                    Err(e) => failed(run, &e),
                }
            }
        };

        DeliveryReport { state, attempts }
    }

    /// Posts the payload, returning the failure reason and how many requests were made.
    async fn post(&self, run: &PipelineRun, payload: &DeliveryPayload) -> (Result<(), String>, u32) {
        let Some(url) = self.config.url.as_deref().filter(|u| !u.is_empty()) else {
            return (Err("no delivery URL configured".to_string()), 0);
        };

        let token = match &self.signer {
            Some(signer) => match signer.sign(&Claims::for_run(run, url, chrono::Utc::now().timestamp())) {
                Ok(token) => Some(token),
                Err(e) => return (Err(e.to_string()), 0),
            },
            None => None,
        };

        let target = target_of(url);
        let (result, tries) = self
            .reliability
            .call_counted(&target, || {
                let mut request = self.client.post(url).json(payload);
                if let Some(token) = &token {
                    request = request.bearer_auth(token);
                }
                async move {
                    let response = request.send().await.map_err(HttpError::from)?;
                    check_response(response).await.map(|_| ())
                }
            })
            .await;

        let result = result.map_err(|e| match e {
            CallError::CircuitOpen { target } => RelayError::CircuitOpen { target }.to_string(),
            other => RelayError::DeliveryFailure(other.to_string()).to_string(),
        });
        (result, tries)
    }

    async fn store(
        &self,
        run: &PipelineRun,
        payload: &DeliveryPayload,
        attempts: &mut Vec<DeliveryAttempt>,
        outcome: AttemptOutcome,
    ) -> Result<std::path::PathBuf, RelayError> {
        let started = Instant::now();
        let result = self.storage.store(run, payload, self.config.mode).await;
        attempts.push(DeliveryAttempt {
            target: DeliveryTarget::File,
            outcome: if result.is_ok() {
                outcome
            } else {
                AttemptOutcome::Failure
            },
            latency: started.elapsed(),
            retries: 0,
        });
        result
    }
}

fn failed(run: &PipelineRun, e: &RelayError) -> DeliveryState {
    error!(run_id = %run.run_id, "DELIVERY | Run could not be delivered nor stored: {}", e);
    DeliveryState::Failed {
        reason: e.to_string(),
    }
}
