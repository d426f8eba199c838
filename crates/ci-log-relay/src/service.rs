// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Background relay service.
//!
//! Submitting an event only queues it; a worker task spawns one task per run, each bounded
//! by the run timeout and a cancellation token derived from the service's.

use core::time::Duration;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ConfigError};
use crate::event::CiEvent;
use crate::monitor::{RunMonitor, RunReport};
use crate::processor::{Collaborators, RunProcessor};

/// Events accepted but not yet picked up by the worker.
const QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("relay queue is full")]
    QueueFull,
    #[error("relay service is shut down")]
    Closed,
}

#[derive(Debug)]
pub struct RelayService;

impl RelayService {
    /// Spawns the worker. Must be called within a Tokio runtime.
    pub fn start(config: &Config, collaborators: Collaborators) -> Result<RelayHandle, ConfigError> {
        let processor = Arc::new(RunProcessor::new(config, &collaborators)?);
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        let cancel = CancellationToken::new();

        let worker = tokio::spawn(run_worker(
            receiver,
            processor,
            Arc::clone(&collaborators.monitor),
            config.run_timeout,
            cancel.clone(),
        ));
        info!("RELAY | Service started");

        Ok(RelayHandle {
            sender,
            cancel,
            worker,
        })
    }
}

#[derive(Debug)]
pub struct RelayHandle {
    sender: mpsc::Sender<CiEvent>,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
}

impl RelayHandle {
    /// Queues an event, waiting while the queue is full.
    pub async fn submit(&self, event: CiEvent) -> Result<(), SubmitError> {
        self.sender.send(event).await.map_err(|_| SubmitError::Closed)
    }

    /// Queues an event without waiting.
    pub fn try_submit(&self, event: CiEvent) -> Result<(), SubmitError> {
        self.sender.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SubmitError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SubmitError::Closed,
        })
    }

    /// Stops intake and waits up to `grace` for queued and in-flight runs. Runs still going
    /// after that are cancelled and reported as failed.
    pub async fn shutdown(self, grace: Duration) {
        let RelayHandle {
            sender,
            cancel,
            mut worker,
        } = self;
        drop(sender);

        if tokio::time::timeout(grace, &mut worker).await.is_err() {
            warn!(
                grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                "RELAY | Grace period elapsed, cancelling in-flight runs"
            );
            cancel.cancel();
            if let Err(e) = worker.await {
                error!("RELAY | Worker task failed: {}", e);
            }
        }
        info!("RELAY | Service stopped");
    }
}

async fn run_worker(
    mut receiver: mpsc::Receiver<CiEvent>,
    processor: Arc<RunProcessor>,
    monitor: Arc<dyn RunMonitor>,
    run_timeout: Duration,
    cancel: CancellationToken,
) {
    let mut runs = JoinSet::new();

    loop {
        tokio::select! {
            event = receiver.recv() => match event {
                Some(event) => {
                    debug!(platform = %event.platform, in_flight = runs.len(), "RELAY | Event received");
                    runs.spawn(run_task(
                        event,
                        Arc::clone(&processor),
                        Arc::clone(&monitor),
                        run_timeout,
                        cancel.child_token(),
                    ));
                }
                None => break,
            },
            Some(joined) = runs.join_next(), if !runs.is_empty() => {
                if let Err(e) = joined {
                    error!("RELAY | Run task failed: {}", e);
                }
            }
        }
    }

    while let Some(joined) = runs.join_next().await {
        if let Err(e) = joined {
            error!("RELAY | Run task failed: {}", e);
        }
    }
}

async fn run_task(
    event: CiEvent,
    processor: Arc<RunProcessor>,
    monitor: Arc<dyn RunMonitor>,
    run_timeout: Duration,
    cancel: CancellationToken,
) {
    let platform = event.platform;
    let report = tokio::select! {
        () = cancel.cancelled() => RunReport::failed(platform, "cancelled by shutdown"),
        result = tokio::time::timeout(run_timeout, processor.process(&event)) => match result {
            Ok(report) => report,
            Err(_) => RunReport::failed(
                platform,
                format!("run timed out after {}s", run_timeout.as_secs()),
            ),
        },
    };
    monitor.record(&report);
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::config::delivery_mode::DeliveryMode;
    use crate::error::HttpError;
    use crate::model::{Platform, UnitRef};
    use crate::monitor::RunOutcome;
    use crate::reliability::circuit::CircuitRegistry;
    use crate::retriever::{ByteStream, LogSource, TailRead};

    #[derive(Default)]
    struct Collecting(Mutex<Vec<RunReport>>);

    impl RunMonitor for Collecting {
        fn record(&self, report: &RunReport) {
            self.0.lock().expect("lock").push(report.clone());
        }
    }

    /// Never answers.
    struct Hanging;

    #[async_trait]
    impl LogSource for Hanging {
        fn target(&self, _unit: &UnitRef) -> String {
            "hanging".to_string()
        }

        async fn fetch_tail(&self, _unit: &UnitRef, _max_bytes: u64) -> Result<TailRead, HttpError> {
            futures::future::pending().await
        }

        async fn open_stream(&self, _unit: &UnitRef) -> Result<ByteStream, HttpError> {
            futures::future::pending().await
        }
    }

    fn hook() -> String {
        json!({
            "object_attributes": {"id": 1, "status": "failed"},
            "project": {"id": 2, "path_with_namespace": "group/app"},
            "builds": [{"id": 3, "stage": "test", "name": "test", "status": "failed"}]
        })
        .to_string()
    }

    fn start(
        dir: &std::path::Path,
        run_timeout: Duration,
        chunk_timeout: Duration,
    ) -> (RelayHandle, Arc<Collecting>) {
        let config = Config {
            delivery_mode: DeliveryMode::File,
            storage_dir: dir.to_path_buf(),
            run_timeout,
            chunk_timeout,
            retry_attempts: 1,
            ..Config::default()
        };
        let monitor = Arc::new(Collecting::default());
        let mut collaborators = Collaborators::from_config(&config);
        collaborators.circuits = Arc::new(CircuitRegistry::new());
        collaborators.log_sources = HashMap::from([(Platform::Gitlab, Arc::new(Hanging) as Arc<dyn LogSource>)]);
        collaborators.monitor = Arc::clone(&monitor) as Arc<dyn RunMonitor>;
        let handle = RelayService::start(&config, collaborators).expect("starts");
        (handle, monitor)
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_timeout_reports_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (handle, monitor) = start(dir.path(), Duration::from_secs(5), Duration::from_secs(3_600));

        handle
            .submit(CiEvent::new(Platform::Gitlab, hook()))
            .await
            .expect("queued");
        handle.shutdown(Duration::from_secs(60)).await;

        let reports = monitor.0.lock().expect("lock");
        assert_eq!(reports.len(), 1);
        assert_eq!(
            reports[0].outcome,
            RunOutcome::Failed {
                reason: "run timed out after 5s".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_after_grace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (handle, monitor) = start(dir.path(), Duration::from_secs(3_600), Duration::from_secs(3_600));

        handle
            .submit(CiEvent::new(Platform::Gitlab, hook()))
            .await
            .expect("queued");
        handle.shutdown(Duration::from_secs(1)).await;

        let reports = monitor.0.lock().expect("lock");
        assert_eq!(reports.len(), 1);
        assert_eq!(
            reports[0].outcome,
            RunOutcome::Failed {
                reason: "cancelled by shutdown".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_rejected_events_are_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (handle, monitor) = start(dir.path(), Duration::from_secs(5), Duration::from_secs(5));

        handle
            .try_submit(CiEvent::new(Platform::Jenkins, "not json"))
            .expect("queued");
        handle.shutdown(Duration::from_secs(5)).await;

        let reports = monitor.0.lock().expect("lock");
        assert!(matches!(reports[0].outcome, RunOutcome::Rejected { .. }));
    }
}
