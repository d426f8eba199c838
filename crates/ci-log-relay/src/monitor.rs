// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-run outcome reporting.

use std::fmt;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::delivery::{DeliveryAttempt, DeliveryState};
use crate::filter::Predicate;
use crate::model::{PipelineRun, Platform, RunStatus};

/// How a submitted event ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The run went through delivery.
    Dispatched(DeliveryState),
    /// The filter dropped the run without anything to record.
    Filtered(Option<Predicate>),
    /// The payload never became a run.
    Rejected { reason: String },
    /// Processing was cut short by the run timeout or a shutdown.
    Failed { reason: String },
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Dispatched(state) => write!(f, "{state}"),
            RunOutcome::Filtered(Some(predicate)) => write!(f, "filtered by {predicate}"),
            RunOutcome::Filtered(None) => f.write_str("filtered"),
            RunOutcome::Rejected { reason } => write!(f, "rejected: {reason}"),
            RunOutcome::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnitCounts {
    pub selected: usize,
    pub skipped: usize,
    pub fetched: usize,
    pub fetch_failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub platform: Platform,
    /// Empty when the payload was rejected before a run id could be read.
    pub run_id: String,
    pub project: String,
    pub run_status: Option<RunStatus>,
    pub units: UnitCounts,
    pub outcome: RunOutcome,
    pub attempts: Vec<DeliveryAttempt>,
}

impl RunReport {
    #[must_use]
    pub fn for_run(run: &PipelineRun, units: UnitCounts, outcome: RunOutcome) -> Self {
        Self {
            platform: run.platform,
            run_id: run.run_id.clone(),
            project: run.project.path.clone(),
            run_status: Some(run.status),
            units,
            outcome,
            attempts: Vec::new(),
        }
    }

    #[must_use]
    pub fn rejected(platform: Platform, reason: impl Into<String>) -> Self {
        Self {
            platform,
            run_id: String::new(),
            project: String::new(),
            run_status: None,
            units: UnitCounts::default(),
            outcome: RunOutcome::Rejected {
                reason: reason.into(),
            },
            attempts: Vec::new(),
        }
    }

    #[must_use]
    pub fn failed(platform: Platform, reason: impl Into<String>) -> Self {
        Self {
            outcome: RunOutcome::Failed {
                reason: reason.into(),
            },
            ..Self::rejected(platform, String::new())
        }
    }

    #[must_use]
    pub fn delivery_state(&self) -> Option<&DeliveryState> {
        match &self.outcome {
            RunOutcome::Dispatched(state) => Some(state),
            _ => None,
        }
    }
}

/// Receives one report per submitted event.
pub trait RunMonitor: Send + Sync {
    fn record(&self, report: &RunReport);
}

/// Logs each report; failures at error level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMonitor;

impl RunMonitor for TracingMonitor {
    fn record(&self, report: &RunReport) {
        let retries: u32 = report.attempts.iter().map(|a| a.retries).sum();
        match &report.outcome {
            RunOutcome::Dispatched(DeliveryState::Failed { .. }) | RunOutcome::Failed { .. } => {
                error!(
                    platform = %report.platform,
                    run_id = %report.run_id,
                    project = %report.project,
                    selected = report.units.selected,
                    fetch_failed = report.units.fetch_failed,
                    "MONITOR | Run {}",
                    report.outcome
                );
            }
            RunOutcome::Rejected { .. } => {
                warn!(platform = %report.platform, "MONITOR | Event {}", report.outcome);
            }
            _ => {
                info!(
                    platform = %report.platform,
                    run_id = %report.run_id,
                    project = %report.project,
                    selected = report.units.selected,
                    skipped = report.units.skipped,
                    fetched = report.units.fetched,
                    fetch_failed = report.units.fetch_failed,
                    retries,
                    "MONITOR | Run {}",
                    report.outcome
                );
            }
        }
    }
}
