// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Compact delivery payload.

use serde::Serialize;

use crate::model::{PipelineRun, Platform, RunStatus, UnitLog};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryPayload {
    pub source: Platform,
    pub repository: String,
    pub branch: Option<String>,
    pub commit_sha: Option<String>,
    pub pipeline_id: String,
    pub pipeline_url: Option<String>,
    pub status: RunStatus,
    pub triggered_by: String,
    pub steps: Vec<String>,
    pub failed_steps: Vec<FailedStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedStep {
    pub step_name: String,
    pub error_lines: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub log_unavailable: bool,
}

/// Builds the payload from a processed run. Pure.
#[must_use]
pub fn build_payload(run: &PipelineRun, max_error_lines: usize) -> DeliveryPayload {
    let leaves = run.leaves();
    let failed_steps = leaves
        .iter()
        .filter(|unit| unit.status.is_failure())
        .map(|unit| FailedStep {
            step_name: unit.name.clone(),
            error_lines: unit
                .errors
                .iter()
                .flat_map(|section| section.lines.iter().cloned())
                .take(max_error_lines)
                .collect(),
            log_unavailable: matches!(unit.log, UnitLog::FetchFailed { .. }),
        })
        .collect();

    DeliveryPayload {
        source: run.platform,
        repository: run.project.path.clone(),
        branch: run.branch.clone(),
        commit_sha: run.revision.clone(),
        pipeline_id: run.run_id.clone(),
        pipeline_url: run.url.clone(),
        status: run.status,
        triggered_by: run.triggered_by.clone(),
        steps: leaves.iter().map(|unit| unit.name.clone()).collect(),
        failed_steps,
    }
}
