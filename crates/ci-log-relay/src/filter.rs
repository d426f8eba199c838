// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Unit selection.
//!
//! Pure decision over a normalized run: which leaf units need their logs retrieved, which
//! are skipped and why. Empty allow-lists allow everything. When both project lists are
//! set, the allow-list wins and the deny-list is ignored.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

use crate::model::{PipelineRun, RunStatus, UnitRef};

/// The filter rule responsible for an exclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    RunStatus,
    ProjectAllowList,
    ProjectDenyList,
    UnitStatus,
}

impl Predicate {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Predicate::RunStatus => "run_status",
            Predicate::ProjectAllowList => "project_allow_list",
            Predicate::ProjectDenyList => "project_deny_list",
            Predicate::UnitStatus => "unit_status",
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterConfig {
    pub run_status_allow: Vec<RunStatus>,
    pub unit_status_allow: Vec<RunStatus>,
    /// Project paths or ids. An entry ending in `/*` matches every project of the group.
    pub project_allow: Vec<String>,
    pub project_deny: Vec<String>,
    /// Dispatch run metadata even when no unit is selected.
    pub record_metadata_always: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterDecision {
    pub selected: Vec<UnitRef>,
    pub skipped: Vec<(UnitRef, Predicate)>,
    pub record_metadata: bool,
    pub run_excluded_by: Option<Predicate>,
}

impl FilterDecision {
    /// Whether the run goes on to delivery at all.
    #[must_use]
    pub fn should_dispatch(&self) -> bool {
        !self.selected.is_empty() || self.record_metadata
    }
}

fn project_matches(entry: &str, run: &PipelineRun) -> bool {
    let entry = entry.trim();
    if let Some(group) = entry.strip_suffix("/*") {
        return run
            .project
            .path
            .strip_prefix(group)
            .is_some_and(|rest| rest.starts_with('/'));
    }
    entry == run.project.path || entry == run.project.id
}

fn run_exclusion(run: &PipelineRun, config: &FilterConfig) -> Option<Predicate> {
    if !config.run_status_allow.is_empty() && !config.run_status_allow.contains(&run.status) {
        return Some(Predicate::RunStatus);
    }
    if !config.project_allow.is_empty() {
        if !config.project_allow.iter().any(|e| project_matches(e, run)) {
            return Some(Predicate::ProjectAllowList);
        }
    } else if config.project_deny.iter().any(|e| project_matches(e, run)) {
        return Some(Predicate::ProjectDenyList);
    }
    None
}

#[must_use]
pub fn filter_run(run: &PipelineRun, config: &FilterConfig) -> FilterDecision {
    let units = run.unit_refs();
    let run_excluded_by = run_exclusion(run, config);

    let mut selected = Vec::new();
    let mut skipped = Vec::new();

    if let Some(predicate) = run_excluded_by {
        info!(
            run_id = %run.run_id,
            project = %run.project.path,
            status = %run.status,
            predicate = %predicate,
            "FILTER | Run excluded"
        );
        skipped.extend(units.into_iter().map(|unit| (unit, predicate)));
    } else {
        for unit in units {
            if !config.unit_status_allow.is_empty()
                && !config.unit_status_allow.contains(&unit.status)
            {
                debug!(
                    run_id = %run.run_id,
                    unit = %unit.name,
                    status = %unit.status,
                    predicate = %Predicate::UnitStatus,
                    "FILTER | Unit skipped"
                );
                skipped.push((unit, Predicate::UnitStatus));
            } else {
                selected.push(unit);
            }
        }
    }

    // Project lists mean "do not touch", so they also suppress metadata recording.
    let project_excluded = matches!(
        run_excluded_by,
        Some(Predicate::ProjectAllowList | Predicate::ProjectDenyList)
    );

    FilterDecision {
        selected,
        skipped,
        record_metadata: config.record_metadata_always && !project_excluded,
        run_excluded_by,
    }
}
