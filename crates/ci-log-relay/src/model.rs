// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Canonical pipeline model shared by every stage of the relay.
//!
//! Platform payloads are converted into a [`PipelineRun`] once, at ingestion. Everything
//! downstream works on these types and never re-inspects the original payload.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// CI platform a run originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Gitlab,
    Jenkins,
}

impl Platform {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Platform::Gitlab => "gitlab",
            Platform::Jenkins => "jenkins",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gitlab" => Ok(Platform::Gitlab),
            "jenkins" => Ok(Platform::Jenkins),
            _ => Err(format!(
                "Invalid platform: '{s}'. Valid platforms are: gitlab, jenkins"
            )),
        }
    }
}

/// Status of a run or of a single unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
    Canceled,
    Running,
    Skipped,
    Unstable,
    Unknown,
}

impl RunStatus {
    /// Maps a GitLab pipeline or job status. Unrecognized values become `Unknown`.
    #[must_use]
    pub fn from_gitlab(status: &str) -> Self {
        match status.to_lowercase().as_str() {
            "success" => RunStatus::Success,
            "failed" => RunStatus::Failed,
            "canceled" | "cancelled" => RunStatus::Canceled,
            "running" | "pending" | "created" | "preparing" | "waiting_for_resource" => {
                RunStatus::Running
            }
            "skipped" | "manual" => RunStatus::Skipped,
            _ => RunStatus::Unknown,
        }
    }

    /// Maps a Jenkins build or node result. A missing result means the build is still going.
    #[must_use]
    pub fn from_jenkins(status: Option<&str>) -> Self {
        let Some(status) = status else {
            return RunStatus::Running;
        };
        match status.to_uppercase().as_str() {
            "SUCCESS" => RunStatus::Success,
            "FAILURE" => RunStatus::Failed,
            "ABORTED" => RunStatus::Canceled,
            "UNSTABLE" => RunStatus::Unstable,
            "NOT_BUILT" | "SKIPPED" => RunStatus::Skipped,
            "IN_PROGRESS" | "RUNNING" | "QUEUED" | "PAUSED" => RunStatus::Running,
            _ => RunStatus::Unknown,
        }
    }

    /// Whether the status counts as a failure for extraction and `failed_steps`.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, RunStatus::Failed | RunStatus::Unstable)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Canceled => "canceled",
            RunStatus::Running => "running",
            RunStatus::Skipped => "skipped",
            RunStatus::Unstable => "unstable",
            RunStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            "canceled" | "cancelled" => Ok(RunStatus::Canceled),
            "running" => Ok(RunStatus::Running),
            "skipped" => Ok(RunStatus::Skipped),
            "unstable" => Ok(RunStatus::Unstable),
            "unknown" => Ok(RunStatus::Unknown),
            _ => Err(format!("Invalid status: '{s}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Project {
    /// Platform identifier: the numeric GitLab project id or the Jenkins job name.
    pub id: String,
    /// Human readable path such as `group/app`.
    pub path: String,
    pub web_url: Option<String>,
}

/// Where a run lives on its platform. Log sources use it to build request URLs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunLocator {
    pub platform: Option<Platform>,
    /// Base URL of the server that produced the run, when the payload names one.
    pub server_url: Option<String>,
    pub project_id: String,
    pub run_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRun {
    pub platform: Platform,
    pub run_id: String,
    pub project: Project,
    pub server_url: Option<String>,
    pub revision: Option<String>,
    pub branch: Option<String>,
    pub url: Option<String>,
    pub status: RunStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
    pub triggered_by: String,
    pub units: Vec<Unit>,
}

impl PipelineRun {
    #[must_use]
    pub fn locator(&self) -> RunLocator {
        RunLocator {
            platform: Some(self.platform),
            server_url: self.server_url.clone(),
            project_id: self.project.id.clone(),
            run_id: self.run_id.clone(),
        }
    }

    /// Units logs are retrieved for: childless units, and every child of a parallel unit.
    #[must_use]
    pub fn leaves(&self) -> Vec<&Unit> {
        self.units
            .iter()
            .flat_map(|unit| {
                if unit.children.is_empty() {
                    vec![unit]
                } else {
                    unit.children.iter().collect()
                }
            })
            .collect()
    }

    #[must_use]
    pub fn leaves_mut(&mut self) -> Vec<&mut Unit> {
        self.units
            .iter_mut()
            .flat_map(|unit| {
                if unit.children.is_empty() {
                    vec![unit]
                } else {
                    unit.children.iter_mut().collect()
                }
            })
            .collect()
    }

    /// References to every leaf, in leaf order.
    #[must_use]
    pub fn unit_refs(&self) -> Vec<UnitRef> {
        let locator = Arc::new(self.locator());
        self.leaves()
            .into_iter()
            .enumerate()
            .map(|(leaf_index, unit)| UnitRef {
                leaf_index,
                id: unit.id.clone(),
                name: unit.name.clone(),
                status: unit.status,
                locator: Arc::clone(&locator),
            })
            .collect()
    }

    #[must_use]
    pub fn unit_names(&self) -> Vec<String> {
        self.leaves().iter().map(|unit| unit.name.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub id: String,
    pub name: String,
    pub stage: Option<String>,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Parallel branches. A unit with children has no log of its own.
    pub children: Vec<Unit>,
    pub log: UnitLog,
    pub errors: Vec<ErrorSection>,
}

impl Unit {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, status: RunStatus) -> Self {
        Unit {
            id: id.into(),
            name: name.into(),
            stage: None,
            status,
            started_at: None,
            finished_at: None,
            children: Vec::new(),
            log: UnitLog::NotRequested,
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMethod {
    Tail,
    Stream,
    None,
}

/// Bounded log output of one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct LogChunk {
    pub lines: Vec<String>,
    /// Sum of the kept line lengths in bytes.
    pub bytes: usize,
    pub truncated: bool,
    pub method: RetrievalMethod,
}

impl LogChunk {
    #[must_use]
    pub fn empty() -> Self {
        LogChunk {
            lines: Vec::new(),
            bytes: 0,
            truncated: false,
            method: RetrievalMethod::None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum UnitLog {
    #[default]
    NotRequested,
    Fetched(LogChunk),
    FetchFailed {
        reason: String,
    },
}

impl UnitLog {
    #[must_use]
    pub fn chunk(&self) -> Option<&LogChunk> {
        match self {
            UnitLog::Fetched(chunk) => Some(chunk),
            _ => None,
        }
    }
}

/// Cleaned diagnostic lines around one or more trigger lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorSection {
    pub unit: String,
    /// First line index of the window in the source chunk.
    pub start: usize,
    /// Last line index of the window in the source chunk, inclusive.
    pub end: usize,
    pub trigger_lines: Vec<usize>,
    pub lines: Vec<String>,
    pub truncated: bool,
}

/// Lightweight handle on a leaf unit, passed to log sources.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitRef {
    pub leaf_index: usize,
    pub id: String,
    pub name: String,
    pub status: RunStatus,
    pub locator: Arc<RunLocator>,
}
