// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! GitLab pipeline hook.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::RelayError;
use crate::event::{id_string, parse_object, parse_timestamp};
use crate::model::{PipelineRun, Platform, Project, RunStatus, Unit};

#[derive(Debug, Deserialize)]
struct PipelineHook {
    object_attributes: Option<ObjectAttributes>,
    project: Option<HookProject>,
    user: Option<HookUser>,
    #[serde(default)]
    builds: Vec<HookBuild>,
}

#[derive(Debug, Deserialize)]
struct ObjectAttributes {
    id: Option<Value>,
    #[serde(rename = "ref")]
    git_ref: Option<String>,
    sha: Option<String>,
    status: Option<String>,
    created_at: Option<String>,
    finished_at: Option<String>,
    duration: Option<f64>,
    url: Option<String>,
    #[serde(default)]
    stages: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct HookProject {
    id: Option<Value>,
    path_with_namespace: Option<String>,
    web_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HookUser {
    username: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HookBuild {
    id: Option<Value>,
    name: Option<String>,
    stage: Option<String>,
    status: Option<String>,
    started_at: Option<String>,
    finished_at: Option<String>,
}

fn timestamp(value: Option<&String>) -> Option<chrono::DateTime<chrono::Utc>> {
    value.and_then(|v| parse_timestamp(v))
}

pub fn normalize(payload: &[u8]) -> Result<PipelineRun, RelayError> {
    let hook: PipelineHook = parse_object(Platform::Gitlab, payload)?;
    let malformed = |reason: &str| RelayError::malformed(Platform::Gitlab, reason);

    let attributes = hook
        .object_attributes
        .ok_or_else(|| malformed("missing object_attributes"))?;
    let run_id = id_string(attributes.id.as_ref())
        .ok_or_else(|| malformed("missing object_attributes.id"))?;
    let status = attributes
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(RunStatus::from_gitlab)
        .ok_or_else(|| malformed("missing object_attributes.status"))?;

    let hook_project = hook.project.ok_or_else(|| malformed("missing project"))?;
    let project_id =
        id_string(hook_project.id.as_ref()).ok_or_else(|| malformed("missing project.id"))?;
    let project = Project {
        path: hook_project
            .path_with_namespace
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| project_id.clone()),
        id: project_id,
        web_url: hook_project.web_url,
    };

    let url = attributes.url.or_else(|| {
        project
            .web_url
            .as_ref()
            .map(|web| format!("{}/-/pipelines/{run_id}", web.trim_end_matches('/')))
    });

    let triggered_by = hook
        .user
        .and_then(|u| u.username.filter(|s| !s.is_empty()).or(u.name))
        .unwrap_or_else(|| "unknown".to_string());

    let mut units: Vec<(usize, u64, Unit)> = Vec::with_capacity(hook.builds.len());
    for build in hook.builds {
        let Some(id) = id_string(build.id.as_ref()) else {
            warn!(run_id = %run_id, "NORMALIZER | Skipping GitLab job without id");
            continue;
        };
        let stage_index = build
            .stage
            .as_ref()
            .and_then(|stage| attributes.stages.iter().position(|s| s == stage))
            .unwrap_or(usize::MAX);
        let numeric_id = id.parse::<u64>().unwrap_or(u64::MAX);
        let status = build
            .status
            .as_deref()
            .map_or(RunStatus::Unknown, RunStatus::from_gitlab);

        let mut unit = Unit::new(id.clone(), build.name.unwrap_or(id), status);
        unit.stage = build.stage;
        unit.started_at = timestamp(build.started_at.as_ref());
        unit.finished_at = timestamp(build.finished_at.as_ref());
        units.push((stage_index, numeric_id, unit));
    }
    units.sort_by(|a, b| (a.0, a.1, &a.2.id).cmp(&(b.0, b.1, &b.2.id)));

    let run = PipelineRun {
        platform: Platform::Gitlab,
        run_id,
        project,
        server_url: None,
        revision: attributes.sha.filter(|s| !s.is_empty()),
        branch: attributes.git_ref.filter(|s| !s.is_empty()),
        url,
        status,
        created_at: timestamp(attributes.created_at.as_ref()),
        finished_at: timestamp(attributes.finished_at.as_ref()),
        duration_secs: attributes.duration,
        triggered_by,
        units: units.into_iter().map(|(_, _, unit)| unit).collect(),
    };

    debug!(
        run_id = %run.run_id,
        project = %run.project.path,
        status = %run.status,
        units = run.units.len(),
        "NORMALIZER | GitLab pipeline normalized"
    );
    Ok(run)
}
