// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Jenkins Blue Ocean REST client: stage listing and per-node logs.
//!
//! Blue Ocean addresses a job inside folders as `a/pipelines/b/pipelines/job`. Node logs
//! ignore `Range`, so tail reads come back as full 200 responses and rely on the
//! retriever's ring buffer.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use futures::StreamExt;
use reqwest::header::RANGE;
use reqwest::{Client, Response};
use serde::Deserialize;
use tracing::debug;

use crate::credentials::CredentialResolver;
use crate::error::HttpError;
use crate::http::{check_response, redact_headers, target_of};
use crate::model::{RunStatus, Unit, UnitRef};
use crate::platform::{encode_project, suffix_range, tail_read_from, BuildMetadataSource};
use crate::retriever::{ByteStream, LogSource, TailRead};

#[derive(Clone)]
pub struct JenkinsClient {
    client: Client,
    default_server: Option<String>,
    credentials: Arc<dyn CredentialResolver>,
}

impl std::fmt::Debug for JenkinsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JenkinsClient")
            .field("default_server", &self.default_server)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlueOceanNode {
    id: String,
    display_name: String,
    result: Option<String>,
    state: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    first_parent: Option<String>,
    start_time: Option<String>,
    duration_in_millis: Option<i64>,
}

impl BlueOceanNode {
    fn status(&self) -> RunStatus {
        match self.state.as_deref() {
            Some("RUNNING" | "QUEUED" | "PAUSED") => RunStatus::Running,
            Some("SKIPPED" | "NOT_BUILT") => RunStatus::Skipped,
            _ => RunStatus::from_jenkins(self.result.as_deref()),
        }
    }

    fn into_unit(self) -> Unit {
        let status = self.status();
        let started_at = self.start_time.as_deref().and_then(parse_blue_ocean_time);
        let finished_at = match (started_at, self.duration_in_millis) {
            (Some(start), Some(millis)) if status != RunStatus::Running => {
                TimeDelta::try_milliseconds(millis).and_then(|d| start.checked_add_signed(d))
            }
            _ => None,
        };
        let mut unit = Unit::new(self.id, self.display_name, status);
        unit.started_at = started_at;
        unit.finished_at = finished_at;
        unit
    }
}

/// Blue Ocean timestamps look like `2024-03-01T10:22:33.123+0000`.
fn parse_blue_ocean_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Maps a job name with folders onto the Blue Ocean pipeline path.
#[must_use]
pub fn pipeline_path(job_name: &str) -> String {
    job_name
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(encode_project)
        .collect::<Vec<_>>()
        .join("/pipelines/")
}

/// Orders stages as listed and nests parallel branches under their stage.
fn build_units(nodes: Vec<BlueOceanNode>) -> Vec<Unit> {
    let (parallel, stages): (Vec<_>, Vec<_>) = nodes
        .into_iter()
        .partition(|node| node.kind.as_deref() == Some("PARALLEL"));

    let mut units: Vec<Unit> = stages.into_iter().map(BlueOceanNode::into_unit).collect();
    for branch in parallel {
        let parent = branch
            .first_parent
            .as_deref()
            .and_then(|parent| units.iter().position(|u| u.id == parent));
        let unit = branch.into_unit();
        match parent {
            Some(index) => {
                let stage_name = units[index].name.clone();
                let mut child = unit;
                child.stage = Some(stage_name);
                units[index].children.push(child);
            }
            None => units.push(unit),
        }
    }
    units
}

impl JenkinsClient {
    #[must_use]
    pub fn new(
        client: Client,
        default_server: Option<&str>,
        credentials: Arc<dyn CredentialResolver>,
    ) -> Self {
        Self {
            client,
            default_server: default_server.map(|s| s.trim_end_matches('/').to_string()),
            credentials,
        }
    }

    fn server_for<'a>(&'a self, server_url: Option<&'a str>) -> Result<&'a str, HttpError> {
        server_url
            .filter(|s| !s.is_empty())
            .or(self.default_server.as_deref())
            .map(|s| s.trim_end_matches('/'))
            .ok_or_else(|| HttpError::InvalidRequest("no Jenkins server URL known".to_string()))
    }

    fn run_url(server: &str, job_name: &str, build_number: &str) -> String {
        format!(
            "{server}/blue/rest/organizations/jenkins/pipelines/{}/runs/{build_number}",
            pipeline_path(job_name)
        )
    }

    fn node_log_url(&self, unit: &UnitRef) -> Result<(String, String), HttpError> {
        let server = self.server_for(unit.locator.server_url.as_deref())?;
        let url = format!(
            "{}/nodes/{}/log/",
            Self::run_url(server, &unit.locator.project_id, &unit.locator.run_id),
            unit.id
        );
        Ok((server.to_string(), url))
    }

    async fn get(&self, server: &str, url: &str, range: Option<String>) -> Result<Response, HttpError> {
        let mut request = self.client.get(url);
        match self.credentials.resolve_credentials(server).await {
            Some(credentials) => {
                request = request.basic_auth(credentials.user, Some(credentials.token));
            }
            None => debug!(server, "HTTP | No Jenkins credentials, sending anonymous request"),
        }
        if let Some(range) = range {
            request = request.header(RANGE, range);
        }
        let request = request.build()?;
        debug!(
            url = %request.url(),
            headers = ?redact_headers(request.headers()),
            "HTTP | Jenkins request"
        );
        let response = self.client.execute(request).await?;
        check_response(response).await
    }
}

#[async_trait]
impl LogSource for JenkinsClient {
    fn target(&self, unit: &UnitRef) -> String {
        match self.server_for(unit.locator.server_url.as_deref()) {
            Ok(server) => target_of(server),
            Err(_) => "jenkins".to_string(),
        }
    }

    async fn fetch_tail(&self, unit: &UnitRef, max_bytes: u64) -> Result<TailRead, HttpError> {
        let (server, url) = self.node_log_url(unit)?;
        let response = self.get(&server, &url, Some(suffix_range(max_bytes))).await?;
        Ok(tail_read_from(response))
    }

    async fn open_stream(&self, unit: &UnitRef) -> Result<ByteStream, HttpError> {
        let (server, url) = self.node_log_url(unit)?;
        let response = self.get(&server, &url, None).await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(HttpError::from))
            .boxed())
    }
}

#[async_trait]
impl BuildMetadataSource for JenkinsClient {
    fn target(&self, server_url: &str) -> String {
        match self.server_for(Some(server_url)) {
            Ok(server) => target_of(server),
            Err(_) => "jenkins".to_string(),
        }
    }

    async fn fetch_units(
        &self,
        server_url: &str,
        job_name: &str,
        build_number: &str,
    ) -> Result<Vec<Unit>, HttpError> {
        let server = self.server_for(Some(server_url))?;
        let url = format!("{}/nodes/", Self::run_url(server, job_name, build_number));
        let nodes: Vec<BlueOceanNode> = self
            .get(server, &url, None)
            .await?
            .json()
            .await
            .map_err(|e| HttpError::Decode(e.to_string()))?;
        Ok(build_units(nodes))
    }
}
