// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! GitLab REST API v4 client: job traces and actor lookups.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::RANGE;
use reqwest::{Client, Response};
use serde_json::Value;
use tracing::debug;

use crate::error::HttpError;
use crate::http::{check_response, redact_headers, target_of};
use crate::model::UnitRef;
use crate::platform::{encode_project, suffix_range, tail_read_from, ActorLookup};
use crate::retriever::{ByteStream, LogSource, TailRead};

const TOKEN_HEADER: &str = "PRIVATE-TOKEN";

#[derive(Clone)]
pub struct GitLabClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl std::fmt::Debug for GitLabClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitLabClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GitLabClient {
    #[must_use]
    pub fn new(client: Client, base_url: &str, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    fn api_url(&self, project: &str, path: &str) -> String {
        format!(
            "{}/api/v4/projects/{}/{}",
            self.base_url,
            encode_project(project),
            path
        )
    }

    async fn get(&self, url: &str, range: Option<String>) -> Result<Response, HttpError> {
        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.header(TOKEN_HEADER, token);
        }
        if let Some(range) = range {
            request = request.header(RANGE, range);
        }
        let request = request.build()?;
        debug!(
            url = %request.url(),
            headers = ?redact_headers(request.headers()),
            "HTTP | GitLab request"
        );
        let response = self.client.execute(request).await?;
        check_response(response).await
    }

    async fn get_json(&self, url: &str) -> Result<Value, HttpError> {
        self.get(url, None)
            .await?
            .json::<Value>()
            .await
            .map_err(|e| HttpError::Decode(e.to_string()))
    }

    fn trace_url(&self, unit: &UnitRef) -> String {
        self.api_url(&unit.locator.project_id, &format!("jobs/{}/trace", unit.id))
    }
}

fn string_at(value: &Value, pointer: &str) -> Result<String, HttpError> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| HttpError::Decode(format!("missing {pointer}")))
}

#[async_trait]
impl LogSource for GitLabClient {
    fn target(&self, _unit: &UnitRef) -> String {
        target_of(&self.base_url)
    }

    async fn fetch_tail(&self, unit: &UnitRef, max_bytes: u64) -> Result<TailRead, HttpError> {
        let response = self
            .get(&self.trace_url(unit), Some(suffix_range(max_bytes)))
            .await?;
        Ok(tail_read_from(response))
    }

    async fn open_stream(&self, unit: &UnitRef) -> Result<ByteStream, HttpError> {
        let response = self.get(&self.trace_url(unit), None).await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(HttpError::from))
            .boxed())
    }
}

#[async_trait]
impl ActorLookup for GitLabClient {
    fn target(&self) -> String {
        target_of(&self.base_url)
    }

    async fn merge_request_author(&self, project: &str, iid: &str) -> Result<String, HttpError> {
        let body = self
            .get_json(&self.api_url(project, &format!("merge_requests/{iid}")))
            .await?;
        string_at(&body, "/author/username")
    }

    async fn commit_author(&self, project: &str, sha: &str) -> Result<String, HttpError> {
        let body = self
            .get_json(&self.api_url(project, &format!("repository/commits/{sha}")))
            .await?;
        string_at(&body, "/author_name")
    }

    async fn branch_author(&self, project: &str, branch: &str) -> Result<String, HttpError> {
        let body = self
            .get_json(&self.api_url(
                project,
                &format!("repository/branches/{}", encode_project(branch)),
            ))
            .await?;
        string_at(&body, "/commit/author_name")
    }
}
