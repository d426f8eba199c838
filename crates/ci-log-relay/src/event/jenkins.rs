// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Jenkins build notification.

use chrono::{DateTime, TimeDelta};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::RelayError;
use crate::event::{id_string, parse_object};
use crate::model::{PipelineRun, Platform, Project, RunStatus, Unit};
use crate::platform::{ActorLookup, BuildMetadataSource};
use crate::reliability::Reliability;

const UNKNOWN_ACTOR: &str = "unknown";

#[derive(Debug, Deserialize)]
struct BuildNotification {
    job_name: Option<String>,
    build_number: Option<Value>,
    build_url: Option<String>,
    jenkins_url: Option<String>,
    status: Option<String>,
    duration_ms: Option<f64>,
    timestamp: Option<i64>,
    repository: Option<String>,
    branch: Option<String>,
    commit: Option<String>,
    triggered_by: Option<String>,
    parameters: Option<Value>,
}

/// Parameters arrive as an object or as Jenkins' `[{"name": .., "value": ..}]` list.
fn parameter_map(parameters: Option<Value>) -> Map<String, Value> {
    match parameters {
        Some(Value::Object(map)) => map,
        Some(Value::Array(entries)) => entries
            .into_iter()
            .filter_map(|entry| {
                let name = entry.get("name")?.as_str()?.to_string();
                Some((name, entry.get("value").cloned().unwrap_or(Value::Null)))
            })
            .collect(),
        _ => Map::new(),
    }
}

fn param(params: &Map<String, Value>, key: &str) -> Option<String> {
    match params.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `https://host/group/app.git` and `git@host:group/app.git` become `group/app`.
fn repository_path(repository: &str) -> String {
    let repository = repository.trim();
    let path = if let Some((_, rest)) = repository.split_once("://") {
        rest.split_once('/').map_or("", |(_, path)| path)
    } else if let Some((_, path)) = repository
        .strip_prefix("git@")
        .and_then(|r| r.split_once(':'))
    {
        path
    } else {
        repository
    };
    path.trim_matches('/').trim_end_matches(".git").to_string()
}

/// The server part of `https://jenkins/job/folder/job/app/42/`.
fn server_from_build_url(build_url: &str) -> Option<String> {
    build_url
        .find("/job/")
        .map(|index| build_url[..index].to_string())
}

#[derive(Debug)]
enum Lookup {
    MergeRequest(String),
    Commit(String),
    Branch(String),
}

impl Lookup {
    fn kind(&self) -> &'static str {
        match self {
            Lookup::MergeRequest(_) => "merge_request",
            Lookup::Commit(_) => "commit",
            Lookup::Branch(_) => "branch",
        }
    }
}

async fn resolve_actor(
    notification: &BuildNotification,
    params: &Map<String, Value>,
    reliability: &Reliability,
    actors: Option<&dyn ActorLookup>,
) -> String {
    if let Some(actor) = non_empty(notification.triggered_by.clone())
        .or_else(|| param(params, "triggered_by"))
        .or_else(|| param(params, "BUILD_USER_ID"))
    {
        return actor;
    }

    if param(params, "gitlabActionType").is_none() {
        return UNKNOWN_ACTOR.to_string();
    }
    let Some(actors) = actors else {
        debug!("NORMALIZER | Proxied GitLab event but no GitLab client configured");
        return UNKNOWN_ACTOR.to_string();
    };

    let project = match (
        param(params, "gitlabSourceNamespace"),
        param(params, "gitlabSourceRepoName"),
    ) {
        (Some(namespace), Some(name)) => Some(format!("{namespace}/{name}")),
        _ => notification
            .repository
            .as_deref()
            .map(repository_path)
            .filter(|p| !p.is_empty()),
    };
    let Some(project) = project else {
        debug!("NORMALIZER | Proxied GitLab event without a project, skipping actor lookups");
        return UNKNOWN_ACTOR.to_string();
    };

    let lookups = [
        param(params, "gitlabMergeRequestIid").map(Lookup::MergeRequest),
        param(params, "gitlabAfter")
            .or_else(|| non_empty(notification.commit.clone()))
            .map(Lookup::Commit),
        param(params, "gitlabSourceBranch")
            .or_else(|| non_empty(notification.branch.clone()))
            .map(Lookup::Branch),
    ];

    let target = actors.target();
    for lookup in lookups.into_iter().flatten() {
        let result = reliability
            .call(&target, || async {
                match &lookup {
                    Lookup::MergeRequest(iid) => actors.merge_request_author(&project, iid).await,
                    Lookup::Commit(sha) => actors.commit_author(&project, sha).await,
                    Lookup::Branch(branch) => actors.branch_author(&project, branch).await,
                }
            })
            .await;
        match result {
            Ok(actor) => return actor,
            Err(e) => debug!(
                lookup = lookup.kind(),
                project = %project,
                "NORMALIZER | Actor lookup failed: {}",
                e
            ),
        }
    }

    warn!(project = %project, "NORMALIZER | Every actor lookup failed");
    UNKNOWN_ACTOR.to_string()
}

pub async fn normalize(
    payload: &[u8],
    reliability: &Reliability,
    metadata: Option<&dyn BuildMetadataSource>,
    actors: Option<&dyn ActorLookup>,
) -> Result<PipelineRun, RelayError> {
    let mut notification: BuildNotification = parse_object(Platform::Jenkins, payload)?;
    let malformed = |reason: &str| RelayError::malformed(Platform::Jenkins, reason);

    let job_name =
        non_empty(notification.job_name.take()).ok_or_else(|| malformed("missing job_name"))?;
    let run_id = id_string(notification.build_number.as_ref())
        .ok_or_else(|| malformed("missing build_number"))?;
    let build_url =
        non_empty(notification.build_url.take()).ok_or_else(|| malformed("missing build_url"))?;

    let params = parameter_map(notification.parameters.take());
    let status = RunStatus::from_jenkins(notification.status.as_deref().filter(|s| !s.is_empty()));
    let server_url = non_empty(notification.jenkins_url.take())
        .map(|s| s.trim_end_matches('/').to_string())
        .or_else(|| server_from_build_url(&build_url));

    let created_at = notification
        .timestamp
        .and_then(DateTime::from_timestamp_millis);
    let duration_secs = notification.duration_ms.map(|ms| ms / 1000.0);
    let finished_at = match (created_at, notification.duration_ms) {
        (Some(start), Some(ms)) if status != RunStatus::Running => {
            TimeDelta::try_milliseconds(ms as i64).and_then(|d| start.checked_add_signed(d))
        }
        _ => None,
    };

    let triggered_by = resolve_actor(&notification, &params, reliability, actors).await;

    let units = fetch_units(
        metadata,
        reliability,
        server_url.as_deref(),
        &job_name,
        &run_id,
    )
    .await;

    let path = notification
        .repository
        .as_deref()
        .map(repository_path)
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| job_name.clone());

    let run = PipelineRun {
        platform: Platform::Jenkins,
        run_id,
        project: Project {
            id: job_name,
            path,
            web_url: None,
        },
        server_url,
        revision: non_empty(notification.commit.take()),
        branch: non_empty(notification.branch.take()),
        url: Some(build_url),
        status,
        created_at,
        finished_at,
        duration_secs,
        triggered_by,
        units,
    };

    debug!(
        run_id = %run.run_id,
        project = %run.project.id,
        status = %run.status,
        units = run.units.len(),
        "NORMALIZER | Jenkins build normalized"
    );
    Ok(run)
}

async fn fetch_units(
    metadata: Option<&dyn BuildMetadataSource>,
    reliability: &Reliability,
    server_url: Option<&str>,
    job_name: &str,
    build_number: &str,
) -> Vec<Unit> {
    let Some(metadata) = metadata else {
        warn!(job = job_name, "NORMALIZER | No Jenkins metadata source, run has no units");
        return Vec::new();
    };
    let server_url = server_url.unwrap_or_default();
    let target = metadata.target(server_url);

    match reliability
        .call(&target, || metadata.fetch_units(server_url, job_name, build_number))
        .await
    {
        Ok(units) => units,
        Err(e) => {
            warn!(
                job = job_name,
                build = build_number,
                "NORMALIZER | Failed to fetch build stages, continuing without units: {}",
                e
            );
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::json;
    use tracing_test::traced_test;

    use super::*;
    use crate::error::HttpError;
    use crate::reliability::circuit::CircuitRegistry;
    use crate::reliability::ReliabilityConfig;

    fn reliability() -> Reliability {
        Reliability::with_registry(
            &ReliabilityConfig {
                retry_attempts: 2,
                retry_delay: Duration::from_millis(10),
                failure_threshold: 100,
                cooldown: Duration::from_secs(60),
            },
            Arc::new(CircuitRegistry::new()),
        )
    }

    fn notification() -> Value {
        json!({
            "job_name": "team/api",
            "build_number": 42,
            "build_url": "https://jenkins.example.com/job/team/job/api/42/",
            "status": "FAILURE",
            "duration_ms": 90500,
            "timestamp": 1_709_288_553_000_i64,
            "repository": "https://gitlab.example.com/team/api.git",
            "branch": "main",
            "commit": "abc123",
            "parameters": {}
        })
    }

    struct Stages {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl BuildMetadataSource for Stages {
        fn target(&self, _server_url: &str) -> String {
            "jenkins.example.com".to_string()
        }

        async fn fetch_units(
            &self,
            server_url: &str,
            job_name: &str,
            build_number: &str,
        ) -> Result<Vec<Unit>, HttpError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(server_url, "https://jenkins.example.com");
            assert_eq!(job_name, "team/api");
            assert_eq!(build_number, "42");
            if self.fail {
                return Err(HttpError::Status {
                    status: 502,
                    body: String::new(),
                });
            }
            Ok(vec![
                Unit::new("6", "Build", RunStatus::Success),
                Unit::new("12", "Test", RunStatus::Failed),
            ])
        }
    }

    #[derive(Default)]
    struct Actors {
        calls: Mutex<Vec<String>>,
        merge_request: Option<String>,
        commit: Option<String>,
        branch: Option<String>,
    }

    impl Actors {
        fn answer(&self, call: String, answer: Option<&String>) -> Result<String, HttpError> {
            self.calls.lock().expect("lock").push(call);
            answer.cloned().ok_or(HttpError::Status {
                status: 404,
                body: String::new(),
            })
        }
    }

    #[async_trait]
    impl ActorLookup for Actors {
        fn target(&self) -> String {
            "gitlab.example.com".to_string()
        }

        async fn merge_request_author(&self, project: &str, iid: &str) -> Result<String, HttpError> {
            self.answer(format!("mr {project} {iid}"), self.merge_request.as_ref())
        }

        async fn commit_author(&self, project: &str, sha: &str) -> Result<String, HttpError> {
            self.answer(format!("commit {project} {sha}"), self.commit.as_ref())
        }

        async fn branch_author(&self, project: &str, branch: &str) -> Result<String, HttpError> {
            self.answer(format!("branch {project} {branch}"), self.branch.as_ref())
        }
    }

    async fn run(
        value: &Value,
        metadata: Option<&dyn BuildMetadataSource>,
        actors: Option<&dyn ActorLookup>,
    ) -> Result<PipelineRun, RelayError> {
        normalize(value.to_string().as_bytes(), &reliability(), metadata, actors).await
    }

    #[tokio::test]
    async fn test_normalize_build_notification() {
        let stages = Stages {
            calls: AtomicU32::new(0),
            fail: false,
        };
        let run = run(&notification(), Some(&stages), None)
            .await
            .expect("notification should normalize");

        assert_eq!(run.platform, Platform::Jenkins);
        assert_eq!(run.run_id, "42");
        assert_eq!(run.project.id, "team/api");
        assert_eq!(run.project.path, "team/api");
        assert_eq!(run.server_url.as_deref(), Some("https://jenkins.example.com"));
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.duration_secs, Some(90.5));
        assert_eq!(run.revision.as_deref(), Some("abc123"));
        assert_eq!(run.triggered_by, "unknown");
        assert_eq!(
            run.finished_at.zip(run.created_at).map(|(f, c)| (f - c).num_milliseconds()),
            Some(90_500)
        );
        assert_eq!(run.unit_names(), vec!["Build", "Test"]);
        assert_eq!(stages.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_times_leave_finish_unset() {
        for duration in [json!(1e18), json!(-1e300), json!(f64::MAX)] {
            let mut value = notification();
            value["duration_ms"] = duration;
            let run = run(&value, None, None).await.expect("normalizes");
            assert!(run.created_at.is_some());
            assert_eq!(run.finished_at, None);
        }

        let mut value = notification();
        value["timestamp"] = json!(i64::MAX);
        let run = run(&value, None, None).await.expect("normalizes");
        assert_eq!(run.created_at, None);
        assert_eq!(run.finished_at, None);
    }

    #[tokio::test]
    async fn test_status_mapping() {
        for (status, expected) in [
            (json!("SUCCESS"), RunStatus::Success),
            (json!("ABORTED"), RunStatus::Canceled),
            (json!("UNSTABLE"), RunStatus::Unstable),
            (json!("NOT_BUILT"), RunStatus::Skipped),
            (json!(null), RunStatus::Running),
            (json!("SOMETHING_NEW"), RunStatus::Unknown),
        ] {
            let mut value = notification();
            value["status"] = status;
            let run = run(&value, None, None).await.expect("normalizes");
            assert_eq!(run.status, expected);
        }
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn test_metadata_failure_gives_zero_units() {
        let stages = Stages {
            calls: AtomicU32::new(0),
            fail: true,
        };
        let run = run(&notification(), Some(&stages), None)
            .await
            .expect("metadata failure is not fatal");
        assert!(run.units.is_empty());
        assert_eq!(stages.calls.load(Ordering::SeqCst), 2);
        assert!(logs_contain("Failed to fetch build stages"));
    }

    #[tokio::test]
    async fn test_required_fields() {
        for field in ["job_name", "build_number", "build_url"] {
            let mut value = notification();
            value.as_object_mut().expect("object").remove(field);
            let err = run(&value, None, None).await.expect_err("should be malformed");
            assert!(err.to_string().contains(field), "{err}");
        }
    }

    #[tokio::test]
    async fn test_triggered_by_parameter_wins() {
        let mut value = notification();
        value["parameters"] = json!([
            {"name": "BUILD_USER_ID", "value": "dora"},
            {"name": "gitlabActionType", "value": "PUSH"}
        ]);
        let actors = Actors {
            commit: Some("Eve".to_string()),
            ..Actors::default()
        };
        let run = run(&value, None, Some(&actors)).await.expect("normalizes");
        assert_eq!(run.triggered_by, "dora");
        assert!(actors.calls.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn test_proxied_gitlab_lookups_in_priority_order() {
        let mut value = notification();
        value["parameters"] = json!({
            "gitlabActionType": "MERGE",
            "gitlabSourceNamespace": "team",
            "gitlabSourceRepoName": "api",
            "gitlabMergeRequestIid": "17",
            "gitlabAfter": "def456",
            "gitlabSourceBranch": "feature/x"
        });
        let actors = Actors {
            branch: Some("Frank".to_string()),
            ..Actors::default()
        };

        let run = run(&value, None, Some(&actors)).await.expect("normalizes");
        assert_eq!(run.triggered_by, "Frank");
        assert_eq!(
            *actors.calls.lock().expect("lock"),
            vec![
                "mr team/api 17".to_string(),
                "commit team/api def456".to_string(),
                "branch team/api feature/x".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_every_lookup_failing_degrades_to_unknown() {
        let mut value = notification();
        value["parameters"] = json!({"gitlabActionType": "PUSH"});
        let actors = Actors::default();

        let run = run(&value, None, Some(&actors)).await.expect("normalizes");
        assert_eq!(run.triggered_by, "unknown");
        // Falls back to the notification's repository, commit and branch.
        assert_eq!(
            *actors.calls.lock().expect("lock"),
            vec!["commit team/api abc123".to_string(), "branch team/api main".to_string()]
        );
    }

    #[test]
    fn test_repository_path() {
        assert_eq!(repository_path("https://gitlab.com/group/app.git"), "group/app");
        assert_eq!(repository_path("git@gitlab.com:group/sub/app.git"), "group/sub/app");
        assert_eq!(repository_path("group/app"), "group/app");
    }

    #[test]
    fn test_server_from_build_url() {
        assert_eq!(
            server_from_build_url("https://ci.example.com/jenkins/job/app/3/").as_deref(),
            Some("https://ci.example.com/jenkins")
        );
        assert_eq!(server_from_build_url("https://ci.example.com/3/"), None);
    }
}
