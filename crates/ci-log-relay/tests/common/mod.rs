// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ci_log_relay::config::delivery_mode::DeliveryMode;
use ci_log_relay::config::Config;
use ci_log_relay::processor::{Collaborators, RunProcessor};
use ci_log_relay::reliability::circuit::CircuitRegistry;
use serde_json::{json, Value};

pub const PROJECT_ID: u64 = 7;

/// A job of a GitLab pipeline hook: id, stage, name, status.
pub type Job<'a> = (u64, &'a str, &'a str, &'a str);

pub fn gitlab_hook(pipeline_id: u64, status: &str, jobs: &[Job<'_>]) -> String {
    json!({
        "object_kind": "pipeline",
        "object_attributes": {
            "id": pipeline_id,
            "ref": "main",
            "sha": "bcbb5ec396a2c0f828686f14fac9b80b780504f2",
            "status": status,
            "stages": ["build", "test", "deploy"]
        },
        "user": {"name": "Alice", "username": "alice"},
        "project": {
            "id": PROJECT_ID,
            "path_with_namespace": "group/app",
            "web_url": "https://gitlab.example.com/group/app"
        },
        "builds": jobs
            .iter()
            .map(|(id, stage, name, status)| json!({
                "id": id, "stage": stage, "name": name, "status": status
            }))
            .collect::<Vec<_>>()
    })
    .to_string()
}

pub fn trace_path(job_id: u64) -> String {
    format!("/api/v4/projects/{PROJECT_ID}/jobs/{job_id}/trace")
}

/// File delivery, fast retries.
pub fn config(gitlab_url: &str, storage_dir: &Path) -> Config {
    Config {
        gitlab_url: gitlab_url.to_string(),
        gitlab_token: Some("glpat-test".to_string()),
        delivery_mode: DeliveryMode::File,
        storage_dir: storage_dir.to_path_buf(),
        retry_attempts: 3,
        retry_delay: Duration::from_millis(1),
        ..Config::default()
    }
}

/// Processor with real platform clients and a circuit registry of its own.
pub fn processor(config: &Config) -> RunProcessor {
    let mut collaborators = Collaborators::from_config(config);
    collaborators.circuits = Arc::new(CircuitRegistry::new());
    RunProcessor::new(config, &collaborators).expect("valid configuration")
}

pub fn read_metadata(run_dir: &Path) -> Value {
    let bytes = std::fs::read(run_dir.join("metadata.json")).expect("metadata.json exists");
    serde_json::from_slice(&bytes).expect("metadata.json is JSON")
}
