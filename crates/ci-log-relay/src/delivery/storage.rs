// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Durable run storage.
//!
//! One directory per run: `<root>/<platform>/<project-slug>-<id-digest>/<run-id>/`, holding
//! `metadata.json` and one `<index>-<unit-slug>.log` per fetched unit. Every file is
//! written under a temporary name and renamed into place; `metadata.json` is written last.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::delivery_mode::DeliveryMode;
use crate::delivery::payload::DeliveryPayload;
use crate::error::RelayError;
use crate::model::{ErrorSection, PipelineRun, Project, RetrievalMethod, RunStatus, UnitLog};

pub const METADATA_FILE: &str = "metadata.json";
pub const TRUNCATION_MARKER: &str = "[ci-log-relay] log truncated";

/// Lowercase file-name-safe form of `name`.
#[must_use]
pub fn slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches(|c| c == '-' || c == '.');
    if slug.is_empty() {
        "unnamed".to_string()
    } else {
        slug.to_string()
    }
}

/// Directory name of a project. Paths that slug alike are kept apart by a short digest
/// of the platform id.
#[must_use]
pub fn project_dir(project: &Project) -> String {
    let mut hasher = Sha256::new();
    hasher.update(project.id.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}-{}", slug(&project.path), &digest[..8])
}

#[derive(Serialize)]
struct StoredUnit<'a> {
    index: usize,
    name: &'a str,
    stage: Option<&'a str>,
    status: RunStatus,
    log_file: Option<String>,
    lines: Option<usize>,
    truncated: bool,
    method: Option<RetrievalMethod>,
    errors: &'a [ErrorSection],
}

#[derive(Serialize)]
struct FetchFailure<'a> {
    unit: &'a str,
    reason: &'a str,
}

#[derive(Serialize)]
struct StoredRun<'a> {
    payload: &'a DeliveryPayload,
    run_status: RunStatus,
    created_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    units: Vec<StoredUnit<'a>>,
    delivery_mode: DeliveryMode,
    stored_at: DateTime<Utc>,
    fetch_failures: Vec<FetchFailure<'a>>,
}

#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn run_dir(&self, run: &PipelineRun) -> PathBuf {
        self.root
            .join(run.platform.as_str())
            .join(project_dir(&run.project))
            .join(slug(&run.run_id))
    }

    /// Writes the payload and raw unit logs of `run`, returning the run directory.
    pub async fn store(
        &self,
        run: &PipelineRun,
        payload: &DeliveryPayload,
        mode: DeliveryMode,
    ) -> Result<PathBuf, RelayError> {
        let dir = self.run_dir(run);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| RelayError::StorageFailure {
                path: dir.clone(),
                source,
            })?;

        let mut units = Vec::new();
        let mut fetch_failures = Vec::new();
        for (index, unit) in run.leaves().into_iter().enumerate() {
            let mut stored = StoredUnit {
                index,
                name: &unit.name,
                stage: unit.stage.as_deref(),
                status: unit.status,
                log_file: None,
                lines: None,
                truncated: false,
                method: None,
                errors: &unit.errors,
            };
            match &unit.log {
                UnitLog::Fetched(chunk) => {
                    let file_name = format!("{index:03}-{}.log", slug(&unit.name));
                    let mut contents = chunk.lines.join("\n");
                    if !contents.is_empty() {
                        contents.push('\n');
                    }
                    if chunk.truncated {
                        contents.push_str(TRUNCATION_MARKER);
                        contents.push('\n');
                    }
                    write_atomic(&dir.join(&file_name), contents.as_bytes()).await?;
                    stored.log_file = Some(file_name);
                    stored.lines = Some(chunk.lines.len());
                    stored.truncated = chunk.truncated;
                    stored.method = Some(chunk.method);
                }
                UnitLog::FetchFailed { reason } => fetch_failures.push(FetchFailure {
                    unit: &unit.name,
                    reason,
                }),
                UnitLog::NotRequested => {}
            }
            units.push(stored);
        }

        let metadata = StoredRun {
            payload,
            run_status: run.status,
            created_at: run.created_at,
            finished_at: run.finished_at,
            units,
            delivery_mode: mode,
            stored_at: Utc::now(),
            fetch_failures,
        };
        let path = dir.join(METADATA_FILE);
        let bytes = serde_json::to_vec_pretty(&metadata).map_err(|e| RelayError::StorageFailure {
            path: path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
        write_atomic(&path, &bytes).await?;

        debug!(run_id = %run.run_id, path = %dir.display(), "DELIVERY | Run stored");
        Ok(dir)
    }
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), RelayError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    let storage_error = |source| RelayError::StorageFailure {
        path: path.to_path_buf(),
        source,
    };

    tokio::fs::write(&tmp, contents).await.map_err(storage_error)?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(storage_error(e));
    }
    Ok(())
}
