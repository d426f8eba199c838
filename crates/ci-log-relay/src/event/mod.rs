// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event normalization.
//!
//! Both platform payloads resolve here into one [`PipelineRun`]; nothing downstream branches
//! on the payload shape again. GitLab hooks are self-contained. Jenkins notifications need
//! one metadata call for the stage structure and, for builds triggered through the GitLab
//! plugin, read-only actor lookups.

pub mod gitlab;
pub mod jenkins;

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

use crate::error::RelayError;
use crate::model::{PipelineRun, Platform};
use crate::platform::{ActorLookup, BuildMetadataSource};
use crate::reliability::Reliability;

/// A completion payload as received by the webhook front end.
#[derive(Debug, Clone, PartialEq)]
pub struct CiEvent {
    pub platform: Platform,
    pub payload: Bytes,
}

impl CiEvent {
    pub fn new(platform: Platform, payload: impl Into<Bytes>) -> Self {
        Self {
            platform,
            payload: payload.into(),
        }
    }
}

#[derive(Clone)]
pub struct EventNormalizer {
    reliability: Reliability,
    metadata: Option<Arc<dyn BuildMetadataSource>>,
    actors: Option<Arc<dyn ActorLookup>>,
}

impl std::fmt::Debug for EventNormalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventNormalizer")
            .field("metadata", &self.metadata.is_some())
            .field("actors", &self.actors.is_some())
            .finish_non_exhaustive()
    }
}

impl EventNormalizer {
    #[must_use]
    pub fn new(
        reliability: Reliability,
        metadata: Option<Arc<dyn BuildMetadataSource>>,
        actors: Option<Arc<dyn ActorLookup>>,
    ) -> Self {
        Self {
            reliability,
            metadata,
            actors,
        }
    }

    pub async fn normalize(&self, event: &CiEvent) -> Result<PipelineRun, RelayError> {
        match event.platform {
            Platform::Gitlab => gitlab::normalize(&event.payload),
            Platform::Jenkins => {
                jenkins::normalize(
                    &event.payload,
                    &self.reliability,
                    self.metadata.as_deref(),
                    self.actors.as_deref(),
                )
                .await
            }
        }
    }
}

/// Parses a payload into a JSON object.
pub(crate) fn parse_object<T: serde::de::DeserializeOwned>(
    platform: Platform,
    payload: &[u8],
) -> Result<T, RelayError> {
    serde_json::from_slice(payload)
        .map_err(|e| RelayError::malformed(platform, format!("invalid JSON: {e}")))
}

/// Identifiers arrive as numbers or strings depending on the platform version.
pub(crate) fn id_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Accepts RFC 3339 and GitLab's `2024-03-01 10:22:33 UTC` / `+0100` forms.
pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(value) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S %z") {
        return Some(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S UTC")
        .ok()
        .map(|t| t.and_utc())
}
