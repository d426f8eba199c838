// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of processed runs.
//!
//! Every run resolves to exactly one [`DeliveryState`]: delivered to the analysis API,
//! stored on disk (by configuration or as a fallback) or failed because even the fallback
//! write did not succeed.

pub mod dispatcher;
pub mod payload;
pub mod signer;
pub mod storage;

use core::time::Duration;
use std::path::PathBuf;

use serde::Serialize;

use crate::config::delivery_mode::DeliveryMode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryConfig {
    pub mode: DeliveryMode,
    pub url: Option<String>,
    pub storage_dir: PathBuf,
    pub max_error_lines: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::Api,
            url: None,
            storage_dir: PathBuf::from("relay-logs"),
            max_error_lines: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryTarget {
    Api,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Success,
    Failure,
    Fallback,
}

/// One delivery step of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryAttempt {
    pub target: DeliveryTarget,
    pub outcome: AttemptOutcome,
    #[serde(serialize_with = "serialize_millis")]
    pub latency: Duration,
    /// Attempts beyond the first.
    pub retries: u32,
}

fn serialize_millis<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryState {
    Delivered,
    DeliveredAndStored { path: PathBuf },
    Stored { path: PathBuf },
    Fallback { path: PathBuf, reason: String },
    Failed { reason: String },
}

impl DeliveryState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DeliveryState::Delivered => "delivered",
            DeliveryState::DeliveredAndStored { .. } => "delivered_and_stored",
            DeliveryState::Stored { .. } => "stored",
            DeliveryState::Fallback { .. } => "fallback",
            DeliveryState::Failed { .. } => "failed",
        }
    }

    /// Where the run was written, if it was.
    #[must_use]
    pub fn stored_at(&self) -> Option<&PathBuf> {
        match self {
            DeliveryState::DeliveredAndStored { path }
            | DeliveryState::Stored { path }
            | DeliveryState::Fallback { path, .. } => Some(path),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, DeliveryState::Failed { .. })
    }
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
