// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! How a processed run leaves the relay.
//!
//! - `Api`: POST to the analysis endpoint, storage only as fallback (default)
//! - `Dual`: POST, then always store a copy
//! - `File`: store only, no network delivery

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    #[default]
    Api,
    Dual,
    File,
}

impl DeliveryMode {
    /// Whether runs are posted to the analysis endpoint.
    #[must_use]
    pub const fn uses_api(self) -> bool {
        matches!(self, Self::Api | Self::Dual)
    }

    /// Whether every run is written to storage, independent of delivery.
    #[must_use]
    pub const fn always_stores(self) -> bool {
        matches!(self, Self::Dual | Self::File)
    }

    #[must_use]
    pub fn from_env_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "api" | "http" | "remote" => Some(Self::Api),
            "dual" | "both" | "api_and_file" => Some(Self::Dual),
            "file" | "files" | "local" | "storage" => Some(Self::File),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Dual => "dual",
            Self::File => "file",
        }
    }
}

impl std::fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DeliveryMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        if let Value::String(s) = &value {
            if let Some(mode) = DeliveryMode::from_env_str(s) {
                return Ok(mode);
            }
        }
        error!("Invalid delivery mode {}, using default", value);
        Ok(DeliveryMode::default())
    }
}
