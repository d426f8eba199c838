// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Diagnostic pattern lists.
//!
//! Patterns are regular expressions matched case-insensitively against cleaned log lines.
//! Positive patterns mark a line as a diagnostic trigger, negative patterns veto a trigger.
//!
//! Both lists can be configured as a YAML array or, from the environment, as a JSON array
//! string:
//!
//! ```text
//! LOG_RELAY_ERROR_PATTERNS='["\\bERR!", "undefined reference"]'
//! ```

use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;

pub const DEFAULT_ERROR_PATTERNS: &[&str] = &[
    r"\berror\b",
    r"\berror:",
    r"\bERR!",
    r"\bfatal\b",
    r"\bfailed\b",
    r"\bfailure\b",
    r"\w+(?:error|exception)\b",
    r"\bpanicked at\b",
    r"traceback \(most recent call last\)",
    r"\bexit (?:code|status) [1-9]",
    r"\bsegmentation fault\b",
    r"\bcommand not found\b",
    r"\bno such file or directory\b",
    r"\bpermission denied\b",
    r"\bcould not resolve\b",
];

pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    r"\b0 errors?\b",
    r"\berrors?: 0\b",
    r"\b0 failed\b",
    r"\bfailed: 0\b",
    r"\bfailures?: 0\b",
    r"\bno errors? found\b",
    r"\ballow_failure\b",
];

#[must_use]
pub fn default_error_patterns() -> Vec<String> {
    DEFAULT_ERROR_PATTERNS.iter().map(ToString::to_string).collect()
}

#[must_use]
pub fn default_ignore_patterns() -> Vec<String> {
    DEFAULT_IGNORE_PATTERNS.iter().map(ToString::to_string).collect()
}

/// Deserializes a pattern list from a JSON array string or an array.
///
/// Non-string entries are logged and skipped. Regex validity is checked when the
/// extractor is built.
pub fn deserialize_patterns<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: JsonValue = Deserialize::deserialize(deserializer)?;

    let entries = match value {
        JsonValue::String(s) => match serde_json::from_str::<Vec<JsonValue>>(&s) {
            Ok(values) => values,
            Err(e) => {
                tracing::error!("Failed to parse pattern list: {}, ignoring", e);
                return Ok(None);
            }
        },
        JsonValue::Array(a) => a,
        JsonValue::Null => return Ok(None),
        other => {
            tracing::error!("Expected a pattern list, got {}, ignoring", other);
            return Ok(None);
        }
    };

    let mut patterns = Vec::new();
    for entry in entries {
        match entry {
            JsonValue::String(p) if !p.trim().is_empty() => patterns.push(p),
            other => tracing::error!("Invalid pattern entry {}, ignoring", other),
        }
    }

    if patterns.is_empty() {
        Ok(None)
    } else {
        Ok(Some(patterns))
    }
}
