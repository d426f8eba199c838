// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Relay configuration.
//!
//! ## Configuration Priority
//!
//! Sources are applied in order, later sources overriding earlier ones:
//!
//! 1. **Defaults** - [`Config::default`]
//! 2. **YAML file** - see [`yaml::YamlConfigSource`]
//! 3. **Environment variables** - `LOG_RELAY_*`, see [`env::EnvConfigSource`]
//!
//! ## Edge Cases
//!
//! - Lists (`run_status_allow`, `project_allow`, ...) accept an array or a comma separated
//!   string. Unknown status names are logged and dropped.
//! - Empty strings are treated as unset.
//! - URLs without a scheme get `https://`; trailing slashes are removed.
//! - `proxy_https` falls back to the `HTTPS_PROXY` environment variable.

pub mod delivery_mode;
pub mod env;
pub mod log_level;
pub mod patterns;
pub mod yaml;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, error};

use crate::config::{delivery_mode::DeliveryMode, log_level::LogLevel};
use crate::delivery::DeliveryConfig;
use crate::extractor::ExtractionConfig;
use crate::filter::FilterConfig;
use crate::model::RunStatus;
use crate::reliability::ReliabilityConfig;
use crate::retriever::RetrievalConfig;

/// Helper macro to merge `Option<String>` fields to `String` fields
#[macro_export]
macro_rules! merge_string {
    ($config:expr, $config_field:ident, $source:expr, $source_field:ident) => {
        if let Some(value) = &$source.$source_field {
            $config.$config_field.clone_from(value);
        }
    };
    ($config:expr, $source:expr, $field:ident) => {
        if let Some(value) = &$source.$field {
            $config.$field.clone_from(value);
        }
    };
}

/// Helper macro to merge `Option<T>` fields into `Option<T>` fields when the source is `Some`
#[macro_export]
macro_rules! merge_option {
    ($config:expr, $config_field:ident, $source:expr, $source_field:ident) => {
        if $source.$source_field.is_some() {
            $config.$config_field.clone_from(&$source.$source_field);
        }
    };
    ($config:expr, $source:expr, $field:ident) => {
        if $source.$field.is_some() {
            $config.$field.clone_from(&$source.$field);
        }
    };
}

/// Helper macro to merge `Option<T>` fields to `T` fields when `Option<T>` is `Some`
#[macro_export]
macro_rules! merge_option_to_value {
    ($config:expr, $config_field:ident, $source:expr, $source_field:ident) => {
        if let Some(value) = &$source.$source_field {
            $config.$config_field = value.clone();
        }
    };
    ($config:expr, $source:expr, $field:ident) => {
        if let Some(value) = &$source.$field {
            $config.$field = value.clone();
        }
    };
}

/// Helper macro to merge `Option<u64>` second counts into `Duration` fields
#[macro_export]
macro_rules! merge_duration_secs {
    ($config:expr, $config_field:ident, $source:expr, $source_field:ident) => {
        if let Some(value) = $source.$source_field {
            $config.$config_field = std::time::Duration::from_secs(value);
        }
    };
}

/// Helper macro to merge `Vec` fields when `Vec` is not empty
#[macro_export]
macro_rules! merge_vec {
    ($config:expr, $config_field:ident, $source:expr, $source_field:ident) => {
        if !$source.$source_field.is_empty() {
            $config.$config_field.clone_from(&$source.$source_field);
        }
    };
    ($config:expr, $source:expr, $field:ident) => {
        if !$source.$field.is_empty() {
            $config.$field.clone_from(&$source.$field);
        }
    };
}

#[derive(Debug, PartialEq, thiserror::Error)]
#[allow(clippy::module_name_repetitions)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    ParseError(String),
    #[error("unsupported config field: {0}")]
    UnsupportedField(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[allow(clippy::module_name_repetitions)]
pub trait ConfigSource {
    fn load(&self, config: &mut Config) -> Result<(), ConfigError>;
}

#[derive(Default)]
#[allow(clippy::module_name_repetitions)]
pub struct ConfigBuilder {
    sources: Vec<Box<dyn ConfigSource>>,
    config: Config,
}

#[allow(clippy::module_name_repetitions)]
impl ConfigBuilder {
    #[must_use]
    pub fn add_source(mut self, source: Box<dyn ConfigSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn build(&mut self) -> Config {
        let mut failed_sources = 0;
        for source in &self.sources {
            match source.load(&mut self.config) {
                Ok(()) => (),
                Err(e) => {
                    error!("Failed to load config: {}", e);
                    failed_sources += 1;
                }
            }
        }

        if !self.sources.is_empty() && failed_sources == self.sources.len() {
            debug!("All sources failed to load config, using default config.");
        }

        // If `proxy_https` is not set, set it from `HTTPS_PROXY` environment variable
        if self.config.proxy_https.is_none() {
            if let Ok(https_proxy) = std::env::var("HTTPS_PROXY") {
                if !https_proxy.trim().is_empty() {
                    self.config.proxy_https = Some(https_proxy);
                }
            }
        }

        self.config.gitlab_url = normalize_url(&self.config.gitlab_url);
        self.config.jenkins_url = self.config.jenkins_url.as_deref().map(normalize_url);
        self.config.delivery_url = self.config.delivery_url.as_deref().map(normalize_url);

        self.config.clone()
    }
}

/// Adds `https://` to scheme-less URLs and strips trailing slashes.
#[must_use]
pub fn normalize_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');

    if url.is_empty() || url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

#[derive(Debug, PartialEq, Clone)]
#[allow(clippy::module_name_repetitions)]
#[allow(clippy::struct_excessive_bools)]
pub struct Config {
    pub log_level: LogLevel,

    // Platforms
    pub gitlab_url: String,
    pub gitlab_token: Option<String>,
    pub jenkins_url: Option<String>,
    pub jenkins_user: Option<String>,
    pub jenkins_token: Option<String>,

    // Filter
    pub run_status_allow: Vec<RunStatus>,
    pub unit_status_allow: Vec<RunStatus>,
    pub project_allow: Vec<String>,
    pub project_deny: Vec<String>,
    pub record_metadata_always: bool,

    // Retrieval
    pub tail_lines: usize,
    pub tail_bytes_per_line: usize,
    pub max_log_lines: usize,
    pub max_log_bytes: usize,
    pub max_line_bytes: usize,
    pub chunk_timeout: Duration,

    // Extraction
    pub context_before: usize,
    pub context_after: usize,
    pub max_error_lines: usize,
    pub error_patterns: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub extract_successful_units: bool,

    // Reliability
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub circuit_failure_threshold: u32,
    pub circuit_cooldown: Duration,

    // Delivery
    pub delivery_mode: DeliveryMode,
    pub delivery_url: Option<String>,
    pub delivery_token: Option<String>,
    pub storage_dir: PathBuf,

    // Runtime
    pub request_timeout: Duration,
    pub max_concurrent_units: usize,
    pub run_timeout: Duration,
    pub proxy_https: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),

            gitlab_url: "https://gitlab.com".to_string(),
            gitlab_token: None,
            jenkins_url: None,
            jenkins_user: None,
            jenkins_token: None,

            run_status_allow: Vec::new(),
            unit_status_allow: Vec::new(),
            project_allow: Vec::new(),
            project_deny: Vec::new(),
            record_metadata_always: false,

            tail_lines: 5_000,
            tail_bytes_per_line: 200,
            max_log_lines: 100_000,
            max_log_bytes: 32 * 1024 * 1024,
            max_line_bytes: 4 * 1024,
            chunk_timeout: Duration::from_secs(30),

            context_before: 50,
            context_after: 10,
            max_error_lines: 50,
            error_patterns: patterns::default_error_patterns(),
            ignore_patterns: patterns::default_ignore_patterns(),
            extract_successful_units: false,

            retry_attempts: 3,
            retry_delay: Duration::from_millis(1_000),
            circuit_failure_threshold: 5,
            circuit_cooldown: Duration::from_secs(60),

            delivery_mode: DeliveryMode::default(),
            delivery_url: None,
            delivery_token: None,
            storage_dir: PathBuf::from("relay-logs"),

            request_timeout: Duration::from_secs(30),
            max_concurrent_units: 4,
            run_timeout: Duration::from_secs(600),
            proxy_https: None,
        }
    }
}

impl Config {
    /// Checks the values no later stage can work around.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.delivery_mode.uses_api()
            && self.delivery_url.as_deref().map_or(true, str::is_empty)
        {
            return Err(ConfigError::Invalid(format!(
                "delivery_url is required in {} delivery mode",
                self.delivery_mode
            )));
        }
        if let Some(url) = &self.delivery_url {
            reqwest::Url::parse(url)
                .map_err(|e| ConfigError::Invalid(format!("delivery_url '{url}': {e}")))?;
        }

        let ceilings = [
            ("tail_lines", self.tail_lines),
            ("tail_bytes_per_line", self.tail_bytes_per_line),
            ("max_log_lines", self.max_log_lines),
            ("max_log_bytes", self.max_log_bytes),
            ("max_line_bytes", self.max_line_bytes),
            ("max_error_lines", self.max_error_lines),
            ("max_concurrent_units", self.max_concurrent_units),
        ];
        for (name, value) in ceilings {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
            }
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry_attempts must be greater than 0".to_string(),
            ));
        }
        if self.circuit_failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit_failure_threshold must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn filter_config(&self) -> FilterConfig {
        FilterConfig {
            run_status_allow: self.run_status_allow.clone(),
            unit_status_allow: self.unit_status_allow.clone(),
            project_allow: self.project_allow.clone(),
            project_deny: self.project_deny.clone(),
            record_metadata_always: self.record_metadata_always,
        }
    }

    #[must_use]
    pub fn retrieval_config(&self) -> RetrievalConfig {
        RetrievalConfig {
            tail_lines: self.tail_lines,
            tail_bytes_per_line: self.tail_bytes_per_line,
            max_log_lines: self.max_log_lines,
            max_log_bytes: self.max_log_bytes,
            max_line_bytes: self.max_line_bytes,
            chunk_timeout: self.chunk_timeout,
        }
    }

    #[must_use]
    pub fn extraction_config(&self) -> ExtractionConfig {
        ExtractionConfig {
            context_before: self.context_before,
            context_after: self.context_after,
            max_error_lines: self.max_error_lines,
            error_patterns: self.error_patterns.clone(),
            ignore_patterns: self.ignore_patterns.clone(),
            extract_successful_units: self.extract_successful_units,
        }
    }

    #[must_use]
    pub fn reliability_config(&self) -> ReliabilityConfig {
        ReliabilityConfig {
            retry_attempts: self.retry_attempts,
            retry_delay: self.retry_delay,
            failure_threshold: self.circuit_failure_threshold,
            cooldown: self.circuit_cooldown,
        }
    }

    #[must_use]
    pub fn delivery_config(&self) -> DeliveryConfig {
        DeliveryConfig {
            mode: self.delivery_mode,
            url: self.delivery_url.clone(),
            storage_dir: self.storage_dir.clone(),
            max_error_lines: self.max_error_lines,
        }
    }
}

/// Optional view of every key, shared by the YAML and environment sources.
#[derive(Debug, PartialEq, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SourceConfig {
    pub log_level: Option<LogLevel>,

    #[serde(deserialize_with = "deserialize_optional_string")]
    pub gitlab_url: Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub gitlab_token: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub jenkins_url: Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub jenkins_user: Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub jenkins_token: Option<String>,

    #[serde(deserialize_with = "deserialize_string_list")]
    pub run_status_allow: Vec<String>,
    #[serde(deserialize_with = "deserialize_string_list")]
    pub unit_status_allow: Vec<String>,
    #[serde(deserialize_with = "deserialize_string_list")]
    pub project_allow: Vec<String>,
    #[serde(deserialize_with = "deserialize_string_list")]
    pub project_deny: Vec<String>,
    #[serde(deserialize_with = "deserialize_optional_bool_from_anything")]
    pub record_metadata_always: Option<bool>,

    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub tail_lines: Option<usize>,
    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub tail_bytes_per_line: Option<usize>,
    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub max_log_lines: Option<usize>,
    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub max_log_bytes: Option<usize>,
    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub max_line_bytes: Option<usize>,
    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub chunk_timeout_secs: Option<u64>,

    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub context_before: Option<usize>,
    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub context_after: Option<usize>,
    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub max_error_lines: Option<usize>,
    #[serde(deserialize_with = "patterns::deserialize_patterns")]
    pub error_patterns: Option<Vec<String>>,
    #[serde(deserialize_with = "patterns::deserialize_patterns")]
    pub ignore_patterns: Option<Vec<String>>,
    #[serde(deserialize_with = "deserialize_optional_bool_from_anything")]
    pub extract_successful_units: Option<bool>,

    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub retry_attempts: Option<u32>,
    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub retry_delay_ms: Option<u64>,
    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub circuit_failure_threshold: Option<u32>,
    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub circuit_cooldown_secs: Option<u64>,

    pub delivery_mode: Option<DeliveryMode>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub delivery_url: Option<String>,
    #[serde(deserialize_with = "deserialize_string_or_int")]
    pub delivery_token: Option<String>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub storage_dir: Option<String>,

    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub request_timeout_secs: Option<u64>,
    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub max_concurrent_units: Option<usize>,
    #[serde(deserialize_with = "deserialize_option_lossless")]
    pub run_timeout_secs: Option<u64>,
    #[serde(deserialize_with = "deserialize_optional_string")]
    pub proxy_https: Option<String>,
}

fn parse_statuses(field: &str, values: &[String]) -> Vec<RunStatus> {
    values
        .iter()
        .filter_map(|value| match RunStatus::from_str(value) {
            Ok(status) => Some(status),
            Err(e) => {
                error!("Invalid entry in {}: {}, ignoring", field, e);
                None
            }
        })
        .collect()
}

#[allow(clippy::module_name_repetitions)]
pub fn merge_config(config: &mut Config, source: &SourceConfig) {
    merge_option_to_value!(config, source, log_level);

    merge_string!(config, source, gitlab_url);
    merge_option!(config, source, gitlab_token);
    merge_option!(config, source, jenkins_url);
    merge_option!(config, source, jenkins_user);
    merge_option!(config, source, jenkins_token);

    if !source.run_status_allow.is_empty() {
        config.run_status_allow = parse_statuses("run_status_allow", &source.run_status_allow);
    }
    if !source.unit_status_allow.is_empty() {
        config.unit_status_allow = parse_statuses("unit_status_allow", &source.unit_status_allow);
    }
    merge_vec!(config, source, project_allow);
    merge_vec!(config, source, project_deny);
    merge_option_to_value!(config, source, record_metadata_always);

    merge_option_to_value!(config, source, tail_lines);
    merge_option_to_value!(config, source, tail_bytes_per_line);
    merge_option_to_value!(config, source, max_log_lines);
    merge_option_to_value!(config, source, max_log_bytes);
    merge_option_to_value!(config, source, max_line_bytes);
    merge_duration_secs!(config, chunk_timeout, source, chunk_timeout_secs);

    merge_option_to_value!(config, source, context_before);
    merge_option_to_value!(config, source, context_after);
    merge_option_to_value!(config, source, max_error_lines);
    merge_option_to_value!(config, source, error_patterns);
    merge_option_to_value!(config, source, ignore_patterns);
    merge_option_to_value!(config, source, extract_successful_units);

    merge_option_to_value!(config, source, retry_attempts);
    if let Some(ms) = source.retry_delay_ms {
        config.retry_delay = Duration::from_millis(ms);
    }
    merge_option_to_value!(config, source, circuit_failure_threshold);
    merge_duration_secs!(config, circuit_cooldown, source, circuit_cooldown_secs);

    merge_option_to_value!(config, source, delivery_mode);
    merge_option!(config, source, delivery_url);
    merge_option!(config, source, delivery_token);
    if let Some(dir) = &source.storage_dir {
        config.storage_dir = PathBuf::from(dir);
    }

    merge_duration_secs!(config, request_timeout, source, request_timeout_secs);
    merge_option_to_value!(config, source, max_concurrent_units);
    merge_duration_secs!(config, run_timeout, source, run_timeout_secs);
    merge_option!(config, source, proxy_https);
}

pub fn deserialize_optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => Ok(Some(s.trim().to_string())),
        Value::Null => Ok(None),
        other => {
            error!(
                "Failed to parse value, expected a string, got: {}, ignoring",
                other
            );
            Ok(None)
        }
    }
}

pub fn deserialize_string_or_int<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                Ok(Some(s))
            }
        }
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Null => Ok(None),
        _ => {
            error!("Failed to parse value, expected a string or an integer, ignoring");
            Ok(None)
        }
    }
}

pub fn deserialize_optional_bool_from_anything<'de, D>(
    deserializer: D,
) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Bool(b) => Ok(Some(b)),
        Value::Number(n) if n.as_u64() == Some(1) => Ok(Some(true)),
        Value::Number(n) if n.as_u64() == Some(0) => Ok(Some(false)),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => {
                error!("Failed to parse bool value: {}, ignoring", s);
                Ok(None)
            }
        },
        Value::Null => Ok(None),
        other => {
            error!("Failed to parse bool value: {}, ignoring", other);
            Ok(None)
        }
    }
}

/// Accepts `"a, b"` as well as `["a", "b"]`. Blank entries are dropped.
pub fn deserialize_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ListVisitor;

    impl<'de> serde::de::Visitor<'de> for ListVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a comma separated string or an array of strings")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value
                .split(',')
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect())
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::SeqAccess<'de>,
        {
            let mut items = Vec::new();
            while let Some(value) = seq.next_element::<Value>()? {
                match value {
                    Value::String(s) if !s.trim().is_empty() => items.push(s.trim().to_string()),
                    Value::Number(n) => items.push(n.to_string()),
                    other => error!("Invalid list entry {}, ignoring", other),
                }
            }
            Ok(items)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(Vec::new())
        }
    }

    deserializer.deserialize_any(ListVisitor)
}

pub fn deserialize_option_lossless<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    match Option::<T>::deserialize(deserializer) {
        Ok(value) => Ok(value),
        Err(e) => {
            error!("Failed to deserialize optional value: {}, ignoring", e);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("gitlab.example.com/"), "https://gitlab.example.com");
        assert_eq!(normalize_url(" http://ci:8080 "), "http://ci:8080");
        assert_eq!(normalize_url(""), "");
    }

    #[test]
    fn test_default_config_requires_delivery_url() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = Config {
            delivery_mode: DeliveryMode::File,
            ..Config::default()
        };
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_zero_ceilings() {
        let config = Config {
            delivery_url: Some("https://analysis.example.com/runs".to_string()),
            max_log_lines: 0,
            ..Config::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Invalid(
                "max_log_lines must be greater than 0".to_string()
            ))
        );
    }

    #[test]
    fn test_validate_rejects_bad_delivery_url() {
        let config = Config {
            delivery_url: Some("not a url".to_string()),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_parses_status_lists() {
        let mut config = Config::default();
        let source = SourceConfig {
            run_status_allow: vec!["failed".into(), "bogus".into(), "unstable".into()],
            retry_delay_ms: Some(250),
            storage_dir: Some("/var/lib/relay".into()),
            ..SourceConfig::default()
        };
        merge_config(&mut config, &source);

        assert_eq!(
            config.run_status_allow,
            vec![RunStatus::Failed, RunStatus::Unstable]
        );
        assert_eq!(config.retry_delay, Duration::from_millis(250));
        assert_eq!(config.storage_dir, PathBuf::from("/var/lib/relay"));
        assert_eq!(config.tail_lines, 5_000);
    }

    #[test]
    fn test_string_list_accepts_both_forms() {
        #[derive(Deserialize)]
        struct Holder {
            #[serde(deserialize_with = "deserialize_string_list")]
            items: Vec<String>,
        }

        let holder: Holder =
            serde_json::from_str(r#"{"items": "a, b,,c"}"#).expect("failed to parse");
        assert_eq!(holder.items, vec!["a", "b", "c"]);

        let holder: Holder =
            serde_json::from_str(r#"{"items": ["a", 7, null]}"#).expect("failed to parse");
        assert_eq!(holder.items, vec!["a", "7"]);
    }

    #[test]
    fn test_lenient_scalars() {
        let source: SourceConfig = serde_json::from_value(serde_json::json!({
            "tail_lines": "many",
            "gitlab_token": 12345,
            "extract_successful_units": "yes"
        }))
        .expect("failed to parse");
        assert_eq!(source.tail_lines, None);
        assert_eq!(source.gitlab_token, Some("12345".to_string()));
        assert_eq!(source.extract_successful_units, Some(true));
    }

    #[test]
    fn test_accessors_carry_values() {
        let config = Config {
            retry_attempts: 7,
            max_error_lines: 20,
            ..Config::default()
        };
        assert_eq!(config.reliability_config().retry_attempts, 7);
        assert_eq!(config.extraction_config().max_error_lines, 20);
        assert_eq!(config.delivery_config().max_error_lines, 20);
        assert_eq!(config.retrieval_config().tail_lines, 5_000);
        assert!(config.filter_config().project_allow.is_empty());
    }
}
