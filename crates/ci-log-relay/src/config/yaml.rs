// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! YAML file configuration.
//!
//! ```yaml
//! log_level: info
//! gitlab_url: https://gitlab.example.com
//! unit_status_allow: [failed, unstable]
//! delivery_mode: dual
//! delivery_url: https://analysis.example.com/api/runs
//! error_patterns:
//!   - '\bERR!'
//!   - 'undefined reference'
//! ```

use std::path::PathBuf;

use figment::{
    providers::{Format, Yaml},
    Figment,
};

use crate::config::{merge_config, Config, ConfigError, ConfigSource, SourceConfig};

#[allow(clippy::module_name_repetitions)]
pub struct YamlConfigSource {
    pub path: PathBuf,
}

impl ConfigSource for YamlConfigSource {
    fn load(&self, config: &mut Config) -> Result<(), ConfigError> {
        let figment = Figment::new().merge(Yaml::file(self.path.clone()));

        match figment.extract::<SourceConfig>() {
            Ok(yaml_config) => merge_config(config, &yaml_config),
            Err(e) => {
                return Err(ConfigError::ParseError(format!(
                    "Failed to parse config from yaml file: {e}, using default config."
                )));
            }
        }

        Ok(())
    }
}
