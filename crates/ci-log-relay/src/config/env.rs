// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Environment variable configuration.
//!
//! Every key can be set as `LOG_RELAY_<KEY>`, e.g. `LOG_RELAY_DELIVERY_MODE=file` or
//! `LOG_RELAY_UNIT_STATUS_ALLOW=failed,unstable`.

use figment::{providers::Env, Figment};

use crate::config::{merge_config, Config, ConfigError, ConfigSource, SourceConfig};

pub const ENV_PREFIX: &str = "LOG_RELAY_";

#[derive(Debug, Default)]
#[allow(clippy::module_name_repetitions)]
pub struct EnvConfigSource;

impl ConfigSource for EnvConfigSource {
    fn load(&self, config: &mut Config) -> Result<(), ConfigError> {
        let figment = Figment::new().merge(Env::prefixed(ENV_PREFIX));

        match figment.extract::<SourceConfig>() {
            Ok(env_config) => merge_config(config, &env_config),
            Err(e) => {
                return Err(ConfigError::ParseError(format!(
                    "Failed to parse config from environment variables: {e}, using default config."
                )));
            }
        }

        Ok(())
    }
}
