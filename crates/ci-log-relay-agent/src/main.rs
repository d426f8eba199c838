// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Runs the relay over saved webhook payloads.
//!
//! ```text
//! ci-log-relay <platform> <payload.json> [<platform> <payload.json> ...]
//! ```
//!
//! Configuration comes from the YAML file named by `LOG_RELAY_CONFIG_FILE` (default
//! `ci-log-relay.yaml`, optional) and `LOG_RELAY_*` environment variables.

use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use ci_log_relay::config::{env::EnvConfigSource, yaml::YamlConfigSource, Config, ConfigBuilder};
use ci_log_relay::event::CiEvent;
use ci_log_relay::logger;
use ci_log_relay::model::Platform;
use ci_log_relay::processor::Collaborators;
use ci_log_relay::service::RelayService;

const DEFAULT_CONFIG_FILE: &str = "ci-log-relay.yaml";
/// Grace period for in-flight runs once Ctrl-C is received.
const INTERRUPT_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let config = load_config();
    init_logging(&config)?;
    config.validate().context("invalid configuration")?;

    let events = parse_args(env::args().skip(1).collect())?;
    debug!("Replaying {} event(s)", events.len());

    let handle = RelayService::start(&config, Collaborators::from_config(&config))
        .context("failed to start relay service")?;

    let mut interrupted = false;
    for (platform, path) in events {
        let payload = match tokio::fs::read(&path).await {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to read {}: {}", path.display(), e);
                continue;
            }
        };
        tokio::select! {
            result = handle.submit(CiEvent::new(platform, payload)) => {
                if let Err(e) = result {
                    error!("Failed to submit {}: {}", path.display(), e);
                    break;
                }
                info!(platform = %platform, "Queued {}", path.display());
            }
            _ = tokio::signal::ctrl_c() => {
                interrupted = true;
                break;
            }
        }
    }

    let grace = if interrupted {
        warn!("Interrupted, shutting down");
        INTERRUPT_GRACE
    } else {
        config.run_timeout
    };
    handle.shutdown(grace).await;
    Ok(())
}

fn load_config() -> Config {
    let path = env::var("LOG_RELAY_CONFIG_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut builder = ConfigBuilder::default();
    if path.exists() {
        builder = builder.add_source(Box::new(YamlConfigSource { path }));
    }
    builder.add_source(Box::new(EnvConfigSource)).build()
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_new(config.log_level.env_filter_directive())
        .context("could not parse log level in configuration")?;

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .event_format(logger::Formatter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    debug!("Logging subsystem enabled");
    Ok(())
}

fn parse_args(args: Vec<String>) -> anyhow::Result<Vec<(Platform, PathBuf)>> {
    if args.is_empty() || args.len() % 2 != 0 {
        bail!("usage: ci-log-relay <gitlab|jenkins> <payload.json> [...]");
    }
    args.chunks(2)
        .map(|pair| {
            let platform = pair[0].parse::<Platform>().map_err(anyhow::Error::msg)?;
            Ok((platform, PathBuf::from(&pair[1])))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let events = parse_args(vec![
            "gitlab".to_string(),
            "hook.json".to_string(),
            "Jenkins".to_string(),
            "build.json".to_string(),
        ])
        .expect("valid args");
        assert_eq!(
            events,
            vec![
                (Platform::Gitlab, PathBuf::from("hook.json")),
                (Platform::Jenkins, PathBuf::from("build.json")),
            ]
        );
    }

    #[test]
    fn test_parse_args_rejects_odd_or_unknown() {
        assert!(parse_args(vec!["gitlab".to_string()]).is_err());
        assert!(parse_args(vec!["circleci".to_string(), "x.json".to_string()]).is_err());
    }
}
