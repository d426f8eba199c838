// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Build server credentials.
//!
//! A relay may receive notifications from several Jenkins instances. Credentials are
//! resolved per server URL through [`CredentialResolver`]; the agent uses the static
//! configuration, embedders can plug in their own lookup.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::config::{normalize_url, Config};

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub token: String,
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve_credentials(&self, server_url: &str) -> Option<Credentials>;
}

/// Credentials from the configuration, valid for the configured server only.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    server_url: Option<String>,
    credentials: Option<Credentials>,
}

impl StaticCredentials {
    #[must_use]
    pub fn new(server_url: Option<&str>, credentials: Option<Credentials>) -> Self {
        Self {
            server_url: server_url.map(normalize_url),
            credentials,
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let credentials = match (&config.jenkins_user, &config.jenkins_token) {
            (Some(user), Some(token)) => Some(Credentials {
                user: user.clone(),
                token: token.clone(),
            }),
            _ => None,
        };
        Self::new(config.jenkins_url.as_deref(), credentials)
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentials {
    async fn resolve_credentials(&self, server_url: &str) -> Option<Credentials> {
        match &self.server_url {
            Some(configured) if *configured != normalize_url(server_url) => None,
            _ => self.credentials.clone(),
        }
    }
}

pub type CredentialResolverFn = Arc<
    dyn Fn(String) -> Pin<Box<dyn Future<Output = Option<Credentials>> + Send>> + Send + Sync,
>;

/// Resolves credentials through a callback, once per server.
#[derive(Clone)]
pub struct CachedResolver {
    resolver_fn: CredentialResolverFn,
    cache: Arc<Mutex<HashMap<String, Arc<OnceCell<Option<Credentials>>>>>>,
}

impl CachedResolver {
    pub fn new(resolver_fn: CredentialResolverFn) -> Self {
        Self {
            resolver_fn,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn cell(&self, server_url: &str) -> Arc<OnceCell<Option<Credentials>>> {
        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(cache.entry(server_url.to_string()).or_default())
    }
}

impl Debug for CachedResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CachedResolver")
    }
}

#[async_trait]
impl CredentialResolver for CachedResolver {
    async fn resolve_credentials(&self, server_url: &str) -> Option<Credentials> {
        let server_url = normalize_url(server_url);
        let cell = self.cell(&server_url);
        cell.get_or_init(|| (self.resolver_fn)(server_url.clone()))
            .await
            .clone()
    }
}
