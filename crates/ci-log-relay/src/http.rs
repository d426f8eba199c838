// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared HTTP plumbing for platform clients and the delivery dispatcher.

use core::time::Duration;
use std::error::Error;

use futures::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::{Response, StatusCode};
use tracing::error;

use crate::config::Config;
use crate::error::HttpError;

/// Longest response body kept in an `HttpError::Status`.
const ERROR_BODY_LIMIT: usize = 512;

/// Builds the process-wide client, falling back to a direct connection when the proxy
/// configuration is unusable.
///
/// `request_timeout` bounds connecting and each read, not the whole exchange: trace
/// streams may take as long as their chunks keep arriving.
#[must_use]
pub fn get_client(config: &Config) -> reqwest::Client {
    match build_client(config, true) {
        Ok(client) => client,
        Err(e) => {
            error!(
                "HTTP | Unable to parse proxy configuration: {}, falling back to direct connection",
                e
            );
            match build_client(config, false) {
                Ok(client) => client,
                Err(inner) => {
                    error!(
                        "HTTP | Failed to build HTTP client without proxy: {}, using reqwest defaults",
                        inner
                    );
                    reqwest::Client::new()
                }
            }
        }
    }
}

fn build_client(config: &Config, allow_proxy: bool) -> Result<reqwest::Client, Box<dyn Error>> {
    let mut client = reqwest::Client::builder()
        .use_rustls_tls()
        .connect_timeout(config.request_timeout)
        .read_timeout(config.request_timeout)
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)));

    if allow_proxy {
        if let Some(https_uri) = &config.proxy_https {
            let proxy = reqwest::Proxy::https(https_uri.clone())?;
            client = client.proxy(proxy);
        }
    }

    Ok(client.build()?)
}

/// Maps a response status onto the error taxonomy.
pub fn classify_status(status: StatusCode, body: &str) -> Result<(), HttpError> {
    if status.is_success() {
        return Ok(());
    }
    let mut body = body.trim().to_string();
    if body.len() > ERROR_BODY_LIMIT {
        let mut cut = ERROR_BODY_LIMIT;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(HttpError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Passes 2xx responses through and turns the rest into `HttpError::Status`, keeping a
/// prefix of the body for diagnostics.
pub async fn check_response(response: Response) -> Result<Response, HttpError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = body_prefix(response, ERROR_BODY_LIMIT).await;
    match classify_status(status, &body) {
        Ok(()) => Err(HttpError::Status {
            status: status.as_u16(),
            body,
        }),
        Err(e) => Err(e),
    }
}

/// Reads at most `limit` bytes of the body, dropping the rest unread.
async fn body_prefix(response: Response, limit: usize) -> String {
    let mut stream = response.bytes_stream();
    let mut prefix = Vec::with_capacity(limit.min(4096));
    while prefix.len() < limit {
        match stream.next().await {
            Some(Ok(chunk)) => {
                let take = chunk.len().min(limit - prefix.len());
                prefix.extend_from_slice(&chunk[..take]);
            }
            _ => break,
        }
    }
    String::from_utf8_lossy(&prefix).into_owned()
}

/// Returns a redacted view of request headers suitable for debug logging.
#[must_use]
pub fn redact_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    const SENSITIVE_HEADERS: [&str; 3] = ["private-token", "authorization", "x-gitlab-token"];

    headers
        .iter()
        .map(|(name, value)| {
            let lower = name.as_str().to_ascii_lowercase();
            let display = if SENSITIVE_HEADERS.contains(&lower.as_str()) {
                "<redacted>".to_string()
            } else {
                value
                    .to_str()
                    .map(ToString::to_string)
                    .unwrap_or_else(|_| "<non-utf8>".to_string())
            };
            (lower, display)
        })
        .collect()
}

/// Circuit breaker identity of a URL: its host and port.
#[must_use]
pub fn target_of(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(parsed) => match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            _ => url.to_string(),
        },
        Err(_) => url.to_string(),
    }
}
