// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP adapters for the CI platforms.
//!
//! The clients only translate requests and responses. Retries and circuit breaking are
//! applied by their callers through [`crate::reliability::Reliability`].

pub mod gitlab;
pub mod jenkins;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::CONTENT_RANGE;
use reqwest::{Response, StatusCode};

use crate::error::HttpError;
use crate::model::Unit;
use crate::retriever::TailRead;

/// Stage structure of a Jenkins build.
#[async_trait]
pub trait BuildMetadataSource: Send + Sync {
    fn target(&self, server_url: &str) -> String;

    /// Top-level stages in execution order, parallel branches as children.
    async fn fetch_units(
        &self,
        server_url: &str,
        job_name: &str,
        build_number: &str,
    ) -> Result<Vec<Unit>, HttpError>;
}

/// Read-only lookups used to name the actor behind a proxied GitLab event.
#[async_trait]
pub trait ActorLookup: Send + Sync {
    fn target(&self) -> String;

    async fn merge_request_author(&self, project: &str, iid: &str) -> Result<String, HttpError>;

    async fn commit_author(&self, project: &str, sha: &str) -> Result<String, HttpError>;

    async fn branch_author(&self, project: &str, branch: &str) -> Result<String, HttpError>;
}

/// `Range` header value asking for the last `max_bytes` bytes.
#[must_use]
pub fn suffix_range(max_bytes: u64) -> String {
    format!("bytes=-{max_bytes}")
}

/// Parses `bytes <start>-<end>/<total>`; the total may be `*`.
#[must_use]
pub fn parse_content_range(value: &str) -> Option<(u64, Option<u64>)> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let (start, _end) = range.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };
    Some((start, total))
}

/// Turns a checked log response into a [`TailRead`], streaming its body.
#[must_use]
pub fn tail_read_from(response: Response) -> TailRead {
    let ranged = response.status() == StatusCode::PARTIAL_CONTENT;
    let (start, total) = if ranged {
        response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range)
            .unwrap_or((1, None))
    } else {
        (0, None)
    };

    TailRead {
        ranged,
        start,
        total,
        body: response
            .bytes_stream()
            .map(|chunk| chunk.map_err(HttpError::from))
            .boxed(),
    }
}

/// Percent-encodes a GitLab project path for use as `:id`.
#[must_use]
pub fn encode_project(project: &str) -> String {
    let mut encoded = String::with_capacity(project.len());
    for byte in project.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(char::from(byte));
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_range() {
        assert_eq!(parse_content_range("bytes 100-199/200"), Some((100, Some(200))));
        assert_eq!(parse_content_range("bytes 0-10/*"), Some((0, None)));
        assert_eq!(parse_content_range("items 0-10/20"), None);
        assert_eq!(parse_content_range("bytes x-10/20"), None);
    }

    #[test]
    fn test_encode_project() {
        assert_eq!(encode_project("group/sub group/app"), "group%2Fsub%20group%2Fapp");
        assert_eq!(encode_project("1234"), "1234");
    }

    #[test]
    fn test_suffix_range() {
        assert_eq!(suffix_range(1_000_000), "bytes=-1000000");
    }
}
