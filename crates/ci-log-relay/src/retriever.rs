// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded log retrieval.
//!
//! Every unit starts with one ranged *tail* read consumed into a ring buffer of at most
//! `tail_lines` lines. The tail is accepted when it already shows a diagnostic, when the
//! unit did not fail, or when it covers the whole log. Otherwise the full log is *streamed*
//! and kept up to `max_log_lines` / `max_log_bytes`; the streamed chunk replaces the tail.
//!
//! Memory stays bounded whatever the remote size: the ring buffer and the stream ceilings
//! bound the kept lines, each line is capped at `max_line_bytes`, and a response that
//! ignores the `Range` header still only fills the ring buffer.

use core::time::Duration;
use std::collections::VecDeque;
use std::ops::ControlFlow;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{HttpError, RelayError};
use crate::extractor::ErrorExtractor;
use crate::model::{LogChunk, RetrievalMethod, UnitRef};
use crate::reliability::{CallError, Reliability};

pub type ByteStream = BoxStream<'static, Result<Bytes, HttpError>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalConfig {
    pub tail_lines: usize,
    pub tail_bytes_per_line: usize,
    pub max_log_lines: usize,
    pub max_log_bytes: usize,
    pub max_line_bytes: usize,
    pub chunk_timeout: Duration,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            tail_lines: 5_000,
            tail_bytes_per_line: 200,
            max_log_lines: 100_000,
            max_log_bytes: 32 * 1024 * 1024,
            max_line_bytes: 4 * 1024,
            chunk_timeout: Duration::from_secs(30),
        }
    }
}

impl RetrievalConfig {
    #[must_use]
    pub fn tail_bytes(&self) -> u64 {
        u64::try_from(self.tail_lines.saturating_mul(self.tail_bytes_per_line)).unwrap_or(u64::MAX)
    }
}

/// Response to a ranged tail request.
pub struct TailRead {
    /// The server honored the range (206).
    pub ranged: bool,
    /// Offset of the first body byte in the full log.
    pub start: u64,
    /// Full log length, when the server reported it.
    pub total: Option<u64>,
    pub body: ByteStream,
}

impl TailRead {
    /// A 200 response carrying the whole log.
    #[must_use]
    pub fn full(body: ByteStream) -> Self {
        Self {
            ranged: false,
            start: 0,
            total: None,
            body,
        }
    }
}

impl std::fmt::Debug for TailRead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TailRead")
            .field("ranged", &self.ranged)
            .field("start", &self.start)
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

/// Per-platform access to unit logs.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Circuit breaker identity for requests about `unit`.
    fn target(&self, unit: &UnitRef) -> String;

    /// Requests the last `max_bytes` of the unit's log.
    async fn fetch_tail(&self, unit: &UnitRef, max_bytes: u64) -> Result<TailRead, HttpError>;

    /// Opens the full log as a byte stream.
    async fn open_stream(&self, unit: &UnitRef) -> Result<ByteStream, HttpError>;
}

/// Splits byte chunks into lines, capping each line at `max_line_bytes`.
#[derive(Debug)]
pub struct LineSplitter {
    buf: Vec<u8>,
    max_line_bytes: usize,
}

impl LineSplitter {
    #[must_use]
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line_bytes: max_line_bytes.max(1),
        }
    }

    /// Feeds `data`, calling `emit` for each completed line until it breaks.
    pub fn push<F>(&mut self, mut data: &[u8], mut emit: F) -> ControlFlow<()>
    where
        F: FnMut(String) -> ControlFlow<()>,
    {
        while let Some(pos) = data.iter().position(|b| *b == b'\n') {
            self.append(&data[..pos]);
            let line = self.take_line();
            if emit(line).is_break() {
                return ControlFlow::Break(());
            }
            data = &data[pos + 1..];
        }
        self.append(data);
        ControlFlow::Continue(())
    }

    /// The trailing line without a final newline, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.take_line())
        }
    }

    fn append(&mut self, part: &[u8]) {
        let room = self.max_line_bytes.saturating_sub(self.buf.len());
        self.buf.extend_from_slice(&part[..room.min(part.len())]);
    }

    fn take_line(&mut self) -> String {
        let mut bytes = std::mem::take(&mut self.buf);
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        let mut line = String::from_utf8_lossy(&bytes).into_owned();
        if line.len() > self.max_line_bytes {
            let mut cut = self.max_line_bytes;
            while !line.is_char_boundary(cut) {
                cut -= 1;
            }
            line.truncate(cut);
        }
        line
    }
}

#[derive(Debug)]
struct TailOutcome {
    lines: Vec<String>,
    covers_whole_log: bool,
}

#[derive(Debug, Clone)]
pub struct LogRetriever {
    config: RetrievalConfig,
    reliability: Reliability,
}

impl LogRetriever {
    #[must_use]
    pub fn new(config: RetrievalConfig, reliability: Reliability) -> Self {
        Self {
            config,
            reliability,
        }
    }

    #[must_use]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Produces the bounded log of one unit.
    pub async fn retrieve(
        &self,
        source: &dyn LogSource,
        unit: &UnitRef,
        extractor: &ErrorExtractor,
    ) -> Result<LogChunk, RelayError> {
        let target = source.target(unit);

        let tail = match self
            .reliability
            .call(&target, || self.read_tail(source, unit))
            .await
        {
            Ok(tail) => tail,
            // Empty logs cannot satisfy a suffix range.
            Err(CallError::Rejected(HttpError::Status { status: 416, .. })) => {
                debug!(unit = %unit.name, "RETRIEVER | Empty log");
                return Ok(LogChunk::empty());
            }
            Err(e) => return Err(retrieval_error(unit, e)),
        };

        if tail.lines.is_empty() && tail.covers_whole_log {
            return Ok(LogChunk::empty());
        }

        if tail.covers_whole_log
            || !unit.status.is_failure()
            || extractor.contains_diagnostic(&tail.lines)
        {
            debug!(
                unit = %unit.name,
                lines = tail.lines.len(),
                whole = tail.covers_whole_log,
                "RETRIEVER | Using tail"
            );
            return Ok(chunk_from(tail.lines, !tail.covers_whole_log, RetrievalMethod::Tail));
        }

        debug!(unit = %unit.name, "RETRIEVER | No diagnostic in tail, streaming full log");
        drop(tail);

        let chunk_timeout = self.config.chunk_timeout;
        let body = self
            .reliability
            .call(&target, || async move {
                timeout(chunk_timeout, source.open_stream(unit))
                    .await
                    .map_err(|_| HttpError::Timeout("opening log stream".to_string()))?
            })
            .await
            .map_err(|e| retrieval_error(unit, e))?;

        Ok(self.read_stream(unit, body).await)
    }

    async fn read_tail(&self, source: &dyn LogSource, unit: &UnitRef) -> Result<TailOutcome, HttpError> {
        // One byte more than the tail, so a range starting on a line boundary shows the
        // preceding newline and the first kept line is never mistaken for a partial one.
        let max_bytes = self.config.tail_bytes().saturating_add(1);
        let read = timeout(self.config.chunk_timeout, source.fetch_tail(unit, max_bytes))
            .await
            .map_err(|_| HttpError::Timeout("tail request".to_string()))??;

        let capacity = self.config.tail_lines.max(1);
        let mut ring: VecDeque<String> = VecDeque::with_capacity(capacity.min(1024));
        let mut overflowed = false;
        let mut skip_partial = read.ranged && read.start > 0;
        let mut splitter = LineSplitter::new(self.config.max_line_bytes);
        let mut body = read.body;

        let mut keep = |line: String| {
            if skip_partial {
                skip_partial = false;
                return ControlFlow::Continue(());
            }
            if ring.len() == capacity {
                ring.pop_front();
                overflowed = true;
            }
            ring.push_back(line);
            ControlFlow::Continue(())
        };

        loop {
            let next = timeout(self.config.chunk_timeout, body.next())
                .await
                .map_err(|_| HttpError::Timeout("tail body read".to_string()))?;
            match next {
                None => break,
                Some(Err(e)) => return Err(e),
                Some(Ok(bytes)) => {
                    let _ = splitter.push(&bytes, &mut keep);
                }
            }
        }
        if let Some(line) = splitter.finish() {
            let _ = keep(line);
        }

        let range_covers = !read.ranged
            || read.start == 0
            || read.total.is_some_and(|total| total <= max_bytes);
        Ok(TailOutcome {
            lines: ring.into(),
            covers_whole_log: range_covers && !overflowed,
        })
    }

    async fn read_stream(&self, unit: &UnitRef, mut body: ByteStream) -> LogChunk {
        let max_lines = self.config.max_log_lines;
        let max_bytes = self.config.max_log_bytes;
        let mut lines: Vec<String> = Vec::new();
        let mut bytes = 0_usize;
        let mut truncated = false;
        let mut splitter = LineSplitter::new(self.config.max_line_bytes);

        let mut keep = |line: String| {
            if lines.len() >= max_lines || bytes.saturating_add(line.len()) > max_bytes {
                return ControlFlow::Break(());
            }
            bytes += line.len();
            lines.push(line);
            ControlFlow::Continue(())
        };

        loop {
            match timeout(self.config.chunk_timeout, body.next()).await {
                Err(_) => {
                    warn!(unit = %unit.name, "RETRIEVER | Chunk read timed out, keeping partial log");
                    truncated = true;
                    break;
                }
                Ok(None) => {
                    if let Some(line) = splitter.finish() {
                        truncated = keep(line).is_break();
                    }
                    break;
                }
                Ok(Some(Err(e))) => {
                    warn!(unit = %unit.name, "RETRIEVER | Stream interrupted, keeping partial log: {}", e);
                    truncated = true;
                    break;
                }
                Ok(Some(Ok(chunk))) => {
                    if splitter.push(&chunk, &mut keep).is_break() {
                        debug!(
                            unit = %unit.name,
                            max_lines,
                            max_bytes,
                            "RETRIEVER | Ceiling reached, stopping stream"
                        );
                        truncated = true;
                        break;
                    }
                }
            }
        }

        LogChunk {
            bytes,
            lines,
            truncated,
            method: RetrievalMethod::Stream,
        }
    }
}

fn chunk_from(lines: Vec<String>, truncated: bool, method: RetrievalMethod) -> LogChunk {
    LogChunk {
        bytes: lines.iter().map(String::len).sum(),
        lines,
        truncated,
        method,
    }
}

fn retrieval_error(unit: &UnitRef, error: CallError<HttpError>) -> RelayError {
    match error {
        CallError::CircuitOpen { target } => RelayError::CircuitOpen { target },
        other => RelayError::RetrievalFailure {
            unit: unit.name.clone(),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::extractor::ExtractionConfig;
    use crate::model::{RunLocator, RunStatus};
    use crate::reliability::circuit::CircuitRegistry;
    use crate::reliability::ReliabilityConfig;

    fn unit(status: RunStatus) -> UnitRef {
        UnitRef {
            leaf_index: 0,
            id: "7".to_string(),
            name: "test".to_string(),
            status,
            locator: Arc::new(RunLocator::default()),
        }
    }

    fn body(text: &str) -> ByteStream {
        let chunks: Vec<Result<Bytes, HttpError>> = text
            .as_bytes()
            .chunks(7)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        futures::stream::iter(chunks).boxed()
    }

    /// Serves a log from memory, honoring the suffix range like GitLab does.
    struct MemorySource {
        log: String,
        honor_range: bool,
        tail_failures: AtomicU32,
        tail_calls: AtomicU32,
        stream_calls: AtomicU32,
    }

    impl MemorySource {
        fn new(log: String) -> Self {
            Self {
                log,
                honor_range: true,
                tail_failures: AtomicU32::new(0),
                tail_calls: AtomicU32::new(0),
                stream_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl LogSource for MemorySource {
        fn target(&self, _unit: &UnitRef) -> String {
            "memory".to_string()
        }

        async fn fetch_tail(&self, _unit: &UnitRef, max_bytes: u64) -> Result<TailRead, HttpError> {
            self.tail_calls.fetch_add(1, Ordering::SeqCst);
            if self.tail_failures.load(Ordering::SeqCst) > 0 {
                self.tail_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(HttpError::Transport("connection reset".to_string()));
            }
            if self.log.is_empty() && self.honor_range {
                return Err(HttpError::Status {
                    status: 416,
                    body: String::new(),
                });
            }
            let total = self.log.len() as u64;
            if !self.honor_range {
                return Ok(TailRead::full(body(&self.log)));
            }
            let start = total.saturating_sub(max_bytes);
            let start_index = usize::try_from(start).expect("fits");
            Ok(TailRead {
                ranged: true,
                start,
                total: Some(total),
                body: body(&self.log[start_index..]),
            })
        }

        async fn open_stream(&self, _unit: &UnitRef) -> Result<ByteStream, HttpError> {
            self.stream_calls.fetch_add(1, Ordering::SeqCst);
            Ok(body(&self.log))
        }
    }

    fn extractor() -> ErrorExtractor {
        ErrorExtractor::new(&ExtractionConfig::default()).expect("extractor should build")
    }

    fn retriever(config: RetrievalConfig) -> LogRetriever {
        LogRetriever::new(
            config,
            Reliability::with_registry(
                &ReliabilityConfig {
                    retry_attempts: 3,
                    retry_delay: Duration::from_millis(10),
                    failure_threshold: 50,
                    cooldown: Duration::from_secs(60),
                },
                Arc::new(CircuitRegistry::new()),
            ),
        )
    }

    fn small_tail() -> RetrievalConfig {
        RetrievalConfig {
            tail_lines: 10,
            tail_bytes_per_line: 20,
            ..RetrievalConfig::default()
        }
    }

    fn numbered_log(count: usize) -> String {
        (0..count).map(|i| format!("line {i:05}\n")).collect()
    }

    #[test]
    fn test_line_splitter_handles_split_lines_and_caps() {
        let mut splitter = LineSplitter::new(5);
        let mut lines = Vec::new();
        let _ = splitter.push(b"abc", |l| {
            lines.push(l);
            ControlFlow::Continue(())
        });
        let _ = splitter.push(b"def\r\nxy\ntoolongline\nz", |l| {
            lines.push(l);
            ControlFlow::Continue(())
        });
        lines.extend(splitter.finish());
        assert_eq!(lines, vec!["abcde", "xy", "toolo", "z"]);
    }

    #[test]
    fn test_line_splitter_decodes_lossily() {
        let mut splitter = LineSplitter::new(100);
        let mut lines = Vec::new();
        let _ = splitter.push(b"ok \xff\xfe bytes\n", |l| {
            lines.push(l);
            ControlFlow::Continue(())
        });
        assert_eq!(lines, vec!["ok \u{fffd}\u{fffd} bytes"]);
    }

    #[tokio::test]
    async fn test_small_log_is_read_whole_from_tail() {
        let source = MemorySource::new("npm install\nnpm ERR! ERESOLVE\n".to_string());
        let chunk = retriever(small_tail())
            .retrieve(&source, &unit(RunStatus::Failed), &extractor())
            .await
            .expect("retrieval should succeed");

        assert_eq!(chunk.method, RetrievalMethod::Tail);
        assert_eq!(chunk.lines, vec!["npm install", "npm ERR! ERESOLVE"]);
        assert!(!chunk.truncated);
        assert_eq!(source.stream_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tail_drops_partial_first_line() {
        let mut log = numbered_log(100);
        log.push_str("fatal: could not read from remote\n");
        let source = MemorySource::new(log);
        let chunk = retriever(small_tail())
            .retrieve(&source, &unit(RunStatus::Failed), &extractor())
            .await
            .expect("retrieval should succeed");

        assert_eq!(chunk.method, RetrievalMethod::Tail);
        assert!(chunk.truncated);
        assert!(chunk.lines.len() <= 10);
        assert!(chunk.lines.iter().all(|l| l.starts_with("line ") || l.starts_with("fatal")));
        assert!(chunk.lines.iter().all(|l| l.len() == 10 || l.starts_with("fatal")));
        assert_eq!(chunk.lines.last().map(String::as_str), Some("fatal: could not read from remote"));
    }

    #[tokio::test]
    async fn test_tail_starting_on_line_boundary_keeps_first_line() {
        // 20-byte lines: the last 200 bytes are exactly the last 10 lines.
        let log: String = (0..50).map(|i| format!("line {i:05} ok ok ok\n")).collect();
        let source = MemorySource::new(log);
        let chunk = retriever(small_tail())
            .retrieve(&source, &unit(RunStatus::Success), &extractor())
            .await
            .expect("retrieval should succeed");

        assert_eq!(chunk.lines.len(), 10);
        assert_eq!(chunk.lines[0], "line 00040 ok ok ok");
        assert_eq!(chunk.lines[9], "line 00049 ok ok ok");
        assert!(chunk.truncated);
    }

    #[tokio::test]
    async fn test_successful_unit_keeps_tail() {
        let source = MemorySource::new(numbered_log(1_000));
        let chunk = retriever(small_tail())
            .retrieve(&source, &unit(RunStatus::Success), &extractor())
            .await
            .expect("retrieval should succeed");
        assert_eq!(chunk.method, RetrievalMethod::Tail);
        assert_eq!(source.stream_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_diagnostic_beyond_tail_triggers_stream() {
        let mut log = String::from("error: linker failed\n");
        log.push_str(&numbered_log(500));
        let source = MemorySource::new(log);

        let chunk = retriever(small_tail())
            .retrieve(&source, &unit(RunStatus::Failed), &extractor())
            .await
            .expect("retrieval should succeed");

        assert_eq!(chunk.method, RetrievalMethod::Stream);
        assert_eq!(chunk.lines.len(), 501);
        assert_eq!(chunk.lines[0], "error: linker failed");
        assert!(!chunk.truncated);
        assert_eq!(source.stream_calls.load(Ordering::SeqCst), 1);
        assert_eq!(chunk.bytes, chunk.lines.iter().map(String::len).sum::<usize>());
    }

    #[tokio::test]
    async fn test_range_ignored_still_bounded() {
        let mut source = MemorySource::new(numbered_log(10_000));
        source.honor_range = false;

        let chunk = retriever(small_tail())
            .retrieve(&source, &unit(RunStatus::Success), &extractor())
            .await
            .expect("retrieval should succeed");
        assert_eq!(chunk.lines.len(), 10);
        assert_eq!(chunk.lines[9], "line 09999");
        assert!(chunk.truncated);
    }

    #[tokio::test]
    async fn test_empty_log() {
        let source = MemorySource::new(String::new());
        let chunk = retriever(small_tail())
            .retrieve(&source, &unit(RunStatus::Failed), &extractor())
            .await
            .expect("empty log is not an error");
        assert!(chunk.is_empty());
        assert!(!chunk.truncated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_tail_failures_are_retried() {
        let source = MemorySource::new("error: boom\n".to_string());
        source.tail_failures.store(2, Ordering::SeqCst);

        let chunk = retriever(small_tail())
            .retrieve(&source, &unit(RunStatus::Failed), &extractor())
            .await
            .expect("retrieval should succeed");
        assert_eq!(chunk.lines, vec!["error: boom"]);
        assert_eq!(source.tail_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_tail_is_a_retrieval_failure() {
        let source = MemorySource::new("error: boom\n".to_string());
        source.tail_failures.store(10, Ordering::SeqCst);

        let err = retriever(small_tail())
            .retrieve(&source, &unit(RunStatus::Failed), &extractor())
            .await
            .expect_err("retrieval should fail");
        assert!(matches!(err, RelayError::RetrievalFailure { ref unit, .. } if unit == "test"));
    }

    struct EndlessSource {
        produced: Arc<AtomicUsize>,
        total_lines: usize,
    }

    #[async_trait]
    impl LogSource for EndlessSource {
        fn target(&self, _unit: &UnitRef) -> String {
            "endless".to_string()
        }

        async fn fetch_tail(&self, _unit: &UnitRef, _max_bytes: u64) -> Result<TailRead, HttpError> {
            Ok(TailRead {
                ranged: true,
                start: 1_000_000,
                total: None,
                body: body("partial\nstill compiling\n"),
            })
        }

        async fn open_stream(&self, _unit: &UnitRef) -> Result<ByteStream, HttpError> {
            let produced = Arc::clone(&self.produced);
            let total_lines = self.total_lines;
            Ok(futures::stream::unfold(0_usize, move |i| {
                let produced = Arc::clone(&produced);
                async move {
                    if i >= total_lines {
                        return None;
                    }
                    produced.fetch_add(1, Ordering::SeqCst);
                    let batch: String = (i..i + 1_000).map(|n| format!("output {n}\n")).collect();
                    Some((Ok(Bytes::from(batch)), i + 1_000))
                }
            })
            .boxed())
        }
    }

    #[tokio::test]
    async fn test_multi_million_line_stream_stays_bounded() {
        let source = EndlessSource {
            produced: Arc::new(AtomicUsize::new(0)),
            total_lines: 2_000_000,
        };
        let config = RetrievalConfig {
            max_log_lines: 5_000,
            ..RetrievalConfig::default()
        };

        let chunk = retriever(config)
            .retrieve(&source, &unit(RunStatus::Failed), &extractor())
            .await
            .expect("retrieval should succeed");

        assert_eq!(chunk.method, RetrievalMethod::Stream);
        assert_eq!(chunk.lines.len(), 5_000);
        assert!(chunk.truncated);
        // Reading stops at the ceiling instead of draining the remote log.
        assert!(source.produced.load(Ordering::SeqCst) <= 6);
    }

    #[tokio::test]
    async fn test_byte_ceiling() {
        let source = EndlessSource {
            produced: Arc::new(AtomicUsize::new(0)),
            total_lines: 2_000_000,
        };
        let config = RetrievalConfig {
            max_log_bytes: 10_000,
            ..RetrievalConfig::default()
        };

        let chunk = retriever(config)
            .retrieve(&source, &unit(RunStatus::Failed), &extractor())
            .await
            .expect("retrieval should succeed");
        assert!(chunk.bytes <= 10_000);
        assert!(chunk.truncated);
    }

    struct DisconnectingSource;

    #[async_trait]
    impl LogSource for DisconnectingSource {
        fn target(&self, _unit: &UnitRef) -> String {
            "disconnecting".to_string()
        }

        async fn fetch_tail(&self, _unit: &UnitRef, _max_bytes: u64) -> Result<TailRead, HttpError> {
            Ok(TailRead {
                ranged: true,
                start: 10,
                total: Some(1_000_000),
                body: body("tail\nno clue here\n"),
            })
        }

        async fn open_stream(&self, _unit: &UnitRef) -> Result<ByteStream, HttpError> {
            let parts: Vec<Result<Bytes, HttpError>> = vec![
                Ok(Bytes::from_static(b"first\nsecond\n")),
                Err(HttpError::Transport("connection reset by peer".to_string())),
                Ok(Bytes::from_static(b"never read\n")),
            ];
            Ok(futures::stream::iter(parts).boxed())
        }
    }

    #[tokio::test]
    async fn test_mid_stream_disconnect_keeps_partial_content() {
        let chunk = retriever(small_tail())
            .retrieve(&DisconnectingSource, &unit(RunStatus::Failed), &extractor())
            .await
            .expect("partial content is not an error");
        assert_eq!(chunk.lines, vec!["first", "second"]);
        assert!(chunk.truncated);
        assert_eq!(chunk.method, RetrievalMethod::Stream);
    }

    struct StallingSource;

    #[async_trait]
    impl LogSource for StallingSource {
        fn target(&self, _unit: &UnitRef) -> String {
            "stalling".to_string()
        }

        async fn fetch_tail(&self, _unit: &UnitRef, _max_bytes: u64) -> Result<TailRead, HttpError> {
            Ok(TailRead {
                ranged: true,
                start: 10,
                total: Some(1_000_000),
                body: body("tail\nnothing\n"),
            })
        }

        async fn open_stream(&self, _unit: &UnitRef) -> Result<ByteStream, HttpError> {
            let first = futures::stream::iter(vec![Ok(Bytes::from_static(b"before stall\n"))]);
            Ok(first.chain(futures::stream::pending()).boxed())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunk_timeout_keeps_partial_content() {
        let chunk = retriever(small_tail())
            .retrieve(&StallingSource, &unit(RunStatus::Failed), &extractor())
            .await
            .expect("partial content is not an error");
        assert_eq!(chunk.lines, vec!["before stall"]);
        assert!(chunk.truncated);
    }
}
