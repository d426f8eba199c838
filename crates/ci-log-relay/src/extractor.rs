// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Diagnostic section extraction.
//!
//! A cleaned line is a *trigger* when it matches a positive pattern and no negative one.
//! Each trigger at line `i` opens the window `[i - context_before, i + context_after]`;
//! overlapping or adjacent windows merge into one [`ErrorSection`].
//!
//! The number of emitted lines per unit is capped. Sections are kept in order until the
//! budget runs out; the section crossing the budget is trimmed around its first trigger
//! (trigger and trailing context first, then the closest leading context) and later
//! sections are dropped.

use regex::{Regex, RegexBuilder, RegexSet, RegexSetBuilder};
use tracing::{debug, error};

use crate::config::{patterns, ConfigError};
use crate::model::{ErrorSection, LogChunk, RunStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionConfig {
    pub context_before: usize,
    pub context_after: usize,
    pub max_error_lines: usize,
    pub error_patterns: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub extract_successful_units: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            context_before: 50,
            context_after: 10,
            max_error_lines: 50,
            error_patterns: patterns::default_error_patterns(),
            ignore_patterns: patterns::default_ignore_patterns(),
            extract_successful_units: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorExtractor {
    positive: RegexSet,
    negative: RegexSet,
    ansi: Regex,
    section_marker: Regex,
    timestamp: Regex,
    context_before: usize,
    context_after: usize,
    max_error_lines: usize,
    extract_successful_units: bool,
}

/// Compiles the valid patterns into a case-insensitive set. Invalid ones are logged and
/// skipped.
fn build_set(kind: &str, patterns: &[String]) -> RegexSet {
    let valid: Vec<&str> = patterns
        .iter()
        .map(String::as_str)
        .filter(|pattern| match RegexBuilder::new(pattern).build() {
            Ok(_) => true,
            Err(e) => {
                error!("EXTRACTOR | Invalid {} pattern '{}': {}, ignoring", kind, pattern, e);
                false
            }
        })
        .collect();

    match RegexSetBuilder::new(valid).case_insensitive(true).build() {
        Ok(set) => set,
        Err(e) => {
            error!("EXTRACTOR | Failed to compile {} patterns: {}, ignoring all", kind, e);
            RegexSet::empty()
        }
    }
}

fn compile(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|e| ConfigError::Invalid(format!("cleaning pattern: {e}")))
}

impl ErrorExtractor {
    pub fn new(config: &ExtractionConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            positive: build_set("error", &config.error_patterns),
            negative: build_set("ignore", &config.ignore_patterns),
            ansi: compile(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")?,
            section_marker: compile(r"section_(?:start|end):\d+:[A-Za-z0-9_.\-]+(?:\[[^\]]*\])?")?,
            timestamp: compile(
                r"^\s*(?:\[?\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?(?:Z|[+-]\d{2}:?\d{2})?\]?|\[\d{2}:\d{2}:\d{2}(?:\.\d+)?\])\s*",
            )?,
            context_before: config.context_before,
            context_after: config.context_after,
            max_error_lines: config.max_error_lines,
            extract_successful_units: config.extract_successful_units,
        })
    }

    /// Whether units with this status get their sections extracted.
    #[must_use]
    pub fn should_extract(&self, status: RunStatus) -> bool {
        status.is_failure() || self.extract_successful_units
    }

    /// Strips terminal escapes, GitLab section markers and leading timestamps.
    #[must_use]
    pub fn clean_line(&self, line: &str) -> String {
        let mut cleaned = self.ansi.replace_all(line, "").into_owned();
        cleaned = self.section_marker.replace_all(&cleaned, "").into_owned();
        // Progress output rewrites the line with '\r'; keep what was displayed last.
        if let Some(last) = cleaned.rsplit('\r').find(|part| !part.trim().is_empty()) {
            cleaned = last.to_string();
        } else {
            cleaned.retain(|c| c != '\r');
        }
        while let Some(found) = self.timestamp.find(&cleaned) {
            if found.end() == 0 {
                break;
            }
            cleaned.replace_range(..found.end(), "");
        }
        cleaned.truncate(cleaned.trim_end().len());
        cleaned
    }

    /// Whether a cleaned line is a trigger.
    #[must_use]
    pub fn is_trigger(&self, cleaned: &str) -> bool {
        self.positive.is_match(cleaned) && !self.negative.is_match(cleaned)
    }

    /// Pre-scan used by the retriever to decide whether a tail read is enough.
    #[must_use]
    pub fn contains_diagnostic(&self, lines: &[String]) -> bool {
        lines.iter().any(|line| self.is_trigger(&self.clean_line(line)))
    }

    /// Extracts the sections of one unit's chunk. Pure: the same chunk always gives the
    /// same sections.
    #[must_use]
    pub fn extract(&self, unit: &str, chunk: &LogChunk) -> Vec<ErrorSection> {
        let cleaned: Vec<String> = chunk.lines.iter().map(|l| self.clean_line(l)).collect();
        let triggers: Vec<usize> = cleaned
            .iter()
            .enumerate()
            .filter(|(_, line)| self.is_trigger(line))
            .map(|(i, _)| i)
            .collect();

        if triggers.is_empty() || self.max_error_lines == 0 {
            return Vec::new();
        }

        let last = cleaned.len() - 1;
        let mut windows: Vec<(usize, usize)> = Vec::new();
        for &i in &triggers {
            let start = i.saturating_sub(self.context_before);
            let end = i.saturating_add(self.context_after).min(last);
            match windows.last_mut() {
                Some((_, prev_end)) if start <= prev_end.saturating_add(1) => {
                    *prev_end = (*prev_end).max(end);
                }
                _ => windows.push((start, end)),
            }
        }

        let mut sections: Vec<ErrorSection> = Vec::new();
        let mut remaining = self.max_error_lines;
        let window_count = windows.len();

        for (n, (start, end)) in windows.into_iter().enumerate() {
            if remaining == 0 {
                if let Some(previous) = sections.last_mut() {
                    previous.truncated = true;
                }
                debug!(
                    unit,
                    dropped = window_count - n,
                    "EXTRACTOR | Line budget exhausted, dropping sections"
                );
                break;
            }

            // Collapse consecutive duplicates, remembering each kept line's source index.
            let mut kept: Vec<(usize, &str)> = Vec::new();
            for (index, line) in cleaned.iter().enumerate().take(end + 1).skip(start) {
                if kept.last().map_or(true, |(_, prev)| *prev != line.as_str()) {
                    kept.push((index, line.as_str()));
                }
            }
            let window_triggers: Vec<usize> = triggers
                .iter()
                .copied()
                .filter(|t| (start..=end).contains(t))
                .collect();

            let (kept, truncated) = if kept.len() <= remaining {
                (kept, false)
            } else {
                (trim_around_first_trigger(kept, &window_triggers, remaining), true)
            };
            remaining -= kept.len();

            let (Some(&(first, _)), Some(&(last_kept, _))) = (kept.first(), kept.last()) else {
                continue;
            };
            let section_end = if truncated { last_kept } else { end };
            sections.push(ErrorSection {
                unit: unit.to_string(),
                start: first,
                end: section_end,
                trigger_lines: window_triggers
                    .into_iter()
                    .filter(|t| (first..=section_end).contains(t))
                    .collect(),
                lines: kept.into_iter().map(|(_, line)| line.to_string()).collect(),
                truncated,
            });
        }

        sections
    }
}

/// Keeps `budget` lines: the first trigger and what follows it, then the closest lines
/// before it.
fn trim_around_first_trigger<'a>(
    kept: Vec<(usize, &'a str)>,
    triggers: &[usize],
    budget: usize,
) -> Vec<(usize, &'a str)> {
    let first_trigger = triggers.first().copied().unwrap_or(0);
    // A collapsed trigger is represented by the kept duplicate before it.
    let pivot = kept
        .iter()
        .rposition(|(index, _)| *index <= first_trigger)
        .unwrap_or(0);

    let end = (pivot + budget).min(kept.len());
    let leftover = budget - (end - pivot);
    let start = pivot - leftover.min(pivot);

    kept[start..end].to_vec()
}
