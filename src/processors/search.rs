//! Pattern search over content rendered as text.
//!
//! `regex` mode emits line-context blocks; `context` mode emits the
//! enclosing paragraph of each match. Overlapping blocks are merged and
//! blocks are joined by a `--` sentinel line.

use regex::RegexBuilder;
use serde_json::{Map, Value};

use super::{
    param_bool, param_str, param_usize, search_mode, Processor, StepOutput,
    DEFAULT_CONTEXT_LINES, DEFAULT_MAX_RESULTS,
};

/// Sentinel separating output blocks.
pub const BLOCK_SEPARATOR: &str = "--";

pub struct RegexSearchProcessor;

pub struct ContextExtractionProcessor;

fn build_regex(pattern: &str, case_insensitive: bool, multi_line: bool) -> Result<regex::Regex, String> {
    RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .multi_line(multi_line)
        .build()
        .map_err(|e| format!("invalid pattern: {e}"))
}

/// Map a byte offset to its (0-based) line index.
fn line_of_offset(line_starts: &[usize], offset: usize) -> usize {
    match line_starts.binary_search(&offset) {
        Ok(i) => i,
        Err(i) => i.saturating_sub(1),
    }
}

fn line_starts(content: &str) -> Vec<usize> {
    let mut starts = vec![0];
    for (i, b) in content.bytes().enumerate() {
        if b == b'\n' {
            starts.push(i + 1);
        }
    }
    starts
}

/// Expand match line ranges by `context_lines` and merge overlaps,
/// preserving source order.
fn merge_ranges(
    matches: &[(usize, usize)],
    context_lines: usize,
    line_count: usize,
) -> Vec<(usize, usize)> {
    let mut merged: Vec<(usize, usize)> = Vec::new();
    for &(start, end) in matches {
        let lo = start.saturating_sub(context_lines);
        let hi = (end + context_lines).min(line_count.saturating_sub(1));
        match merged.last_mut() {
            Some((_, prev_hi)) if lo <= *prev_hi => *prev_hi = (*prev_hi).max(hi),
            _ => merged.push((lo, hi)),
        }
    }
    merged
}

fn render_blocks(lines: &[&str], ranges: &[(usize, usize)]) -> String {
    ranges
        .iter()
        .map(|&(lo, hi)| lines[lo..=hi].join("\n"))
        .collect::<Vec<_>>()
        .join(&format!("\n{BLOCK_SEPARATOR}\n"))
}

impl Processor for RegexSearchProcessor {
    fn name(&self) -> &'static str {
        "regex_search"
    }

    fn wants(&self, params: &Map<String, Value>) -> bool {
        params.contains_key("pattern") && search_mode(params) == "regex"
    }

    fn apply(&self, content: &str, params: &Map<String, Value>) -> Result<StepOutput, String> {
        let pattern = param_str(params, "pattern").ok_or("pattern must be a string")?;
        let case_insensitive = param_bool(params, "case_insensitive", false);
        let multiline = param_bool(params, "multiline", false);
        let max_results = param_usize(params, "max_results", DEFAULT_MAX_RESULTS);
        let context_lines = param_usize(params, "context_lines", DEFAULT_CONTEXT_LINES);

        let regex = build_regex(pattern, case_insensitive, multiline)?;
        let lines: Vec<&str> = content.lines().collect();

        // Match line ranges, capped at max_results hits.
        let mut match_ranges: Vec<(usize, usize)> = Vec::new();
        let mut truncated = false;
        if multiline {
            let starts = line_starts(content);
            for m in regex.find_iter(content) {
                if match_ranges.len() >= max_results {
                    truncated = true;
                    break;
                }
                let start_line = line_of_offset(&starts, m.start());
                let end_line = line_of_offset(&starts, m.end().saturating_sub(1).max(m.start()));
                match_ranges.push((start_line, end_line));
            }
        } else {
            for (i, line) in lines.iter().enumerate() {
                if regex.is_match(line) {
                    if match_ranges.len() >= max_results {
                        truncated = true;
                        break;
                    }
                    match_ranges.push((i, i));
                }
            }
        }

        let blocks = merge_ranges(&match_ranges, context_lines, lines.len());
        let rendered = render_blocks(&lines, &blocks);

        let mut metadata = Map::new();
        metadata.insert("matchCount".to_string(), match_ranges.len().into());
        metadata.insert("blockCount".to_string(), blocks.len().into());
        metadata.insert("truncated".to_string(), truncated.into());
        Ok(StepOutput::applied(rendered, metadata))
    }
}

/// Paragraphs of the content with their byte spans. Returns `None` when the
/// content has no paragraph structure.
fn paragraph_spans(content: &str) -> Option<Vec<(usize, usize)>> {
    if !content.contains("\n\n") {
        return None;
    }
    let mut spans = Vec::new();
    let mut start = 0;
    let bytes = content.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\n' && i + 1 < bytes.len() && bytes[i + 1] == b'\n' {
            if i > start {
                spans.push((start, i));
            }
            while i < bytes.len() && bytes[i] == b'\n' {
                i += 1;
            }
            start = i;
        } else {
            i += 1;
        }
    }
    if start < bytes.len() {
        spans.push((start, bytes.len()));
    }
    Some(spans)
}

impl Processor for ContextExtractionProcessor {
    fn name(&self) -> &'static str {
        "context_extraction"
    }

    fn wants(&self, params: &Map<String, Value>) -> bool {
        params.contains_key("pattern") && search_mode(params) == "context"
    }

    fn apply(&self, content: &str, params: &Map<String, Value>) -> Result<StepOutput, String> {
        let pattern = param_str(params, "pattern").ok_or("pattern must be a string")?;
        let case_insensitive = param_bool(params, "case_insensitive", false);
        let max_results = param_usize(params, "max_results", DEFAULT_MAX_RESULTS);

        let regex = build_regex(pattern, case_insensitive, false)?;

        let Some(spans) = paragraph_spans(content) else {
            // No paragraph structure: fall back to line-context blocks.
            return RegexSearchProcessor.apply(content, params);
        };

        let mut hit_paragraphs: Vec<usize> = Vec::new();
        let mut truncated = false;
        for m in regex.find_iter(content) {
            if hit_paragraphs.len() >= max_results {
                truncated = true;
                break;
            }
            let index = spans
                .iter()
                .position(|&(lo, hi)| m.start() >= lo && m.start() < hi);
            if let Some(index) = index {
                if hit_paragraphs.last() != Some(&index) {
                    hit_paragraphs.push(index);
                }
            }
        }

        let rendered = hit_paragraphs
            .iter()
            .map(|&i| content[spans[i].0..spans[i].1].trim_end())
            .collect::<Vec<_>>()
            .join(&format!("\n{BLOCK_SEPARATOR}\n"));

        let mut metadata = Map::new();
        metadata.insert("paragraphCount".to_string(), hit_paragraphs.len().into());
        metadata.insert("truncated".to_string(), truncated.into());
        Ok(StepOutput::applied(rendered, metadata))
    }
}
