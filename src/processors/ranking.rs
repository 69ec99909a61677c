//! Chunk-ranking search: BM25 and fuzzy matching.
//!
//! Both modes chunk the content into paragraphs (double-newline separated,
//! falling back to sentences) and rank whole chunks against the pattern.

use serde_json::{Map, Value};

use super::{
    param_f64, param_str, param_usize, search_mode, Processor, StepOutput,
    DEFAULT_FUZZY_THRESHOLD, DEFAULT_MAX_RESULTS, DEFAULT_TOP_K,
};

const BM25_K1: f64 = 1.5;
const BM25_B: f64 = 0.75;

pub struct Bm25SearchProcessor;

pub struct FuzzySearchProcessor;

/// Paragraph chunks; when the content is a single paragraph, fall back to
/// sentences.
pub(crate) fn chunk_text(content: &str) -> Vec<String> {
    let paragraphs: Vec<String> = content
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect();
    if paragraphs.len() > 1 {
        return paragraphs;
    }
    split_sentences(content)
}

fn split_sentences(content: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = content.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let at_boundary = chars
                .peek()
                .map_or(true, |(_, next)| next.is_whitespace());
            if at_boundary {
                let end = i + c.len_utf8();
                let sentence = content[start..end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                start = end;
            }
        }
    }
    let tail = content[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|t| {
            t.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|t| !t.is_empty())
        .collect()
}

fn format_scored(score: f64, chunk: &str) -> String {
    format!("[score={score:.3}] {chunk}")
}

impl Processor for Bm25SearchProcessor {
    fn name(&self) -> &'static str {
        "bm25_search"
    }

    fn wants(&self, params: &Map<String, Value>) -> bool {
        params.contains_key("pattern") && search_mode(params) == "bm25"
    }

    fn apply(&self, content: &str, params: &Map<String, Value>) -> Result<StepOutput, String> {
        let pattern = param_str(params, "pattern").ok_or("pattern must be a string")?;
        let top_k = param_usize(params, "top_k", DEFAULT_TOP_K);

        let query = tokenize(pattern);
        if query.is_empty() {
            return Err("pattern has no searchable terms".to_string());
        }

        let chunks = chunk_text(content);
        let docs: Vec<Vec<String>> = chunks.iter().map(|c| tokenize(c)).collect();
        let doc_count = docs.len();
        let avg_len = if doc_count == 0 {
            0.0
        } else {
            docs.iter().map(Vec::len).sum::<usize>() as f64 / doc_count as f64
        };

        // Document frequency per query term.
        let df: Vec<usize> = query
            .iter()
            .map(|term| docs.iter().filter(|d| d.contains(term)).count())
            .collect();

        let mut scored: Vec<(f64, usize)> = docs
            .iter()
            .enumerate()
            .map(|(i, doc)| {
                let len_norm = if avg_len > 0.0 {
                    doc.len() as f64 / avg_len
                } else {
                    1.0
                };
                let score: f64 = query
                    .iter()
                    .zip(&df)
                    .map(|(term, &df)| {
                        let tf = doc.iter().filter(|t| *t == term).count() as f64;
                        if tf == 0.0 {
                            return 0.0;
                        }
                        let idf = (((doc_count as f64 - df as f64 + 0.5) / (df as f64 + 0.5))
                            + 1.0)
                            .ln();
                        idf * tf * (BM25_K1 + 1.0)
                            / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * len_norm))
                    })
                    .sum();
                (score, i)
            })
            .filter(|(score, _)| *score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        let rendered = scored
            .iter()
            .map(|&(score, i)| format_scored(score, &chunks[i]))
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut metadata = Map::new();
        metadata.insert("chunkCount".to_string(), chunks.len().into());
        metadata.insert("returned".to_string(), scored.len().into());
        Ok(StepOutput::applied(rendered, metadata))
    }
}

impl Processor for FuzzySearchProcessor {
    fn name(&self) -> &'static str {
        "fuzzy_search"
    }

    fn wants(&self, params: &Map<String, Value>) -> bool {
        params.contains_key("pattern") && search_mode(params) == "fuzzy"
    }

    fn apply(&self, content: &str, params: &Map<String, Value>) -> Result<StepOutput, String> {
        let pattern = param_str(params, "pattern").ok_or("pattern must be a string")?;
        let threshold = param_f64(params, "fuzzy_threshold", DEFAULT_FUZZY_THRESHOLD);
        let max_results = param_usize(params, "max_results", DEFAULT_MAX_RESULTS);

        let pattern_tokens = tokenize(pattern);
        if pattern_tokens.is_empty() {
            return Err("pattern has no searchable terms".to_string());
        }
        let needle = pattern_tokens.join(" ");
        let window = pattern_tokens.len();

        let chunks = chunk_text(content);
        let mut scored: Vec<(f64, usize)> = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let tokens = tokenize(chunk);
            if tokens.is_empty() {
                continue;
            }
            // Best similarity over sliding windows of the pattern's length;
            // 1 - normalized Levenshtein distance.
            let best = if tokens.len() <= window {
                strsim::normalized_levenshtein(&needle, &tokens.join(" "))
            } else {
                tokens
                    .windows(window)
                    .map(|w| strsim::normalized_levenshtein(&needle, &w.join(" ")))
                    .fold(0.0, f64::max)
            };
            if best >= threshold {
                scored.push((best, i));
            }
        }

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(max_results);

        let rendered = scored
            .iter()
            .map(|&(score, i)| format_scored(score, &chunks[i]))
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut metadata = Map::new();
        metadata.insert("chunkCount".to_string(), chunks.len().into());
        metadata.insert("returned".to_string(), scored.len().into());
        metadata.insert("threshold".to_string(), threshold.into());
        Ok(StepOutput::applied(rendered, metadata))
    }
}
