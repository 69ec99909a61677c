//! Response processors and the pipeline that composes them.
//!
//! Each processor inspects a flat parameter map for its own keys; absent
//! keys mean the processor is skipped and its input passes through.

mod explore;
mod pipeline;
mod projection;
mod ranking;
mod search;

pub use explore::{ExploreProcessor, DEFAULT_MAX_DEPTH, DEFAULT_SAMPLE_SIZE};
pub use pipeline::{ProcessorPipeline, ProcessorResult};
pub use projection::ProjectionProcessor;
pub use ranking::{Bm25SearchProcessor, FuzzySearchProcessor};
pub use search::{ContextExtractionProcessor, RegexSearchProcessor};

use serde_json::{Map, Value};

/// Default number of context lines around a regex match.
pub const DEFAULT_CONTEXT_LINES: usize = 2;
/// Default cap on regex/fuzzy results.
pub const DEFAULT_MAX_RESULTS: usize = 100;
/// Default number of BM25 chunks returned.
pub const DEFAULT_TOP_K: usize = 5;
/// Default fuzzy acceptance threshold.
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.7;

/// Output of one processor application.
pub struct StepOutput {
    pub content: String,
    pub metadata: Map<String, Value>,
    /// False when the processor inspected the content and declined to act
    /// (e.g. projection over non-JSON content).
    pub applied: bool,
}

impl StepOutput {
    pub fn applied(content: String, metadata: Map<String, Value>) -> Self {
        Self {
            content,
            metadata,
            applied: true,
        }
    }

    pub fn passthrough(content: String, note: &str) -> Self {
        let mut metadata = Map::new();
        metadata.insert("note".to_string(), Value::String(note.to_string()));
        Self {
            content,
            metadata,
            applied: false,
        }
    }
}

/// One stage of the response pipeline.
pub trait Processor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this processor's parameters are present in the map.
    fn wants(&self, params: &Map<String, Value>) -> bool;

    /// Transform the content. Errors are absorbed by the pipeline into the
    /// result's `error` field; the content then passes through unchanged.
    fn apply(&self, content: &str, params: &Map<String, Value>) -> Result<StepOutput, String>;
}

// --- Parameter map helpers shared by processors ---

pub(crate) fn param_str<'a>(params: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

pub(crate) fn param_bool(params: &Map<String, Value>, key: &str, default: bool) -> bool {
    params.get(key).and_then(Value::as_bool).unwrap_or(default)
}

pub(crate) fn param_usize(params: &Map<String, Value>, key: &str, default: usize) -> usize {
    params
        .get(key)
        .and_then(Value::as_u64)
        .map(|v| v as usize)
        .unwrap_or(default)
}

pub(crate) fn param_f64(params: &Map<String, Value>, key: &str, default: f64) -> f64 {
    params.get(key).and_then(Value::as_f64).unwrap_or(default)
}

/// The search mode selected in the parameter map (default `regex`).
pub(crate) fn search_mode<'a>(params: &'a Map<String, Value>) -> &'a str {
    param_str(params, "mode").unwrap_or("regex")
}
