//! Structure exploration: compact, depth-bounded summaries of content.
//!
//! The summary never contains the full payload: strings are previewed,
//! arrays are sampled, and recursion stops at `max_depth`.

use serde_json::{json, Map, Value};

use super::{param_usize, Processor, StepOutput};

pub const DEFAULT_MAX_DEPTH: usize = 3;
pub const DEFAULT_SAMPLE_SIZE: usize = 3;

/// Maximum characters of a string shown in a preview.
const STRING_PREVIEW_CHARS: usize = 120;

pub struct ExploreProcessor;

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn string_preview(s: &str) -> String {
    match s.char_indices().nth(STRING_PREVIEW_CHARS) {
        Some((cut, _)) => s[..cut].to_string(),
        None => s.to_string(),
    }
}

/// Shallow summary used once the depth limit is reached. Containers
/// report only their size; strings and scalars stay cheap enough to show.
fn brief(value: &Value) -> Value {
    match value {
        Value::Object(map) => json!({ "type": "object", "sizeHint": map.len() }),
        Value::Array(items) => json!({ "type": "array", "sizeHint": items.len() }),
        Value::String(s) => json!({
            "type": "string",
            "length": s.chars().count(),
            "preview": string_preview(s),
        }),
        Value::Null => json!({ "type": "null" }),
        other => json!({ "type": type_name(other), "value": other }),
    }
}

fn summarize(value: &Value, depth: usize, sample_size: usize) -> Value {
    if depth == 0 {
        return brief(value);
    }
    match value {
        Value::Object(map) => {
            let mut keys = Map::new();
            for (k, v) in map {
                keys.insert(k.clone(), summarize(v, depth - 1, sample_size));
            }
            json!({
                "type": "object",
                "keyCount": map.len(),
                "keys": keys,
            })
        }
        Value::Array(items) => {
            let mut histogram = Map::new();
            for item in items {
                let slot = histogram
                    .entry(type_name(item).to_string())
                    .or_insert(Value::Number(0.into()));
                *slot = Value::Number((slot.as_u64().unwrap_or(0) + 1).into());
            }
            let sample: Vec<Value> = items
                .iter()
                .take(sample_size.min(items.len()))
                .map(|item| summarize(item, depth - 1, sample_size))
                .collect();
            json!({
                "type": "array",
                "length": items.len(),
                "elementTypes": histogram,
                "sample": sample,
            })
        }
        other => brief(other),
    }
}

impl Processor for ExploreProcessor {
    fn name(&self) -> &'static str {
        "explore"
    }

    fn wants(&self, params: &Map<String, Value>) -> bool {
        params.contains_key("max_depth")
    }

    fn apply(&self, content: &str, params: &Map<String, Value>) -> Result<StepOutput, String> {
        let max_depth = param_usize(params, "max_depth", DEFAULT_MAX_DEPTH);
        let sample_size = param_usize(params, "sample_size", DEFAULT_SAMPLE_SIZE);

        let mut metadata = Map::new();
        metadata.insert("maxDepth".to_string(), max_depth.into());
        metadata.insert("sampleSize".to_string(), sample_size.into());

        let summary = match serde_json::from_str::<Value>(content.trim()) {
            Ok(value) => summarize(&value, max_depth, sample_size),
            // Plain text is summarized as one string value.
            Err(_) => {
                metadata.insert("note".to_string(), json!("content is not JSON"));
                brief(&Value::String(content.to_string()))
            }
        };

        let rendered = serde_json::to_string_pretty(&summary)
            .map_err(|e| format!("serialize summary: {e}"))?;
        Ok(StepOutput::applied(rendered, metadata))
    }
}
