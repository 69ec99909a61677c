//! The proxy's own tools: `proxy_filter`, `proxy_search`, `proxy_explore`.
//!
//! Each operates either on a cached response (`cache_id`) or in fresh mode
//! (`tool` + `arguments`), where the underlying tool is called once, its
//! full response cached, and the new handle returned for follow-ups.

use std::{borrow::Cow, sync::Arc};

use rmcp::model::{CallToolResult, Content, Tool};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::{
    cache::{CacheHandle, ResponseCache},
    error::{ProxyError, ProxyResult},
    pool::SessionPool,
    processors::{
        Bm25SearchProcessor, ContextExtractionProcessor, ExploreProcessor, FuzzySearchProcessor,
        ProcessorPipeline, ProcessorResult, ProjectionProcessor, RegexSearchProcessor,
        DEFAULT_CONTEXT_LINES, DEFAULT_FUZZY_THRESHOLD, DEFAULT_MAX_DEPTH, DEFAULT_MAX_RESULTS,
        DEFAULT_SAMPLE_SIZE, DEFAULT_TOP_K,
    },
    proxy::{intercept::response_text, PROXY_TOOL_PREFIX},
    telemetry::ProxyMetrics,
};

pub const PROXY_TOOL_FILTER: &str = "proxy_filter";
pub const PROXY_TOOL_SEARCH: &str = "proxy_search";
pub const PROXY_TOOL_EXPLORE: &str = "proxy_explore";

const FILTER_MODES: &[&str] = &["include", "exclude"];
const SEARCH_MODES: &[&str] = &["regex", "bm25", "fuzzy", "context"];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FilterParams {
    cache_id: Option<String>,
    tool: Option<String>,
    arguments: Option<Map<String, Value>>,
    fields: Vec<String>,
    mode: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SearchParams {
    cache_id: Option<String>,
    tool: Option<String>,
    arguments: Option<Map<String, Value>>,
    pattern: String,
    mode: Option<String>,
    case_insensitive: Option<bool>,
    multiline: Option<bool>,
    max_results: Option<i64>,
    context_lines: Option<i64>,
    top_k: Option<i64>,
    fuzzy_threshold: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExploreParams {
    cache_id: Option<String>,
    tool: Option<String>,
    arguments: Option<Map<String, Value>>,
    max_depth: Option<i64>,
    sample_size: Option<i64>,
}

/// Where a tool gets its content from.
enum ContentSource {
    Cached(String),
    Fresh {
        tool: String,
        arguments: Option<Map<String, Value>>,
    },
}

fn resolve_source(
    cache_id: Option<String>,
    tool: Option<String>,
    arguments: Option<Map<String, Value>>,
) -> ProxyResult<ContentSource> {
    match (cache_id, tool) {
        (Some(_), Some(_)) => Err(ProxyError::BadArguments(
            "set either cache_id or tool, not both".to_string(),
        )),
        (None, None) => Err(ProxyError::BadArguments(
            "set cache_id for cached mode or tool for fresh mode".to_string(),
        )),
        (Some(cache_id), None) => {
            if arguments.is_some() {
                return Err(ProxyError::BadArguments(
                    "arguments is only valid in fresh mode".to_string(),
                ));
            }
            Ok(ContentSource::Cached(cache_id))
        }
        (None, Some(tool)) => Ok(ContentSource::Fresh { tool, arguments }),
    }
}

fn parse_params<'de, T: Deserialize<'de>>(
    arguments: Option<Map<String, Value>>,
) -> ProxyResult<T> {
    T::deserialize(Value::Object(arguments.unwrap_or_default()))
        .map_err(|e| ProxyError::BadArguments(e.to_string()))
}

fn validate_enum(value: &str, allowed: &[&str], what: &str) -> ProxyResult<()> {
    if allowed.contains(&value) {
        return Ok(());
    }
    Err(ProxyError::BadArguments(format!(
        "{what} must be one of {allowed:?}, got '{value}'"
    )))
}

fn non_negative(value: Option<i64>, what: &str) -> ProxyResult<Option<u64>> {
    match value {
        Some(v) if v < 0 => Err(ProxyError::BadArguments(format!(
            "{what} must be non-negative, got {v}"
        ))),
        Some(v) => Ok(Some(v as u64)),
        None => Ok(None),
    }
}

pub struct ProxyTools {
    pool: Arc<SessionPool>,
    cache: Arc<ResponseCache>,
    metrics: Arc<ProxyMetrics>,
    agent_id: String,
}

impl ProxyTools {
    pub fn new(
        pool: Arc<SessionPool>,
        cache: Arc<ResponseCache>,
        metrics: Arc<ProxyMetrics>,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            cache,
            metrics,
            agent_id: agent_id.into(),
        }
    }

    pub async fn call(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> ProxyResult<CallToolResult> {
        match name {
            PROXY_TOOL_FILTER => self.filter(arguments).await,
            PROXY_TOOL_SEARCH => self.search(arguments).await,
            PROXY_TOOL_EXPLORE => self.explore(arguments).await,
            other => Err(ProxyError::UnknownTool(other.to_string())),
        }
    }

    async fn filter(&self, arguments: Option<Map<String, Value>>) -> ProxyResult<CallToolResult> {
        let params: FilterParams = parse_params(arguments)?;
        let mode = params.mode.unwrap_or_else(|| "include".to_string());
        validate_enum(&mode, FILTER_MODES, "mode")?;

        let (content, fresh_handle) = self
            .resolve_content(params.cache_id, params.tool, params.arguments)
            .await?;

        let mut proc_params = Map::new();
        proc_params.insert(
            "fields".to_string(),
            Value::Array(params.fields.into_iter().map(Value::String).collect()),
        );
        proc_params.insert("mode".to_string(), Value::String(mode));

        let pipeline = ProcessorPipeline::new().with(Box::new(ProjectionProcessor));
        let result = run_pipeline(pipeline, content, proc_params).await?;
        Ok(render(result, fresh_handle))
    }

    async fn search(&self, arguments: Option<Map<String, Value>>) -> ProxyResult<CallToolResult> {
        let params: SearchParams = parse_params(arguments)?;
        let mode = params.mode.unwrap_or_else(|| "regex".to_string());
        validate_enum(&mode, SEARCH_MODES, "mode")?;
        let max_results = non_negative(params.max_results, "max_results")?;
        let context_lines = non_negative(params.context_lines, "context_lines")?;
        let top_k = non_negative(params.top_k, "top_k")?;
        let fuzzy_threshold = params.fuzzy_threshold.unwrap_or(DEFAULT_FUZZY_THRESHOLD);
        if !(0.0..=1.0).contains(&fuzzy_threshold) {
            return Err(ProxyError::BadArguments(format!(
                "fuzzy_threshold must be within [0, 1], got {fuzzy_threshold}"
            )));
        }

        let (content, fresh_handle) = self
            .resolve_content(params.cache_id, params.tool, params.arguments)
            .await?;

        let mut proc_params = Map::new();
        proc_params.insert("pattern".to_string(), Value::String(params.pattern));
        proc_params.insert("mode".to_string(), Value::String(mode));
        proc_params.insert(
            "case_insensitive".to_string(),
            Value::Bool(params.case_insensitive.unwrap_or(false)),
        );
        proc_params.insert(
            "multiline".to_string(),
            Value::Bool(params.multiline.unwrap_or(false)),
        );
        proc_params.insert(
            "max_results".to_string(),
            max_results.unwrap_or(DEFAULT_MAX_RESULTS as u64).into(),
        );
        proc_params.insert(
            "context_lines".to_string(),
            context_lines.unwrap_or(DEFAULT_CONTEXT_LINES as u64).into(),
        );
        proc_params.insert(
            "top_k".to_string(),
            top_k.unwrap_or(DEFAULT_TOP_K as u64).into(),
        );
        proc_params.insert("fuzzy_threshold".to_string(), fuzzy_threshold.into());

        // All four search processors are registered; the mode key selects
        // which one actually runs.
        let pipeline = ProcessorPipeline::new()
            .with(Box::new(RegexSearchProcessor))
            .with(Box::new(Bm25SearchProcessor))
            .with(Box::new(FuzzySearchProcessor))
            .with(Box::new(ContextExtractionProcessor));
        let result = run_pipeline(pipeline, content, proc_params).await?;
        Ok(render(result, fresh_handle))
    }

    async fn explore(&self, arguments: Option<Map<String, Value>>) -> ProxyResult<CallToolResult> {
        let params: ExploreParams = parse_params(arguments)?;
        let max_depth = non_negative(params.max_depth, "max_depth")?;
        let sample_size = non_negative(params.sample_size, "sample_size")?;

        let (content, fresh_handle) = self
            .resolve_content(params.cache_id, params.tool, params.arguments)
            .await?;

        let mut proc_params = Map::new();
        proc_params.insert(
            "max_depth".to_string(),
            max_depth.unwrap_or(DEFAULT_MAX_DEPTH as u64).into(),
        );
        proc_params.insert(
            "sample_size".to_string(),
            sample_size.unwrap_or(DEFAULT_SAMPLE_SIZE as u64).into(),
        );

        let pipeline = ProcessorPipeline::new().with(Box::new(ExploreProcessor));
        let result = run_pipeline(pipeline, content, proc_params).await?;
        Ok(render(result, fresh_handle))
    }

    /// Fetch content either from the cache or by calling the underlying
    /// tool; fresh mode caches the full response and reports its handle.
    async fn resolve_content(
        &self,
        cache_id: Option<String>,
        tool: Option<String>,
        arguments: Option<Map<String, Value>>,
    ) -> ProxyResult<(String, Option<CacheHandle>)> {
        match resolve_source(cache_id, tool, arguments)? {
            ContentSource::Cached(handle) => {
                let entry = self.cache.get(&handle).inspect_err(|_| {
                    self.metrics.record_cache_miss();
                })?;
                self.metrics.record_cache_hit();
                Ok((entry.content, None))
            }
            ContentSource::Fresh { tool, arguments } => {
                if tool.starts_with(PROXY_TOOL_PREFIX) {
                    return Err(ProxyError::BadArguments(
                        "fresh mode cannot target proxy tools".to_string(),
                    ));
                }
                let result = self.pool.call_tool(&tool, arguments.clone()).await?;
                if result.is_error == Some(true) {
                    return Err(ProxyError::UpstreamError(response_text(&result)));
                }
                let text = response_text(&result);
                let args_value = arguments.map_or(Value::Null, Value::Object);
                let handle = self
                    .cache
                    .put(&self.agent_id, text.clone(), &tool, args_value)?;
                Ok((text, Some(handle)))
            }
        }
    }

    /// Schemas for the three proxy tools, listed under the synthetic
    /// `proxy` upstream. Parameters are flat and primitively typed.
    pub fn descriptors() -> Vec<Tool> {
        vec![
            proxy_tool(
                PROXY_TOOL_FILTER,
                "Project fields out of a cached or fresh tool response. Dotted paths \
                 (a.b.c), array markers (items[]), wildcards (*) and _keys are supported.",
                json!({
                    "type": "object",
                    "properties": {
                        "cache_id": {
                            "type": "string",
                            "description": "Handle of a cached response (cached mode)"
                        },
                        "tool": {
                            "type": "string",
                            "description": "Qualified tool to call (fresh mode)"
                        },
                        "arguments": {
                            "type": "object",
                            "description": "Arguments for the fresh-mode tool call"
                        },
                        "fields": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "Field paths to include or exclude"
                        },
                        "mode": {
                            "type": "string",
                            "enum": FILTER_MODES,
                            "default": "include"
                        }
                    },
                    "required": ["fields"]
                }),
            ),
            proxy_tool(
                PROXY_TOOL_SEARCH,
                "Search a cached or fresh tool response. Modes: regex (line context \
                 blocks), bm25 (ranked paragraphs), fuzzy (approximate match), context \
                 (enclosing paragraph).",
                json!({
                    "type": "object",
                    "properties": {
                        "cache_id": { "type": "string" },
                        "tool": { "type": "string" },
                        "arguments": { "type": "object" },
                        "pattern": { "type": "string" },
                        "mode": {
                            "type": "string",
                            "enum": SEARCH_MODES,
                            "default": "regex"
                        },
                        "case_insensitive": { "type": "boolean", "default": false },
                        "multiline": { "type": "boolean", "default": false },
                        "max_results": { "type": "integer", "default": DEFAULT_MAX_RESULTS },
                        "context_lines": { "type": "integer", "default": DEFAULT_CONTEXT_LINES },
                        "top_k": { "type": "integer", "default": DEFAULT_TOP_K },
                        "fuzzy_threshold": { "type": "number", "default": DEFAULT_FUZZY_THRESHOLD }
                    },
                    "required": ["pattern"]
                }),
            ),
            proxy_tool(
                PROXY_TOOL_EXPLORE,
                "Summarize the structure of a cached or fresh tool response: keys, \
                 types, lengths and bounded samples, without streaming the payload.",
                json!({
                    "type": "object",
                    "properties": {
                        "cache_id": { "type": "string" },
                        "tool": { "type": "string" },
                        "arguments": { "type": "object" },
                        "max_depth": { "type": "integer", "default": 3 },
                        "sample_size": { "type": "integer", "default": 3 }
                    }
                }),
            ),
        ]
    }
}

fn proxy_tool(name: &'static str, description: &'static str, schema: Value) -> Tool {
    Tool {
        name: Cow::Borrowed(name),
        title: None,
        description: Some(Cow::Borrowed(description)),
        input_schema: Arc::new(schema.as_object().cloned().unwrap_or_default()),
        output_schema: None,
        annotations: None,
        icons: None,
    }
}

/// CPU-bound processors run off the reactor.
async fn run_pipeline(
    pipeline: ProcessorPipeline,
    content: String,
    params: Map<String, Value>,
) -> ProxyResult<ProcessorResult> {
    tokio::task::spawn_blocking(move || pipeline.run(content, &params))
        .await
        .map_err(|e| ProxyError::Processor(format!("pipeline task: {e}")))
}

fn render(result: ProcessorResult, fresh_handle: Option<CacheHandle>) -> CallToolResult {
    let mut output = result.content;
    if let Some(error) = result.error {
        output.push_str(&format!("\n\n[processor error: {error}]"));
    }
    if let Some(handle) = fresh_handle {
        output.push_str(&format!("\n\n[cache_id=\"{handle}\"]"));
    }
    CallToolResult::success(vec![Content::text(output)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cache::CacheLimits, config::ProxySettings};

    async fn tools() -> (Arc<ResponseCache>, ProxyTools) {
        let cache = Arc::new(ResponseCache::new(CacheLimits::from_settings(
            &ProxySettings::default(),
        )));
        let metrics = Arc::new(ProxyMetrics::new());
        let pool = Arc::new(
            SessionPool::start_all(Vec::new(), &ProxySettings::default(), Arc::clone(&metrics))
                .await,
        );
        let tools = ProxyTools::new(pool, Arc::clone(&cache), metrics, "agent_1");
        (cache, tools)
    }

    fn args(value: Value) -> Option<Map<String, Value>> {
        value.as_object().cloned()
    }

    fn seed(cache: &ResponseCache, content: &str) -> String {
        cache
            .put("agent_1", content.to_string(), "fs_read_file", Value::Null)
            .expect("seed")
            .to_string()
    }

    #[tokio::test]
    async fn test_filter_cached_mode() {
        let (cache, tools) = tools().await;
        let handle = seed(
            &cache,
            &json!({"users": [{"name": "A", "secret": "s"}]}).to_string(),
        );

        let result = tools
            .call(
                PROXY_TOOL_FILTER,
                args(json!({ "cache_id": handle, "fields": ["users.name"] })),
            )
            .await
            .expect("filter");
        let text = response_text(&result);
        assert!(text.contains("\"name\": \"A\""));
        assert!(!text.contains("secret"));
    }

    #[tokio::test]
    async fn test_search_cached_regex() {
        let (cache, tools) = tools().await;
        let handle = seed(&cache, "aa\nERROR b\ncc\ndd");

        let result = tools
            .call(
                PROXY_TOOL_SEARCH,
                args(json!({
                    "cache_id": handle,
                    "pattern": "ERROR",
                    "context_lines": 1
                })),
            )
            .await
            .expect("search");
        assert_eq!(response_text(&result), "aa\nERROR b\ncc");
    }

    #[tokio::test]
    async fn test_explore_cached() {
        let (cache, tools) = tools().await;
        let handle = seed(&cache, r#"{"a": 1, "b": [1, 2, 3]}"#);

        let result = tools
            .call(PROXY_TOOL_EXPLORE, args(json!({ "cache_id": handle })))
            .await
            .expect("explore");
        let summary: Value = serde_json::from_str(&response_text(&result)).unwrap();
        assert_eq!(summary["keyCount"], 2);
        assert_eq!(summary["keys"]["b"]["length"], 3);
    }

    #[tokio::test]
    async fn test_both_sources_rejected() {
        let (cache, tools) = tools().await;
        let handle = seed(&cache, "x");
        let result = tools
            .call(
                PROXY_TOOL_SEARCH,
                args(json!({
                    "cache_id": handle,
                    "tool": "fs_read_file",
                    "pattern": "x"
                })),
            )
            .await;
        assert!(matches!(result, Err(ProxyError::BadArguments(_))));
    }

    #[tokio::test]
    async fn test_neither_source_rejected() {
        let (_cache, tools) = tools().await;
        let result = tools
            .call(PROXY_TOOL_SEARCH, args(json!({ "pattern": "x" })))
            .await;
        assert!(matches!(result, Err(ProxyError::BadArguments(_))));
    }

    #[tokio::test]
    async fn test_arguments_invalid_in_cached_mode() {
        let (cache, tools) = tools().await;
        let handle = seed(&cache, "x");
        let result = tools
            .call(
                PROXY_TOOL_SEARCH,
                args(json!({
                    "cache_id": handle,
                    "arguments": {"a": 1},
                    "pattern": "x"
                })),
            )
            .await;
        assert!(matches!(result, Err(ProxyError::BadArguments(_))));
    }

    #[tokio::test]
    async fn test_invalid_mode_rejected() {
        let (cache, tools) = tools().await;
        let handle = seed(&cache, "x");
        let result = tools
            .call(
                PROXY_TOOL_SEARCH,
                args(json!({ "cache_id": handle, "pattern": "x", "mode": "semantic" })),
            )
            .await;
        assert!(matches!(result, Err(ProxyError::BadArguments(_))));
    }

    #[tokio::test]
    async fn test_negative_int_rejected() {
        let (cache, tools) = tools().await;
        let handle = seed(&cache, "x");
        let result = tools
            .call(
                PROXY_TOOL_SEARCH,
                args(json!({ "cache_id": handle, "pattern": "x", "max_results": -1 })),
            )
            .await;
        assert!(matches!(result, Err(ProxyError::BadArguments(_))));
    }

    #[tokio::test]
    async fn test_threshold_range_enforced() {
        let (cache, tools) = tools().await;
        let handle = seed(&cache, "x");
        let result = tools
            .call(
                PROXY_TOOL_SEARCH,
                args(json!({
                    "cache_id": handle,
                    "pattern": "x",
                    "mode": "fuzzy",
                    "fuzzy_threshold": 1.5
                })),
            )
            .await;
        assert!(matches!(result, Err(ProxyError::BadArguments(_))));
    }

    #[tokio::test]
    async fn test_unknown_param_rejected() {
        let (cache, tools) = tools().await;
        let handle = seed(&cache, "x");
        let result = tools
            .call(
                PROXY_TOOL_SEARCH,
                args(json!({ "cache_id": handle, "pattern": "x", "bogus": true })),
            )
            .await;
        assert!(matches!(result, Err(ProxyError::BadArguments(_))));
    }

    #[tokio::test]
    async fn test_cache_miss_surfaces() {
        let (_cache, tools) = tools().await;
        let result = tools
            .call(
                PROXY_TOOL_SEARCH,
                args(json!({ "cache_id": "agent_1:missing000mm", "pattern": "x" })),
            )
            .await;
        assert!(matches!(result, Err(ProxyError::CacheMiss(_))));
    }

    #[tokio::test]
    async fn test_fresh_mode_cannot_recurse() {
        let (_cache, tools) = tools().await;
        let result = tools
            .call(
                PROXY_TOOL_SEARCH,
                args(json!({ "tool": "proxy_search", "pattern": "x" })),
            )
            .await;
        assert!(matches!(result, Err(ProxyError::BadArguments(_))));
    }

    #[test]
    fn test_descriptors() {
        let descriptors = ProxyTools::descriptors();
        let names: Vec<&str> = descriptors.iter().map(|t| t.name.as_ref()).collect();
        assert_eq!(
            names,
            [PROXY_TOOL_FILTER, PROXY_TOOL_SEARCH, PROXY_TOOL_EXPLORE]
        );
        for tool in &descriptors {
            assert_eq!(tool.input_schema["type"], "object");
        }
    }
}
