//! Response interception: oversized replies are cached whole and replaced
//! by a truncated prefix plus a trailer advertising the cache handle.

use std::sync::Arc;

use rmcp::model::{CallToolResult, Content};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::{
    cache::ResponseCache,
    config::ProxySettings,
    telemetry::ProxyMetrics,
};

/// The literal trailer clients pattern-match on.
pub fn truncation_trailer(handle: &str) -> String {
    format!(
        "\n\n[Response truncated. Full content cached. Use cache_id=\"{handle}\" with proxy_filter, proxy_search, or proxy_explore to access.]"
    )
}

/// Render a tool result's content as text: text blocks joined by newline,
/// anything else serialized as the JSON content array.
pub fn response_text(result: &CallToolResult) -> String {
    let texts: Option<Vec<&str>> = result
        .content
        .iter()
        .map(|c| c.as_text().map(|t| t.text.as_str()))
        .collect();
    match texts {
        Some(texts) => texts.join("\n"),
        None => serde_json::to_string(&result.content).unwrap_or_default(),
    }
}

/// Byte offset of the first UTF-8 boundary after `chars` characters.
pub(crate) fn char_boundary_offset(s: &str, chars: usize) -> usize {
    s.char_indices().nth(chars).map_or(s.len(), |(i, _)| i)
}

pub struct ResponseInterceptor {
    cache: Arc<ResponseCache>,
    max_response_size: usize,
    auto_truncate: bool,
    metrics: Arc<ProxyMetrics>,
}

impl ResponseInterceptor {
    pub fn new(
        cache: Arc<ResponseCache>,
        settings: &ProxySettings,
        metrics: Arc<ProxyMetrics>,
    ) -> Self {
        Self {
            cache,
            max_response_size: settings.max_response_size,
            auto_truncate: settings.enable_auto_truncation,
            metrics,
        }
    }

    /// Cache and truncate oversized successful responses; everything else
    /// passes through untouched.
    pub fn intercept(
        &self,
        agent_id: &str,
        source_tool: &str,
        source_args: &Option<Map<String, Value>>,
        result: CallToolResult,
    ) -> CallToolResult {
        if !self.auto_truncate || result.is_error == Some(true) {
            return result;
        }
        let text = response_text(&result);
        let char_count = text.chars().count();
        if char_count <= self.max_response_size {
            return result;
        }

        let args_value = source_args
            .as_ref()
            .map_or(Value::Null, |m| Value::Object(m.clone()));
        match self
            .cache
            .put(agent_id, text.clone(), source_tool, args_value)
        {
            Ok(handle) => {
                self.metrics.record_truncation();
                info!(
                    tool = source_tool,
                    chars = char_count,
                    cache_id = %handle,
                    "truncated oversized response"
                );
                let cut = char_boundary_offset(&text, self.max_response_size);
                let mut reply = text[..cut].to_string();
                reply.push_str(&truncation_trailer(&handle.to_string()));
                CallToolResult::success(vec![Content::text(reply)])
            }
            Err(e) => {
                warn!(
                    tool = source_tool,
                    error = %e,
                    "could not cache oversized response; returning it whole"
                );
                result
            }
        }
    }
}
