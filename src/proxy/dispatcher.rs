//! Call routing: proxy tools vs upstream forwarding plus interception.

use std::sync::Arc;

use rmcp::model::{CallToolResult, Tool};
use serde_json::{Map, Value};

use super::{
    intercept::ResponseInterceptor,
    tools::ProxyTools,
    PROXY_TOOL_PREFIX,
};
use crate::{
    cache::ResponseCache,
    config::ProxySettings,
    error::ProxyResult,
    pool::SessionPool,
    telemetry::ProxyMetrics,
};

pub struct Dispatcher {
    pool: Arc<SessionPool>,
    tools: ProxyTools,
    interceptor: ResponseInterceptor,
    metrics: Arc<ProxyMetrics>,
    agent_id: String,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<SessionPool>,
        cache: Arc<ResponseCache>,
        settings: &ProxySettings,
        metrics: Arc<ProxyMetrics>,
        agent_id: impl Into<String>,
    ) -> Self {
        let agent_id = agent_id.into();
        Self {
            tools: ProxyTools::new(
                Arc::clone(&pool),
                Arc::clone(&cache),
                Arc::clone(&metrics),
                agent_id.clone(),
            ),
            interceptor: ResponseInterceptor::new(cache, settings, Arc::clone(&metrics)),
            pool,
            metrics,
            agent_id,
        }
    }

    /// Upstream tools under their qualified names, then the proxy tools.
    pub fn list_tools(&self) -> Vec<Tool> {
        self.pool
            .list_tools()
            .iter()
            .map(|d| d.listed_tool())
            .chain(ProxyTools::descriptors())
            .collect()
    }

    /// Route one client call. Upstream-bound arguments travel verbatim; the
    /// reply passes through the interceptor.
    pub async fn dispatch(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> ProxyResult<CallToolResult> {
        if name.starts_with(PROXY_TOOL_PREFIX) {
            let started = std::time::Instant::now();
            self.metrics.record_call_start();
            let result = self.tools.call(name, arguments).await;
            self.metrics.record_call_end(
                name,
                result.is_ok(),
                started.elapsed().as_millis() as u64,
            );
            return result;
        }
        let result = self.pool.call_tool(name, arguments.clone()).await?;
        Ok(self
            .interceptor
            .intercept(&self.agent_id, name, &arguments, result))
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }
}
