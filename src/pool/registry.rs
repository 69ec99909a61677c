//! Pool of upstream sessions and qualified-name call routing.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use futures::future::join_all;
use rmcp::model::CallToolResult;
use tokio::time::timeout;
use tracing::{info, warn};

use super::session::{HealthState, UpstreamSession};
use crate::{
    config::{ProxySettings, UpstreamSpec},
    error::{ProxyError, ProxyResult},
    inventory::{QualifiedToolName, ToolDescriptor},
    telemetry::ProxyMetrics,
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct SessionPool {
    sessions: DashMap<String, Arc<UpstreamSession>>,
    /// Upstream names in startup order; also the resolution set for
    /// qualified-name parsing.
    names: Vec<String>,
    request_timeout: Duration,
    metrics: Arc<ProxyMetrics>,
}

impl SessionPool {
    /// Start every configured upstream in parallel. Boot succeeds even when
    /// some (or all) fail; failed sessions stay as tombstones.
    pub async fn start_all(
        specs: Vec<UpstreamSpec>,
        settings: &ProxySettings,
        metrics: Arc<ProxyMetrics>,
    ) -> Self {
        let names: Vec<String> = specs.iter().map(|s| s.name.clone()).collect();
        let sessions = DashMap::new();

        let started = join_all(specs.into_iter().map(UpstreamSession::start)).await;
        for session in started {
            sessions.insert(session.name().to_string(), session);
        }

        let pool = Self {
            sessions,
            names,
            request_timeout: Duration::from_millis(settings.request_timeout_ms),
            metrics,
        };

        let ready = pool.ready_count();
        let configured = pool.configured_count();
        if ready == configured {
            info!(upstreams = ready, "all upstreams ready");
        } else {
            warn!(
                ready,
                configured,
                "running degraded: some upstreams failed to start"
            );
        }
        pool
    }

    pub fn configured_count(&self) -> usize {
        self.names.len()
    }

    pub fn ready_count(&self) -> usize {
        self.sessions.iter().filter(|e| e.value().is_ready()).count()
    }

    pub fn upstream_names(&self) -> &[String] {
        &self.names
    }

    pub fn get(&self, name: &str) -> Option<Arc<UpstreamSession>> {
        self.sessions.get(name).map(|e| Arc::clone(e.value()))
    }

    /// Union of every ready upstream's catalog, in startup order, with
    /// qualified names. A session is either fully listed or absent.
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        let mut descriptors = Vec::new();
        for name in &self.names {
            let Some(session) = self.get(name) else {
                continue;
            };
            if !session.is_ready() {
                continue;
            }
            for tool in session.catalog() {
                descriptors.push(ToolDescriptor::from_upstream_tool(name.clone(), tool));
            }
        }
        descriptors
    }

    /// Resolve a qualified name to its owning session and native tool name.
    pub fn resolve(&self, qualified: &str) -> ProxyResult<(Arc<UpstreamSession>, String)> {
        let name = QualifiedToolName::resolve(qualified, &self.names)
            .ok_or_else(|| ProxyError::UnknownTool(qualified.to_string()))?;
        let session = self
            .get(&name.upstream)
            .ok_or_else(|| ProxyError::UnknownTool(qualified.to_string()))?;
        Ok((session, name.native))
    }

    /// Forward a call to the owning upstream, arguments verbatim.
    pub async fn call_tool(
        &self,
        qualified: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> ProxyResult<CallToolResult> {
        let (session, native) = self.resolve(qualified)?;

        let started = std::time::Instant::now();
        self.metrics.record_call_start();
        let result = session
            .call_tool(&native, arguments, self.request_timeout)
            .await;
        self.metrics.record_call_end(
            qualified,
            result.is_ok(),
            started.elapsed().as_millis() as u64,
        );
        result
    }

    /// Close every session in parallel, bounded by a grace period; dropping
    /// a transport after the deadline terminates its child forcefully.
    pub async fn shutdown(&self) {
        info!(upstreams = self.sessions.len(), "shutting down session pool");
        let sessions: Vec<Arc<UpstreamSession>> = self
            .sessions
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        let closers = sessions.iter().map(|s| s.close());
        if timeout(SHUTDOWN_GRACE, join_all(closers)).await.is_err() {
            warn!("shutdown grace period elapsed; terminating remaining children");
        }
    }

    pub fn stats(&self) -> PoolStats {
        let failed = self
            .sessions
            .iter()
            .filter(|e| e.value().state() == HealthState::Failed)
            .count();
        PoolStats {
            configured: self.configured_count(),
            ready: self.ready_count(),
            failed,
            tool_count: self.list_tools().len(),
        }
    }
}

/// Session pool statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub configured: usize,
    pub ready: usize,
    pub failed: usize,
    pub tool_count: usize,
}
