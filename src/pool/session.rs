//! One owned connection to an upstream MCP child process.
//!
//! Lifecycle: spawn, handshake within the startup deadline, cache the tool
//! catalog, then serve calls until shutdown. Failed is terminal: the
//! session is kept as a tombstone so later calls get a structured error
//! instead of "unknown upstream". Restarts are not attempted.

use std::{borrow::Cow, sync::Arc, time::Duration};

use parking_lot::{Mutex, RwLock};
use rmcp::{
    model::{CallToolRequestParam, CallToolResult, Tool},
    service::RunningService,
    transport::{ConfigureCommandExt, TokioChildProcess},
    RoleClient, ServiceExt,
};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    config::UpstreamSpec,
    error::{ProxyError, ProxyResult},
};

type McpClient = RunningService<RoleClient, ()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Starting,
    Ready,
    Failed,
    Closing,
    Closed,
}

pub struct UpstreamSession {
    spec: UpstreamSpec,
    state: RwLock<HealthState>,
    client: Mutex<Option<Arc<McpClient>>>,
    catalog: RwLock<Vec<Tool>>,
    cancel: CancellationToken,
}

impl UpstreamSession {
    /// Spawn the child and perform the handshake. Always returns a session;
    /// on timeout or protocol error the session is a Failed tombstone.
    pub async fn start(spec: UpstreamSpec) -> Arc<Self> {
        let session = Arc::new(Self {
            state: RwLock::new(HealthState::Starting),
            client: Mutex::new(None),
            catalog: RwLock::new(Vec::new()),
            cancel: CancellationToken::new(),
            spec,
        });

        let deadline = Duration::from_millis(session.spec.startup_timeout_ms);
        match timeout(deadline, Self::connect(&session.spec)).await {
            Ok(Ok((client, tools))) => {
                info!(
                    upstream = %session.spec.name,
                    tools = tools.len(),
                    "upstream ready"
                );
                *session.client.lock() = Some(Arc::new(client));
                *session.catalog.write() = tools;
                *session.state.write() = HealthState::Ready;
            }
            Ok(Err(e)) => {
                error!(upstream = %session.spec.name, error = %e, "upstream failed to start");
                *session.state.write() = HealthState::Failed;
            }
            Err(_) => {
                error!(
                    upstream = %session.spec.name,
                    timeout_ms = session.spec.startup_timeout_ms,
                    "upstream handshake timed out"
                );
                *session.state.write() = HealthState::Failed;
            }
        }
        session
    }

    async fn connect(spec: &UpstreamSpec) -> ProxyResult<(McpClient, Vec<Tool>)> {
        let transport = TokioChildProcess::new(
            tokio::process::Command::new(&spec.command).configure(|cmd| {
                cmd.args(&spec.args)
                    .envs(spec.env.iter())
                    .stderr(std::process::Stdio::inherit());
            }),
        )
        .map_err(|e| {
            ProxyError::UpstreamUnavailable(format!("spawn '{}': {}", spec.name, e))
        })?;

        let client = ().serve(transport).await.map_err(|e| {
            ProxyError::UpstreamUnavailable(format!("initialize '{}': {}", spec.name, e))
        })?;

        let tools = client.peer().list_all_tools().await.map_err(|e| {
            ProxyError::UpstreamUnavailable(format!("list tools from '{}': {}", spec.name, e))
        })?;

        Ok((client, tools))
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn state(&self) -> HealthState {
        *self.state.read()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == HealthState::Ready
    }

    /// Snapshot of the tool catalog cached at handshake.
    pub fn catalog(&self) -> Vec<Tool> {
        self.catalog.read().clone()
    }

    /// Forward a call with the arguments untouched. The deadline covers the
    /// round trip; a dead transport transitions the session to Failed and
    /// cancels every other in-flight call against it.
    pub async fn call_tool(
        &self,
        native_name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
        deadline: Duration,
    ) -> ProxyResult<CallToolResult> {
        if !self.is_ready() {
            return Err(ProxyError::UpstreamUnavailable(self.spec.name.clone()));
        }
        let client = self
            .client
            .lock()
            .clone()
            .ok_or_else(|| ProxyError::UpstreamUnavailable(self.spec.name.clone()))?;

        let request = CallToolRequestParam {
            name: Cow::Owned(native_name.to_string()),
            arguments,
        };

        tokio::select! {
            _ = self.cancel.cancelled() => {
                Err(ProxyError::UpstreamCrashed(self.spec.name.clone()))
            }
            result = timeout(deadline, client.call_tool(request)) => match result {
                Err(_) => Err(ProxyError::UpstreamTimeout(format!(
                    "{}_{} after {}ms",
                    self.spec.name,
                    native_name,
                    deadline.as_millis()
                ))),
                Ok(Ok(result)) => Ok(result),
                Ok(Err(e)) => {
                    let message = e.to_string();
                    if transport_is_dead(&message) {
                        self.fail();
                        Err(ProxyError::UpstreamCrashed(format!(
                            "'{}': {}",
                            self.spec.name, message
                        )))
                    } else {
                        Err(ProxyError::UpstreamError(message))
                    }
                }
            }
        }
    }

    /// Ready -> Failed on unexpected child death; terminal.
    fn fail(&self) {
        {
            let mut state = self.state.write();
            if matches!(*state, HealthState::Starting | HealthState::Ready) {
                *state = HealthState::Failed;
            }
        }
        self.cancel.cancel();
        warn!(upstream = %self.spec.name, "upstream marked failed");
    }

    /// Graceful close; dropping the transport terminates the child.
    pub async fn close(&self) {
        {
            let mut state = self.state.write();
            match *state {
                HealthState::Closed | HealthState::Closing => return,
                _ => *state = HealthState::Closing,
            }
        }
        self.cancel.cancel();

        let client = self.client.lock().take();
        if let Some(client) = client {
            match Arc::try_unwrap(client) {
                Ok(client) => {
                    if let Err(e) = client.cancel().await {
                        warn!(upstream = %self.spec.name, error = %e, "error closing upstream");
                    }
                }
                Err(_) => {
                    warn!(
                        upstream = %self.spec.name,
                        "upstream client still in use at shutdown"
                    );
                }
            }
        }
        *self.state.write() = HealthState::Closed;
        info!(upstream = %self.spec.name, "upstream closed");
    }
}

/// Stringly detection of a dead transport, mirroring the error text the
/// MCP SDK produces when the child side goes away.
fn transport_is_dead(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("transport")
        || message.contains("connection closed")
        || message.contains("channel closed")
        || message.contains("broken pipe")
}
