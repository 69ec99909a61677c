//! Client-facing MCP server handler.
//!
//! Terminates the client protocol over stdio and hands every call to the
//! dispatcher. Resolution and validation failures surface as protocol
//! errors; upstream and cache failures surface as tool errors so the
//! session stays usable.

use std::sync::Arc;

use rmcp::{
    model::{
        CallToolRequestParam, CallToolResult, Content, ListToolsResult, PaginatedRequestParam,
        ServerCapabilities, ServerInfo,
    },
    service::RequestContext,
    ErrorData, RoleServer, ServerHandler,
};

use super::dispatcher::Dispatcher;
use crate::error::ProxyError;

#[derive(Clone)]
pub struct ProxyFrontend {
    dispatcher: Arc<Dispatcher>,
}

impl ProxyFrontend {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl ServerHandler for ProxyFrontend {
    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult {
            tools: self.dispatcher.list_tools(),
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        match self
            .dispatcher
            .dispatch(request.name.as_ref(), request.arguments)
            .await
        {
            Ok(result) => Ok(result),
            Err(err @ (ProxyError::UnknownTool(_) | ProxyError::BadArguments(_))) => Err(
                ErrorData::invalid_params(format!("{}: {}", err.kind(), err), None),
            ),
            Err(err) => Ok(CallToolResult::error(vec![Content::text(format!(
                "{}: {}",
                err.kind(),
                err
            ))])),
        }
    }

    fn get_info(&self) -> ServerInfo {
        let mut info = ServerInfo::default();
        info.server_info.name = "mcp-lens".to_string();
        info.server_info.version = env!("CARGO_PKG_VERSION").to_string();
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info.instructions = Some(
            "Aggregates the configured MCP servers under one catalog. Oversized tool \
             responses are cached and truncated with a cache_id trailer; use \
             proxy_filter, proxy_search, or proxy_explore to drill into them."
                .to_string(),
        );
        info
    }
}
