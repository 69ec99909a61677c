//! Aggregating MCP proxy with cached, explorable tool responses.
//!
//! One stdio-facing MCP server multiplexes a set of upstream MCP servers
//! launched as child processes. Tool catalogs are namespaced as
//! `{upstream}_{native}`; oversized responses are intercepted into a
//! per-agent cache and replaced by a truncated prefix plus a cache handle;
//! `proxy_filter`, `proxy_search`, and `proxy_explore` drill into cached
//! responses field by field and pattern by pattern.
//!
//! ## Modules
//!
//! - [`pool`]: upstream child lifecycle and call forwarding
//! - [`proxy`]: frontend, dispatch, interception, and the proxy tools
//! - [`cache`]: per-agent response cache (TTL + size-aware eviction)
//! - [`processors`]: projection, search, and structure exploration

pub mod cache;
pub mod config;
pub mod error;
pub mod inventory;
pub mod pool;
pub mod processors;
pub mod proxy;
pub mod telemetry;

pub use cache::{CacheEntry, CacheHandle, CacheLimits, ResponseCache};
pub use config::{ProxyConfig, ProxySettings, UpstreamSpec, DEFAULT_CONFIG_PATH};
pub use error::{ProxyError, ProxyResult};
pub use inventory::{QualifiedToolName, ToolDescriptor, PROXY_UPSTREAM};
pub use pool::{HealthState, SessionPool, UpstreamSession};
pub use processors::{ProcessorPipeline, ProcessorResult};
pub use proxy::{Dispatcher, ProxyFrontend, ResponseInterceptor};
pub use telemetry::{MetricsSnapshot, ProxyMetrics};
