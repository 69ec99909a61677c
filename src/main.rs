//! Proxy binary: load `mcp.json`, boot the pool, serve MCP over stdio.

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use rmcp::{transport::stdio, ServiceExt};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use mcp_lens::{
    cache::CacheLimits,
    config::{ProxyConfig, DEFAULT_CONFIG_PATH},
    proxy::{Dispatcher, ProxyFrontend},
    telemetry::ProxyMetrics,
    ResponseCache, SessionPool,
};

/// Aggregating MCP proxy with cached, explorable tool responses.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Path to the configuration file (defaults to ./mcp.json).
    #[arg(long, env = "CONFIG_FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    let config_path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = match ProxyConfig::from_file(&config_path).await {
        Ok(config) => config,
        Err(e) => {
            error!(path = %config_path.display(), error = %e, "configuration error");
            std::process::exit(1);
        }
    };

    std::process::exit(run(config).await);
}

/// Map `LOG_LEVEL` (DEBUG|INFO|WARNING|ERROR|CRITICAL) onto an env filter.
/// Logs go to stderr; stdout carries the MCP transport.
fn init_tracing() {
    let level = match std::env::var("LOG_LEVEL")
        .unwrap_or_default()
        .to_ascii_uppercase()
        .as_str()
    {
        "DEBUG" => "debug",
        "WARNING" => "warn",
        "ERROR" | "CRITICAL" => "error",
        _ => "info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

async fn run(config: ProxyConfig) -> i32 {
    let settings = config.proxy_settings.clone();
    let specs = config.upstream_specs();
    let configured = specs.len();

    let metrics = Arc::new(ProxyMetrics::new());
    let pool = Arc::new(SessionPool::start_all(specs, &settings, Arc::clone(&metrics)).await);
    if configured > 0 && pool.ready_count() == 0 {
        error!(configured, "no upstreams could be started");
        pool.shutdown().await;
        return 2;
    }

    let mut cache = ResponseCache::new(CacheLimits::from_settings(&settings));
    {
        let metrics = Arc::clone(&metrics);
        cache.set_eviction_callback(move |_handle| metrics.record_cache_eviction());
    }
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&pool),
        Arc::new(cache),
        &settings,
        Arc::clone(&metrics),
        "agent_1",
    ));

    let frontend = ProxyFrontend::new(dispatcher);
    let service = match frontend.serve(stdio()).await {
        Ok(service) => service,
        Err(e) => {
            error!(error = %e, "failed to serve stdio transport");
            pool.shutdown().await;
            return 2;
        }
    };

    info!(
        upstreams = pool.ready_count(),
        tools = pool.stats().tool_count,
        "proxy ready"
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
        result = service.waiting() => match result {
            Ok(_) => info!("client disconnected"),
            Err(e) => warn!(error = %e, "client transport error"),
        },
    }

    pool.shutdown().await;
    let snapshot = metrics.snapshot();
    info!(
        calls = snapshot.total_calls,
        truncated = snapshot.truncated_responses,
        "proxy stopped"
    );
    0
}
