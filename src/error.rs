//! Proxy error types.
//!
//! One variant per failure class surfaced to the client. Session lifecycle
//! errors are retained inside the pool; per-call errors are reported to the
//! caller; processor errors are absorbed by the pipeline.

use thiserror::Error;

pub type ProxyResult<T> = Result<T, ProxyError>;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Upstream crashed: {0}")]
    UpstreamCrashed(String),

    #[error("Upstream call timed out: {0}")]
    UpstreamTimeout(String),

    #[error("Upstream error: {0}")]
    UpstreamError(String),

    #[error("Cache miss: {0}")]
    CacheMiss(String),

    #[error("Cache entry expired: {0}")]
    CacheExpired(String),

    #[error("Cache full: {0}")]
    CacheFull(String),

    #[error("Too many agents: {0}")]
    TooManyAgents(String),

    #[error("Bad arguments: {0}")]
    BadArguments(String),

    #[error("Processor failed: {0}")]
    Processor(String),
}

impl ProxyError {
    /// Short machine-readable kind, prepended to client-facing messages so
    /// callers can pattern-match failures without parsing prose.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::ConfigInvalid(_) => "ConfigInvalid",
            ProxyError::UnknownTool(_) => "UnknownTool",
            ProxyError::UpstreamUnavailable(_) => "UpstreamUnavailable",
            ProxyError::UpstreamCrashed(_) => "UpstreamCrashed",
            ProxyError::UpstreamTimeout(_) => "UpstreamTimeout",
            ProxyError::UpstreamError(_) => "UpstreamError",
            ProxyError::CacheMiss(_) => "CacheMiss",
            ProxyError::CacheExpired(_) => "CacheExpired",
            ProxyError::CacheFull(_) => "CacheFull",
            ProxyError::TooManyAgents(_) => "TooManyAgents",
            ProxyError::BadArguments(_) => "BadArguments",
            ProxyError::Processor(_) => "ProcessorError",
        }
    }
}
