//! Proxy configuration types and loading.
//!
//! Defines the `mcp.json` schema: upstream server declarations plus the
//! proxy-level settings (truncation threshold, cache sizing, timeouts).
//! Validated once at load time; immutable afterwards.

use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::{ProxyError, ProxyResult};

/// Default config path when neither `--config` nor `CONFIG_FILE` is set.
pub const DEFAULT_CONFIG_PATH: &str = "mcp.json";

const MAX_UPSTREAM_NAME_LEN: usize = 100;

/// Top-level `mcp.json` document.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Upstream MCP servers, keyed by unique name.
    #[serde(default, rename = "mcpServers")]
    pub mcp_servers: HashMap<String, UpstreamDecl>,

    /// Proxy-level settings; missing keys fall back to defaults.
    #[serde(default, rename = "proxySettings")]
    pub proxy_settings: ProxySettings,
}

/// One upstream server declaration as it appears in `mcpServers`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamDecl {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Per-upstream handshake deadline; falls back to
    /// `proxySettings.startupTimeoutMs`.
    #[serde(default, rename = "startupTimeoutMs")]
    pub startup_timeout_ms: Option<u64>,
}

/// Validated, named upstream description. Immutable after load.
#[derive(Debug, Clone)]
pub struct UpstreamSpec {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub startup_timeout_ms: u64,
}

/// Proxy behavior knobs from `proxySettings`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxySettings {
    /// Truncation threshold in characters.
    #[serde(default = "default_max_response_size")]
    pub max_response_size: usize,

    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,

    #[serde(default = "default_cache_ttl", rename = "cacheTTLSeconds")]
    pub cache_ttl_seconds: u64,

    #[serde(default = "default_true")]
    pub enable_auto_truncation: bool,

    /// Per-agent byte cap for cached responses.
    #[serde(default = "default_cache_max_bytes")]
    pub cache_max_bytes: usize,

    /// Global cap on distinct agents holding cache entries.
    #[serde(default = "default_cache_max_agents")]
    pub cache_max_agents: usize,

    /// Deadline for a single upstream tool call.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Default handshake deadline for upstream startup.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_ms: u64,
}

fn default_max_response_size() -> usize {
    8000
}

fn default_cache_max_entries() -> usize {
    50
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_cache_max_bytes() -> usize {
    50 * 1024 * 1024
}

fn default_cache_max_agents() -> usize {
    64
}

fn default_request_timeout() -> u64 {
    30_000
}

fn default_startup_timeout() -> u64 {
    10_000
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            max_response_size: default_max_response_size(),
            cache_max_entries: default_cache_max_entries(),
            cache_ttl_seconds: default_cache_ttl(),
            enable_auto_truncation: true,
            cache_max_bytes: default_cache_max_bytes(),
            cache_max_agents: default_cache_max_agents(),
            request_timeout_ms: default_request_timeout(),
            startup_timeout_ms: default_startup_timeout(),
        }
    }
}

impl ProxyConfig {
    /// Load and validate a configuration file.
    pub async fn from_file(path: impl AsRef<Path>) -> ProxyResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            ProxyError::ConfigInvalid(format!("read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| ProxyError::ConfigInvalid(format!("parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate names, commands, and settings ranges.
    pub fn validate(&self) -> ProxyResult<()> {
        for (name, decl) in &self.mcp_servers {
            if !is_valid_upstream_name(name) {
                return Err(ProxyError::ConfigInvalid(format!(
                    "upstream name '{}' must match [A-Za-z0-9_-]{{1,{}}}",
                    name, MAX_UPSTREAM_NAME_LEN
                )));
            }
            if decl.command.trim().is_empty() {
                return Err(ProxyError::ConfigInvalid(format!(
                    "upstream '{}' has an empty command",
                    name
                )));
            }
            if decl.startup_timeout_ms == Some(0) {
                return Err(ProxyError::ConfigInvalid(format!(
                    "upstream '{}': startupTimeoutMs must be positive",
                    name
                )));
            }
        }

        let s = &self.proxy_settings;
        if s.max_response_size == 0 {
            return Err(ProxyError::ConfigInvalid(
                "maxResponseSize must be positive".to_string(),
            ));
        }
        if s.cache_max_entries == 0 {
            return Err(ProxyError::ConfigInvalid(
                "cacheMaxEntries must be positive".to_string(),
            ));
        }
        if s.cache_ttl_seconds == 0 {
            return Err(ProxyError::ConfigInvalid(
                "cacheTTLSeconds must be positive".to_string(),
            ));
        }
        if s.cache_max_bytes == 0 {
            return Err(ProxyError::ConfigInvalid(
                "cacheMaxBytes must be positive".to_string(),
            ));
        }
        if s.cache_max_agents == 0 {
            return Err(ProxyError::ConfigInvalid(
                "cacheMaxAgents must be positive".to_string(),
            ));
        }
        if s.request_timeout_ms == 0 {
            return Err(ProxyError::ConfigInvalid(
                "requestTimeoutMs must be positive".to_string(),
            ));
        }
        if s.startup_timeout_ms == 0 {
            return Err(ProxyError::ConfigInvalid(
                "startupTimeoutMs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Produce the immutable upstream specs, sorted by name for a
    /// deterministic startup order.
    pub fn upstream_specs(&self) -> Vec<UpstreamSpec> {
        let mut names: Vec<&String> = self.mcp_servers.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| {
                let decl = &self.mcp_servers[name];
                UpstreamSpec {
                    name: name.clone(),
                    command: decl.command.clone(),
                    args: decl.args.clone(),
                    env: decl.env.clone(),
                    startup_timeout_ms: decl
                        .startup_timeout_ms
                        .unwrap_or(self.proxy_settings.startup_timeout_ms),
                }
            })
            .collect()
    }
}

/// `[A-Za-z0-9_-]{1,100}`
pub fn is_valid_upstream_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_UPSTREAM_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let s = ProxySettings::default();
        assert_eq!(s.max_response_size, 8000);
        assert_eq!(s.cache_max_entries, 50);
        assert_eq!(s.cache_ttl_seconds, 300);
        assert!(s.enable_auto_truncation);
        assert_eq!(s.request_timeout_ms, 30_000);
    }

    #[test]
    fn test_minimal_config() {
        let json = r#"
{
  "mcpServers": {
    "fs": { "command": "mcp-server-fs" }
  }
}
"#;
        let config: ProxyConfig = serde_json::from_str(json).expect("parse");
        config.validate().expect("valid");
        assert_eq!(config.mcp_servers.len(), 1);
        assert!(config.mcp_servers["fs"].args.is_empty());
        assert_eq!(config.proxy_settings.max_response_size, 8000);

        let specs = config.upstream_specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "fs");
        assert_eq!(specs[0].startup_timeout_ms, 10_000);
    }

    #[test]
    fn test_full_config() {
        let json = r#"
{
  "mcpServers": {
    "fs": {
      "command": "mcp-server-fs",
      "args": ["--root", "/tmp"],
      "env": { "FS_MODE": "ro" },
      "startupTimeoutMs": 2500
    },
    "web": { "command": "mcp-server-web" }
  },
  "proxySettings": {
    "maxResponseSize": 4000,
    "cacheMaxEntries": 10,
    "cacheTTLSeconds": 60,
    "enableAutoTruncation": false
  }
}
"#;
        let config: ProxyConfig = serde_json::from_str(json).expect("parse");
        config.validate().expect("valid");
        assert_eq!(config.proxy_settings.max_response_size, 4000);
        assert_eq!(config.proxy_settings.cache_max_entries, 10);
        assert_eq!(config.proxy_settings.cache_ttl_seconds, 60);
        assert!(!config.proxy_settings.enable_auto_truncation);
        // Unspecified settings keep defaults.
        assert_eq!(config.proxy_settings.request_timeout_ms, 30_000);

        let specs = config.upstream_specs();
        assert_eq!(specs.len(), 2);
        // Sorted by name.
        assert_eq!(specs[0].name, "fs");
        assert_eq!(specs[0].startup_timeout_ms, 2500);
        assert_eq!(specs[1].name, "web");
        assert_eq!(specs[1].startup_timeout_ms, 10_000);
        assert_eq!(specs[0].env.get("FS_MODE").unwrap(), "ro");
    }

    #[test]
    fn test_invalid_upstream_name() {
        let json = r#"{ "mcpServers": { "bad name": { "command": "x" } } }"#;
        let config: ProxyConfig = serde_json::from_str(json).expect("parse");
        assert!(matches!(
            config.validate(),
            Err(ProxyError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_empty_command_rejected() {
        let json = r#"{ "mcpServers": { "fs": { "command": "  " } } }"#;
        let config: ProxyConfig = serde_json::from_str(json).expect("parse");
        assert!(matches!(
            config.validate(),
            Err(ProxyError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_zero_settings_rejected() {
        let json = r#"{ "proxySettings": { "maxResponseSize": 0 } }"#;
        let config: ProxyConfig = serde_json::from_str(json).expect("parse");
        assert!(matches!(
            config.validate(),
            Err(ProxyError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_name_charset() {
        assert!(is_valid_upstream_name("fs"));
        assert!(is_valid_upstream_name("my_server-2"));
        assert!(!is_valid_upstream_name(""));
        assert!(!is_valid_upstream_name("has space"));
        assert!(!is_valid_upstream_name("dot.dot"));
        assert!(!is_valid_upstream_name(&"x".repeat(101)));
    }
}
