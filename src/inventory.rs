//! Qualified tool naming and catalog entries.
//!
//! Client-visible tool names are `{upstream}_{native}`. Upstream names may
//! themselves contain underscores, so parsing resolves against the set of
//! configured upstreams, preferring the longest matching prefix.

use std::{borrow::Cow, fmt};

use rmcp::model::Tool;

/// Name of the synthetic upstream owning the proxy's own tools.
pub const PROXY_UPSTREAM: &str = "proxy";

/// Unique tool identifier: `{upstream}_{native}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedToolName {
    pub upstream: String,
    pub native: String,
}

impl QualifiedToolName {
    pub fn new(upstream: impl Into<String>, native: impl Into<String>) -> Self {
        Self {
            upstream: upstream.into(),
            native: native.into(),
        }
    }

    /// Resolve a client-visible name against the known upstreams.
    ///
    /// `github_enterprise_list_repos` with upstreams `github` and
    /// `github_enterprise` resolves to the latter.
    pub fn resolve<S: AsRef<str>>(qualified: &str, upstreams: &[S]) -> Option<Self> {
        let mut best: Option<&str> = None;
        for upstream in upstreams {
            let upstream = upstream.as_ref();
            let prefix_len = upstream.len() + 1;
            if qualified.len() > prefix_len
                && qualified.starts_with(upstream)
                && qualified.as_bytes()[upstream.len()] == b'_'
                && best.map_or(true, |b| upstream.len() > b.len())
            {
                best = Some(upstream);
            }
        }
        best.map(|upstream| Self::new(upstream, &qualified[upstream.len() + 1..]))
    }

    pub fn qualified(&self) -> String {
        format!("{}_{}", self.upstream, self.native)
    }
}

impl fmt::Display for QualifiedToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.upstream, self.native)
    }
}

/// One catalog entry: the upstream's tool, renamed for the client but with
/// its schema untouched.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: QualifiedToolName,
    pub tool: Tool,
}

impl ToolDescriptor {
    pub fn from_upstream_tool(upstream: impl Into<String>, tool: Tool) -> Self {
        let native = tool.name.to_string();
        Self {
            name: QualifiedToolName::new(upstream, native),
            tool,
        }
    }

    pub fn qualified_name(&self) -> String {
        self.name.qualified()
    }

    pub fn upstream(&self) -> &str {
        &self.name.upstream
    }

    pub fn native_name(&self) -> &str {
        &self.name.native
    }

    /// The tool as listed to the client: qualified name, original schema.
    pub fn listed_tool(&self) -> Tool {
        let mut tool = self.tool.clone();
        tool.name = Cow::Owned(self.qualified_name());
        tool
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn create_test_tool(name: &str) -> Tool {
        Tool {
            name: Cow::Owned(name.to_string()),
            title: None,
            description: Some(Cow::Owned(format!("Test tool: {name}"))),
            input_schema: Arc::new(serde_json::Map::new()),
            output_schema: None,
            annotations: None,
            icons: None,
        }
    }

    #[test]
    fn test_qualified_roundtrip() {
        let name = QualifiedToolName::new("fs", "read_file");
        assert_eq!(name.qualified(), "fs_read_file");
        assert_eq!(format!("{name}"), "fs_read_file");
    }

    #[test]
    fn test_resolve_simple() {
        let upstreams = vec!["fs".to_string(), "web".to_string()];
        let name = QualifiedToolName::resolve("fs_read_file", &upstreams).unwrap();
        assert_eq!(name.upstream, "fs");
        assert_eq!(name.native, "read_file");
    }

    #[test]
    fn test_resolve_prefers_longest_upstream() {
        let upstreams = vec!["github".to_string(), "github_enterprise".to_string()];
        let name = QualifiedToolName::resolve("github_enterprise_list_repos", &upstreams).unwrap();
        assert_eq!(name.upstream, "github_enterprise");
        assert_eq!(name.native, "list_repos");
    }

    #[test]
    fn test_resolve_unknown_upstream() {
        let upstreams = vec!["fs".to_string()];
        assert!(QualifiedToolName::resolve("web_fetch", &upstreams).is_none());
        // Bare upstream name with no native part does not resolve.
        assert!(QualifiedToolName::resolve("fs_", &upstreams).is_none());
        assert!(QualifiedToolName::resolve("fs", &upstreams).is_none());
    }

    #[test]
    fn test_listed_tool_keeps_schema() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": { "path": { "type": "string" } }
        });
        let mut tool = create_test_tool("read_file");
        tool.input_schema = Arc::new(schema.as_object().cloned().unwrap());

        let descriptor = ToolDescriptor::from_upstream_tool("fs", tool.clone());
        let listed = descriptor.listed_tool();
        assert_eq!(listed.name.as_ref(), "fs_read_file");
        // Schema passes through bitwise identical.
        assert_eq!(listed.input_schema, tool.input_schema);
        assert_eq!(listed.description, tool.description);
    }
}
