//! Cache entries and their public handles.

use std::{fmt, time::Instant};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;

use crate::error::{ProxyError, ProxyResult};

/// Length of the random entry id (URL-safe base64, no padding).
pub const ENTRY_ID_LEN: usize = 12;

/// Generate a 12-character URL-safe entry id from 9 random bytes.
pub fn generate_entry_id() -> String {
    let mut bytes = [0u8; 9];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Public cache handle: `{agent_id}:{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheHandle {
    pub agent_id: String,
    pub id: String,
}

impl CacheHandle {
    pub fn new(agent_id: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            id: id.into(),
        }
    }

    pub fn parse(handle: &str) -> ProxyResult<Self> {
        let (agent_id, id) = handle
            .split_once(':')
            .ok_or_else(|| ProxyError::CacheMiss(handle.to_string()))?;
        if agent_id.is_empty() || id.is_empty() {
            return Err(ProxyError::CacheMiss(handle.to_string()));
        }
        Ok(Self::new(agent_id, id))
    }
}

impl fmt::Display for CacheHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.agent_id, self.id)
    }
}

/// One cached response. Content is immutable after insertion; only the
/// access bookkeeping changes.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub id: String,
    pub agent_id: String,
    pub content: String,
    pub source_tool: String,
    pub source_args: serde_json::Value,
    pub size_bytes: usize,
    pub created_at: Instant,
    pub last_accessed: Instant,
    pub access_count: u64,
}

impl CacheEntry {
    pub fn new(
        agent_id: impl Into<String>,
        content: String,
        source_tool: impl Into<String>,
        source_args: serde_json::Value,
    ) -> Self {
        let now = Instant::now();
        let size_bytes = content.len();
        Self {
            id: generate_entry_id(),
            agent_id: agent_id.into(),
            content,
            source_tool: source_tool.into(),
            source_args,
            size_bytes,
            created_at: now,
            last_accessed: now,
            access_count: 0,
        }
    }

    pub fn handle(&self) -> CacheHandle {
        CacheHandle::new(&self.agent_id, &self.id)
    }

    pub fn is_expired(&self, ttl: std::time::Duration, now: Instant) -> bool {
        now.duration_since(self.created_at) > ttl
    }

    /// Eviction weight: idle milliseconds times size.
    pub fn weight(&self, now: Instant) -> u128 {
        let idle_ms = now.duration_since(self.last_accessed).as_millis();
        idle_ms.saturating_mul(self.size_bytes as u128)
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_accessed = now;
        self.access_count += 1;
    }
}
