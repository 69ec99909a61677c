//! Size-aware, per-agent response cache.
//!
//! One logical lock guards the whole store; `put` and `get` are
//! linearizable per handle. Expired entries are swept lazily on access and
//! opportunistically on insert. The eviction victim is the entry maximizing
//! `idle_ms * size_bytes` (ties broken by oldest access).

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::debug;

use super::entry::{CacheEntry, CacheHandle};
use crate::{
    config::ProxySettings,
    error::{ProxyError, ProxyResult},
};

type EvictionCallback = Arc<dyn Fn(&CacheHandle) + Send + Sync>;

/// Sizing limits for the store.
#[derive(Debug, Clone)]
pub struct CacheLimits {
    pub max_entries_per_agent: usize,
    pub max_bytes_per_agent: usize,
    pub max_agents: usize,
    pub ttl: Duration,
}

impl CacheLimits {
    pub fn from_settings(settings: &ProxySettings) -> Self {
        Self {
            max_entries_per_agent: settings.cache_max_entries,
            max_bytes_per_agent: settings.cache_max_bytes,
            max_agents: settings.cache_max_agents,
            ttl: Duration::from_secs(settings.cache_ttl_seconds),
        }
    }
}

#[derive(Default)]
struct AgentSlot {
    entries: HashMap<String, CacheEntry>,
    total_bytes: usize,
}

impl AgentSlot {
    fn remove(&mut self, id: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(id)?;
        self.total_bytes -= entry.size_bytes;
        Some(entry)
    }

    fn insert(&mut self, entry: CacheEntry) {
        self.total_bytes += entry.size_bytes;
        self.entries.insert(entry.id.clone(), entry);
    }

    fn sweep_expired(&mut self, ttl: Duration, now: Instant) {
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|e| e.is_expired(ttl, now))
            .map(|e| e.id.clone())
            .collect();
        for id in expired {
            self.remove(&id);
        }
    }

    /// Victim id by max `idle * size`; ties broken by oldest access.
    fn victim(&self, now: Instant) -> Option<String> {
        self.entries
            .values()
            .max_by(|a, b| {
                a.weight(now)
                    .cmp(&b.weight(now))
                    // On equal weight prefer the entry accessed longest ago,
                    // i.e. the *smaller* last_accessed wins as victim.
                    .then(b.last_accessed.cmp(&a.last_accessed))
            })
            .map(|e| e.id.clone())
    }
}

/// Thread-safe cache store, shared across requests.
pub struct ResponseCache {
    agents: Mutex<HashMap<String, AgentSlot>>,
    limits: CacheLimits,
    eviction_callback: Option<EvictionCallback>,
}

impl ResponseCache {
    pub fn new(limits: CacheLimits) -> Self {
        Self {
            agents: Mutex::new(HashMap::new()),
            limits,
            eviction_callback: None,
        }
    }

    pub fn set_eviction_callback<F>(&mut self, callback: F)
    where
        F: Fn(&CacheHandle) + Send + Sync + 'static,
    {
        self.eviction_callback = Some(Arc::new(callback));
    }

    pub fn limits(&self) -> &CacheLimits {
        &self.limits
    }

    /// Insert a response, enforcing per-agent caps by evicting size-aware
    /// LRU victims until both caps hold.
    pub fn put(
        &self,
        agent_id: &str,
        content: String,
        source_tool: &str,
        source_args: serde_json::Value,
    ) -> ProxyResult<CacheHandle> {
        let entry = CacheEntry::new(agent_id, content, source_tool, source_args);
        if entry.size_bytes > self.limits.max_bytes_per_agent {
            return Err(ProxyError::CacheFull(format!(
                "entry of {} bytes exceeds the {}-byte agent cap",
                entry.size_bytes, self.limits.max_bytes_per_agent
            )));
        }

        let now = Instant::now();
        let mut agents = self.agents.lock();

        if !agents.contains_key(agent_id) && agents.len() >= self.limits.max_agents {
            return Err(ProxyError::TooManyAgents(format!(
                "{} agents registered (cap {})",
                agents.len(),
                self.limits.max_agents
            )));
        }
        let slot = agents.entry(agent_id.to_string()).or_default();

        slot.sweep_expired(self.limits.ttl, now);

        while slot.entries.len() >= self.limits.max_entries_per_agent
            || slot.total_bytes + entry.size_bytes > self.limits.max_bytes_per_agent
        {
            let Some(victim_id) = slot.victim(now) else {
                return Err(ProxyError::CacheFull(format!(
                    "agent '{agent_id}' has no evictable entries"
                )));
            };
            if let Some(victim) = slot.remove(&victim_id) {
                debug!(
                    agent = agent_id,
                    id = %victim.id,
                    size = victim.size_bytes,
                    "evicted cache entry"
                );
                if let Some(callback) = &self.eviction_callback {
                    callback(&victim.handle());
                }
            }
        }

        let handle = entry.handle();
        slot.insert(entry);
        Ok(handle)
    }

    /// Look up by handle, updating access bookkeeping. Expired entries are
    /// removed and reported as `CacheExpired`.
    pub fn get(&self, handle: &str) -> ProxyResult<CacheEntry> {
        let parsed = CacheHandle::parse(handle)?;
        let now = Instant::now();
        let mut agents = self.agents.lock();
        let slot = agents
            .get_mut(&parsed.agent_id)
            .ok_or_else(|| ProxyError::CacheMiss(handle.to_string()))?;

        let expired = slot
            .entries
            .get(&parsed.id)
            .is_some_and(|e| e.is_expired(self.limits.ttl, now));
        if expired {
            slot.remove(&parsed.id);
            return Err(ProxyError::CacheExpired(handle.to_string()));
        }

        let entry = slot
            .entries
            .get_mut(&parsed.id)
            .ok_or_else(|| ProxyError::CacheMiss(handle.to_string()))?;
        entry.touch(now);
        Ok(entry.clone())
    }

    /// Remove one entry. Returns whether it existed.
    pub fn remove(&self, handle: &str) -> bool {
        let Ok(parsed) = CacheHandle::parse(handle) else {
            return false;
        };
        let mut agents = self.agents.lock();
        agents
            .get_mut(&parsed.agent_id)
            .and_then(|slot| slot.remove(&parsed.id))
            .is_some()
    }

    pub fn clear_agent(&self, agent_id: &str) {
        self.agents.lock().remove(agent_id);
    }

    pub fn clear_all(&self) {
        self.agents.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        let agents = self.agents.lock();
        CacheStats {
            agent_count: agents.len(),
            entry_count: agents.values().map(|s| s.entries.len()).sum(),
            total_bytes: agents.values().map(|s| s.total_bytes).sum(),
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub agent_count: usize,
    pub entry_count: usize,
    pub total_bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_limits() -> CacheLimits {
        CacheLimits {
            max_entries_per_agent: 3,
            max_bytes_per_agent: 1000,
            max_agents: 2,
            ttl: Duration::from_secs(300),
        }
    }

    fn put(cache: &ResponseCache, agent: &str, content: &str) -> CacheHandle {
        cache
            .put(agent, content.to_string(), "fs_read_file", serde_json::json!({}))
            .expect("put")
    }

    #[test]
    fn test_put_get_roundtrip() {
        let cache = ResponseCache::new(small_limits());
        let handle = put(&cache, "agent_1", "hello world");

        let entry = cache.get(&handle.to_string()).expect("hit");
        assert_eq!(entry.content, "hello world");
        assert_eq!(entry.size_bytes, 11);
        assert_eq!(entry.access_count, 1);
        assert_eq!(entry.source_tool, "fs_read_file");

        let again = cache.get(&handle.to_string()).expect("hit");
        assert_eq!(again.access_count, 2);
    }

    #[test]
    fn test_miss_on_unknown_handle() {
        let cache = ResponseCache::new(small_limits());
        assert!(matches!(
            cache.get("agent_1:nope00000000"),
            Err(ProxyError::CacheMiss(_))
        ));
        assert!(matches!(
            cache.get("garbage"),
            Err(ProxyError::CacheMiss(_))
        ));
    }

    #[test]
    fn test_entry_cap_enforced() {
        let cache = ResponseCache::new(small_limits());
        let first = put(&cache, "agent_1", &"a".repeat(100));
        // Make the first entry hot so it survives eviction by weight.
        std::thread::sleep(Duration::from_millis(5));
        cache.get(&first.to_string()).unwrap();

        for _ in 0..5 {
            put(&cache, "agent_1", &"b".repeat(100));
        }

        let stats = cache.stats();
        assert!(stats.entry_count <= 3, "cap exceeded: {stats:?}");
        assert!(stats.total_bytes <= 1000);
    }

    #[test]
    fn test_byte_cap_evicts() {
        let cache = ResponseCache::new(small_limits());
        put(&cache, "agent_1", &"x".repeat(600));
        put(&cache, "agent_1", &"y".repeat(600));

        let stats = cache.stats();
        assert_eq!(stats.entry_count, 1);
        assert!(stats.total_bytes <= 1000);
    }

    #[test]
    fn test_oversized_entry_rejected() {
        let cache = ResponseCache::new(small_limits());
        let result = cache.put(
            "agent_1",
            "z".repeat(2000),
            "fs_read_file",
            serde_json::json!({}),
        );
        assert!(matches!(result, Err(ProxyError::CacheFull(_))));
    }

    #[test]
    fn test_agent_cap() {
        let cache = ResponseCache::new(small_limits());
        put(&cache, "agent_1", "a");
        put(&cache, "agent_2", "b");
        let result = cache.put("agent_3", "c".to_string(), "t", serde_json::json!({}));
        assert!(matches!(result, Err(ProxyError::TooManyAgents(_))));
        // Existing agents still accept entries.
        put(&cache, "agent_1", "d");
    }

    #[test]
    fn test_ttl_expiry() {
        let limits = CacheLimits {
            ttl: Duration::from_millis(10),
            ..small_limits()
        };
        let cache = ResponseCache::new(limits);
        let handle = put(&cache, "agent_1", "short-lived");

        std::thread::sleep(Duration::from_millis(25));
        assert!(matches!(
            cache.get(&handle.to_string()),
            Err(ProxyError::CacheExpired(_))
        ));
        // Expired entry was removed; the next lookup is a plain miss.
        assert!(matches!(
            cache.get(&handle.to_string()),
            Err(ProxyError::CacheMiss(_))
        ));
    }

    #[test]
    fn test_size_aware_victim_selection() {
        let cache = ResponseCache::new(CacheLimits {
            max_entries_per_agent: 2,
            max_bytes_per_agent: 10_000,
            max_agents: 1,
            ttl: Duration::from_secs(300),
        });

        // Large cold entry vs small entry with the same idle time: the
        // large one has the higher idle*size weight.
        let large = put(&cache, "agent_1", &"L".repeat(1000));
        let small = put(&cache, "agent_1", &"s".repeat(10));
        std::thread::sleep(Duration::from_millis(10));

        put(&cache, "agent_1", "new entry");

        assert!(cache.get(&large.to_string()).is_err());
        assert!(cache.get(&small.to_string()).is_ok());
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = ResponseCache::new(small_limits());
        let handle = put(&cache, "agent_1", "data");
        assert!(cache.remove(&handle.to_string()));
        assert!(!cache.remove(&handle.to_string()));

        put(&cache, "agent_1", "more");
        cache.clear_agent("agent_1");
        assert_eq!(cache.stats().entry_count, 0);

        put(&cache, "agent_1", "again");
        cache.clear_all();
        assert_eq!(cache.stats(), CacheStats {
            agent_count: 0,
            entry_count: 0,
            total_bytes: 0
        });
    }

    #[test]
    fn test_eviction_callback() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let mut cache = ResponseCache::new(CacheLimits {
            max_entries_per_agent: 1,
            max_bytes_per_agent: 1000,
            max_agents: 1,
            ttl: Duration::from_secs(300),
        });
        let evictions = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&evictions);
        cache.set_eviction_callback(move |_handle| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        put(&cache, "agent_1", "one");
        put(&cache, "agent_1", "two");
        assert_eq!(evictions.load(Ordering::Relaxed), 1);
    }
}
