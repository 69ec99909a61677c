//! Per-agent response cache.
//!
//! Full upstream responses land here when the interceptor truncates them;
//! the proxy tools read them back by handle.

mod entry;
mod store;

pub use entry::{generate_entry_id, CacheEntry, CacheHandle, ENTRY_ID_LEN};
pub use store::{CacheLimits, CacheStats, ResponseCache};
