//! Response Cache Module
//!
//! In-memory record of recent upstream outcomes keyed by request path.
//! Negative entries stop the proxy from hammering an upstream for paths it
//! already knows to be missing or failing; positive entries answer HEAD
//! requests without a round trip.

use crate::proxy_status::is_success_status;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Lifetime of entries for definite answers (2xx and 404)
pub const DEFINITE_TTL: Duration = Duration::from_secs(5 * 60);
/// Lifetime of entries for every other status
pub const TRANSIENT_TTL: Duration = Duration::from_secs(60);

/// Time source for entry expiry
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Recorded outcome for one request path. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub status: u16,
    pub last_modified: Option<SystemTime>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub content_length: Option<u64>,
    pub cache_until: SystemTime,
}

impl CacheEntry {
    pub fn is_success(&self) -> bool {
        is_success_status(self.status)
    }
}

/// Expiring path -> outcome map
pub struct ResponseCache {
    entries: DashMap<String, Arc<CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Entry for `key`, or `None` when absent or expired. Expired entries are dropped.
    pub fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let now = self.clock.now();
        let entry = self.entries.get(key).map(|e| Arc::clone(e.value()))?;
        if now > entry.cache_until {
            self.entries.remove_if(key, |_, e| now > e.cache_until);
            return None;
        }
        Some(entry)
    }

    /// Replace the entry for `key`. The lifetime is chosen from `status` and
    /// counted from now; later reads never extend it.
    pub fn put(
        &self,
        key: &str,
        status: u16,
        last_modified: Option<SystemTime>,
        content_type: Option<String>,
        content_encoding: Option<String>,
        content_length: Option<u64>,
    ) -> Arc<CacheEntry> {
        let entry = Arc::new(CacheEntry {
            status,
            last_modified,
            content_type,
            content_encoding,
            content_length,
            cache_until: self.clock.now() + ttl_for_status(status),
        });
        self.entries.insert(key.to_string(), Arc::clone(&entry));
        entry
    }

    /// Shorthand for a failure record without headers
    pub fn put_status(&self, key: &str, status: u16) -> Arc<CacheEntry> {
        self.put(key, status, None, None, None, None)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

pub fn ttl_for_status(status: u16) -> Duration {
    if is_success_status(status) || status == 404 {
        DEFINITE_TTL
    } else {
        TRANSIENT_TTL
    }
}
