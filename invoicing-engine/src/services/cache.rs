//! Projection cache injected into the orchestrator.
//!
//! Invalidation after writes is an explicit call on this interface so it stays
//! visible and testable instead of hiding behind a global.

use dashmap::DashMap;
use std::time::{Duration, Instant};

pub trait ProjectionCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String, ttl: Duration);
    fn invalidate(&self, key: &str);
    fn invalidate_prefix(&self, prefix: &str);
}

/// In-process cache with per-entry TTL.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, (String, Instant)>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProjectionCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                let (value, expires_at) = entry.value();
                if Instant::now() < *expires_at {
                    return Some(value.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    fn set(&self, key: &str, value: String, ttl: Duration) {
        self.entries
            .insert(key.to_string(), (value, Instant::now() + ttl));
    }

    fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    fn invalidate_prefix(&self, prefix: &str) {
        self.entries.retain(|key, _| !key.starts_with(prefix));
    }
}
