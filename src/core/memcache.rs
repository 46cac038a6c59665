//! Purpose: Per-client record of when each uri was last fetched.
//! Exports: `MemoryCache`, `DEFAULT_MEMORY_TTL_SECS`.
//! Role: Lets the executor skip round-trips for uris fetched moments ago.
//! Invariants: Never shared across clients; invalidation is wholesale.
use std::collections::HashMap;

pub const DEFAULT_MEMORY_TTL_SECS: f64 = 1.0;

#[derive(Clone, Debug)]
pub struct MemoryCache {
    ttl: f64,
    fetched: HashMap<String, f64>,
}

impl MemoryCache {
    pub fn new(ttl: f64) -> Self {
        Self {
            ttl,
            fetched: HashMap::new(),
        }
    }

    pub fn ttl(&self) -> f64 {
        self.ttl
    }

    pub fn set_ttl(&mut self, ttl: f64) {
        self.ttl = ttl;
    }

    /// True when `uri` was fetched less than one TTL before `now`.
    pub fn is_fresh(&self, uri: &str, now: f64) -> bool {
        self.fetched
            .get(uri)
            .is_some_and(|fetched_at| now - fetched_at < self.ttl)
    }

    pub fn touch(&mut self, uri: &str, now: f64) {
        self.fetched.insert(uri.to_string(), now);
    }

    pub fn clear(&mut self) {
        self.fetched.clear();
    }

    pub fn len(&self) -> usize {
        self.fetched.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fetched.is_empty()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_TTL_SECS)
    }
}
