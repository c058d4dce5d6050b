//! Last-known-value cache for task results.
//!
//! One entry per task: the value and the wall-clock time it was stored.
//! `put` replaces the whole entry atomically; `get` hands the value out only
//! while it is younger than the producing task's time-to-live, so dependents
//! observe a stale entry exactly as if it were absent.
//!
//! Entries are independent (last write wins, no versioning), so a single
//! map-level lock with values cloned out is enough; the lock is never held
//! across an await point and the critical sections are a few instructions.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    updated_at: DateTime<Utc>,
}

/// Concurrency-safe per-task result store.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, overwriting any prior entry. Value and timestamp are
    /// replaced together; readers never observe one without the other.
    pub fn put(&self, name: &str, value: Value, now: DateTime<Utc>) {
        let entry = CacheEntry {
            value,
            updated_at: now,
        };
        self.entries
            .write()
            .expect("cache lock poisoned")
            .insert(name.to_string(), entry);
    }

    /// The cached value, if it is still within `ttl` of its storage time.
    /// Stale or missing entries both come back as `None`.
    pub fn get(&self, name: &str, now: DateTime<Utc>, ttl: Duration) -> Option<Value> {
        let entries = self.entries.read().expect("cache lock poisoned");
        let entry = entries.get(name)?;
        let age = now.signed_duration_since(entry.updated_at);
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        if age < ttl {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    /// When the entry was last written, regardless of freshness.
    pub fn updated_at(&self, name: &str) -> Option<DateTime<Utc>> {
        self.entries
            .read()
            .expect("cache lock poisoned")
            .get(name)
            .map(|e| e.updated_at)
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
