//! Concurrent caches owned by the runtime.
//!
//! Every cache is a [`ConcurrentMap`], a `DashMap` with the Fx hasher, so a
//! writer only ever blocks readers of the same shard. None of the caches
//! evict on their own; entries live as long as the runtime unless a caller
//! removes them.
//!
//! | Cache | Key | Value |
//! |-------|-----|-------|
//! | objects | `String` | any template [`Value`] |
//! | tokens | `Arc<str>` span, looked up by `&str` | parsed [`AssignExpression`] |
//! | expiring | `String` | [`ExpiringEntry`] |
//! | assignments | `(type, expression)` | [`CompiledAssign`] |

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use minijinja::Value;
use rustc_hash::FxBuildHasher;

use crate::assign::{AssignExpression, CompiledAssign};

/// Concurrent map used by every cache, the page registry and path mappings.
pub type ConcurrentMap<K, V> = DashMap<K, V, FxBuildHasher>;

/// A value with an expiry time.
///
/// Expiry is checked by the reader; nothing sweeps stale entries in the
/// background.
#[derive(Debug, Clone)]
pub struct ExpiringEntry {
    /// When the value stops being fresh.
    pub expires_at: DateTime<Utc>,
    /// The cached value.
    pub value: Value,
}

impl ExpiringEntry {
    /// Creates an entry that expires after `ttl`.
    pub fn new(value: Value, ttl: Duration) -> Self {
        Self {
            expires_at: Utc::now() + ttl,
            value,
        }
    }

    /// Returns true if the entry is stale at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Key of the compiled-assignment cache: target type name and expression text.
pub type AssignKey = (String, String);

/// The caches shared by every request served from one runtime.
#[derive(Default)]
pub struct ScriptCaches {
    objects: ConcurrentMap<String, Value>,
    tokens: ConcurrentMap<Arc<str>, Arc<AssignExpression>>,
    expiring: ConcurrentMap<String, ExpiringEntry>,
    assignments: ConcurrentMap<AssignKey, Arc<CompiledAssign>>,
}

impl ScriptCaches {
    /// Creates empty caches.
    pub fn new() -> Self {
        Self::default()
    }

    /// General-purpose memoization cache for methods and filters.
    pub fn objects(&self) -> &ConcurrentMap<String, Value> {
        &self.objects
    }

    /// Parsed expressions keyed by their source text.
    pub fn tokens(&self) -> &ConcurrentMap<Arc<str>, Arc<AssignExpression>> {
        &self.tokens
    }

    /// Values that go stale after a deadline.
    pub fn expiring(&self) -> &ConcurrentMap<String, ExpiringEntry> {
        &self.expiring
    }

    /// Compiled assignment setters.
    pub fn assignments(&self) -> &ConcurrentMap<AssignKey, Arc<CompiledAssign>> {
        &self.assignments
    }

    /// Stores a value that expires after `ttl`.
    pub fn set_expiring(&self, key: impl Into<String>, value: Value, ttl: Duration) {
        self.expiring.insert(key.into(), ExpiringEntry::new(value, ttl));
    }

    /// Returns a memoized object by key.
    pub fn object(&self, key: &str) -> Option<Value> {
        self.objects.get(key).map(|entry| entry.value().clone())
    }

    /// Returns the value for `key` if it has not expired. Stale entries are
    /// left in place.
    pub fn get_fresh(&self, key: &str) -> Option<Value> {
        let entry = self.expiring.get(key)?;
        if entry.is_expired_at(Utc::now()) {
            None
        } else {
            Some(entry.value.clone())
        }
    }

    /// Drops expired entries from the expiring cache. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.expiring.len();
        self.expiring.retain(|_, entry| !entry.is_expired_at(now));
        before.saturating_sub(self.expiring.len())
    }

    /// Empties every cache.
    pub fn clear(&self) {
        self.objects.clear();
        self.tokens.clear();
        self.expiring.clear();
        self.assignments.clear();
    }
}

impl fmt::Debug for ScriptCaches {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptCaches")
            .field("objects", &self.objects.len())
            .field("tokens", &self.tokens.len())
            .field("expiring", &self.expiring.len())
            .field("assignments", &self.assignments.len())
            .finish()
    }
}
