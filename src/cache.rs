//! Caller-owned caches with time-based expiry.
//!
//! Caches are plain values owned by the caller (wrap them in a `Mutex` to share); the evaluation
//! core never reads from or writes to them. Time comes from an injected [`Clock`].
use std::{
    borrow::Borrow,
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Utc};

use crate::{decision::DecisionResult, decision_client::EdgeDecideResponse};

/// Source of the current time.
pub trait Clock {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create a clock stopped at `now`.
    pub fn new(now: DateTime<Utc>) -> ManualClock {
        ManualClock {
            now: Arc::new(Mutex::new(now)),
        }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now = now.checked_add_signed(by).unwrap_or(DateTime::<Utc>::MAX_UTC);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct Entry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// Map whose entries expire `ttl` after insertion.
pub struct TtlCache<K, V, C = SystemClock> {
    entries: HashMap<K, Entry<V>>,
    ttl: chrono::Duration,
    clock: C,
}

/// Decisions by decision id, kept for later attribution lookups.
pub type DecisionCache<C = SystemClock> = TtlCache<String, DecisionResult, C>;

/// Edge responses by `(policy id, entity id)`.
pub type EdgeResultCache<C = SystemClock> = TtlCache<(String, String), EdgeDecideResponse, C>;

impl<K: Eq + Hash, V> TtlCache<K, V> {
    /// Create a cache on the system clock.
    pub fn new(ttl: Duration) -> TtlCache<K, V> {
        TtlCache::with_clock(ttl, SystemClock)
    }
}

impl<K: Eq + Hash, V, C: Clock> TtlCache<K, V, C> {
    /// Create a cache on a custom clock.
    pub fn with_clock(ttl: Duration, clock: C) -> TtlCache<K, V, C> {
        TtlCache {
            entries: HashMap::new(),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
            clock,
        }
    }

    /// Insert `value`, replacing any previous entry and restarting its TTL.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.entries
            .insert(key, Entry { value, expires_at })
            .map(|entry| entry.value)
    }

    /// Get a live entry. An expired entry is evicted and `None` returned.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now();
        if self.entries.get(key)?.expires_at <= now {
            self.entries.remove(key);
            return None;
        }
        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Remove an entry, live or expired.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key).map(|entry| entry.value)
    }

    /// Drop all expired entries, returning how many were removed.
    pub fn prune_expired(&mut self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }

    /// Number of stored entries, including expired ones not yet pruned.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<C: Clock> DecisionCache<C> {
    /// Cache `decision` under its id.
    pub fn insert_decision(&mut self, decision: DecisionResult) {
        self.insert(decision.decision_id.clone(), decision);
    }
}
