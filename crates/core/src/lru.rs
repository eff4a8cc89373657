// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C1: bounded LRU registry. A size-capped map that evicts the
//! least-recently-*inserted* key on overflow — access does not refresh
//! position, matching spec.md §4.1 exactly ("insertion order; access does
//! not refresh"). Concurrency-safe: wraps a single `RwLock`-guarded inner
//! map, same idiom as `state.rs`'s `RwLock<HashMap<...>>` fields.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use tokio::sync::RwLock;

struct Inner<K, V> {
    map: HashMap<K, V>,
    order: VecDeque<K>,
    hits: u64,
    misses: u64,
}

/// A concurrency-safe map capped at `capacity` entries, evicting the oldest
/// insertion when a new key would overflow it.
pub struct BoundedLru<K, V> {
    capacity: usize,
    inner: RwLock<Inner<K, V>>,
}

/// Observability snapshot (spec.md §4.1 "Reports hit and miss counts").
#[derive(Debug, Clone, Copy, Default)]
pub struct LruStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
    pub capacity: usize,
}

impl<K, V> BoundedLru<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
                hits: 0,
                misses: 0,
            }),
        }
    }

    /// Insert or overwrite `key`. Overwriting an existing key does not move
    /// it in insertion order. Returns the evicted `(key, value)` pair if
    /// inserting a genuinely new key pushed the map over capacity.
    pub async fn insert(&self, key: K, value: V) -> Option<(K, V)> {
        let mut guard = self.inner.write().await;
        let is_new = !guard.map.contains_key(&key);
        guard.map.insert(key.clone(), value);

        if !is_new {
            return None;
        }
        guard.order.push_back(key);

        if guard.map.len() > self.capacity {
            if let Some(oldest) = guard.order.pop_front() {
                let evicted = guard.map.remove(&oldest).map(|v| (oldest, v));
                return evicted;
            }
        }
        None
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.write().await;
        let found = guard.map.get(key).cloned();
        if found.is_some() {
            guard.hits += 1;
        } else {
            guard.misses += 1;
        }
        found
    }

    pub async fn remove(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.write().await;
        let removed = guard.map.remove(key);
        if removed.is_some() {
            guard.order.retain(|k| k != key);
        }
        removed
    }

    pub async fn contains(&self, key: &K) -> bool {
        self.inner.read().await.map.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> LruStats {
        let guard = self.inner.read().await;
        LruStats { hits: guard.hits, misses: guard.misses, len: guard.map.len(), capacity: self.capacity }
    }

    pub async fn clear(&self) {
        let mut guard = self.inner.write().await;
        guard.map.clear();
        guard.order.clear();
    }

    /// Snapshot of all current entries, for janitor sweeps that need to
    /// inspect values (e.g. staleness) before removing keys.
    pub async fn entries(&self) -> Vec<(K, V)> {
        let guard = self.inner.read().await;
        guard.map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}
