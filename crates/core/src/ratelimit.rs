// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C2: per-user sliding-window rate limiter (spec.md §4.2). The cache is the
//! primary counter store (atomic increment, 60s TTL); on cache failure the
//! limiter falls back to a local `BoundedLru` so a degraded cache never
//! opens the gate wide.

use std::sync::Arc;

use crate::error::{ChatError, ChatResult};
use crate::lru::BoundedLru;
use crate::ports::{Cache, Clock};

/// `(user_id, window_index)` — the rate bucket key (spec.md §3).
type BucketKey = (String, i64);

pub struct RateLimiter {
    cache: Arc<dyn Cache>,
    clock: Arc<dyn Clock>,
    local_fallback: BoundedLru<BucketKey, u64>,
    window_ms: u64,
    max_per_window: u32,
}

impl RateLimiter {
    pub fn new(
        cache: Arc<dyn Cache>,
        clock: Arc<dyn Clock>,
        window_ms: u64,
        max_per_window: u32,
        local_capacity: usize,
    ) -> Self {
        Self { cache, clock, local_fallback: BoundedLru::new(local_capacity), window_ms, max_per_window }
    }

    fn window_index(&self, now_ms: i64) -> i64 {
        now_ms / self.window_ms as i64
    }

    fn cache_key(user_id: &str, window: i64) -> String {
        format!("{user_id}:{window}")
    }

    /// `Check(userId) -> ok | LimitExceeded`.
    pub async fn check(&self, user_id: &str) -> ChatResult<()> {
        let now = self.clock.now_ms();
        let window = self.window_index(now);
        let ttl = std::time::Duration::from_millis(self.window_ms);

        let count = match self.cache.incr(&Self::cache_key(user_id, window), ttl).await {
            Some(count) => count,
            None => {
                // Cache failure: fall back to the in-process bounded LRU.
                let key = (user_id.to_owned(), window);
                let current = self.local_fallback.get(&key).await.unwrap_or(0);
                let next = current + 1;
                self.local_fallback.insert(key, next).await;
                next
            }
        };

        if count > self.max_per_window as u64 {
            Err(ChatError::RateLimited)
        } else {
            Ok(())
        }
    }

    /// Drop local-fallback buckets older than `max_age_ms` (C10 janitor sweep).
    pub async fn evict_stale_local(&self, max_age_ms: i64) {
        let now_window = self.window_index(self.clock.now_ms());
        let max_age_windows = (max_age_ms / self.window_ms as i64).max(1);
        for (key, _) in self.local_fallback.entries().await {
            if now_window - key.1 > max_age_windows {
                self.local_fallback.remove(&key).await;
            }
        }
    }

    pub async fn clear_local(&self) {
        self.local_fallback.clear().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeCache, FixedClock};

    #[tokio::test]
    async fn allows_up_to_max_then_rejects() {
        let cache = Arc::new(FakeCache::new());
        let clock = Arc::new(FixedClock::new(0));
        let limiter = RateLimiter::new(cache, clock, 60_000, 3, 100);

        for _ in 0..3 {
            assert!(limiter.check("u1").await.is_ok());
        }
        assert_eq!(limiter.check("u1").await, Err(ChatError::RateLimited));
    }

    #[tokio::test]
    async fn resets_in_next_window() {
        let cache = Arc::new(FakeCache::new());
        let clock = Arc::new(FixedClock::new(0));
        let limiter = RateLimiter::new(Arc::clone(&cache) as _, Arc::clone(&clock) as _, 60_000, 2, 100);

        assert!(limiter.check("u1").await.is_ok());
        assert!(limiter.check("u1").await.is_ok());
        assert_eq!(limiter.check("u1").await, Err(ChatError::RateLimited));

        clock.set(60_000);
        assert!(limiter.check("u1").await.is_ok());
    }

    #[tokio::test]
    async fn falls_back_to_local_lru_when_cache_fails() {
        let cache = Arc::new(FakeCache::failing());
        let clock = Arc::new(FixedClock::new(0));
        let limiter = RateLimiter::new(cache, clock, 60_000, 2, 100);

        assert!(limiter.check("u1").await.is_ok());
        assert!(limiter.check("u1").await.is_ok());
        assert_eq!(limiter.check("u1").await, Err(ChatError::RateLimited));
    }

    #[tokio::test]
    async fn per_user_isolation() {
        let cache = Arc::new(FakeCache::new());
        let clock = Arc::new(FixedClock::new(0));
        let limiter = RateLimiter::new(cache, clock, 60_000, 1, 100);

        assert!(limiter.check("u1").await.is_ok());
        assert!(limiter.check("u2").await.is_ok());
        assert_eq!(limiter.check("u1").await, Err(ChatError::RateLimited));
    }
}
