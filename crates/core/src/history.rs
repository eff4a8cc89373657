// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C6: history loader. Cache-through pagination over `MessageRepo`, guarded
//! by a timeout with exponential-backoff retry, and de-duplicated so
//! concurrent requests for the same page share one underlying query
//! (spec.md §4.6).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::error::{ChatError, ChatResult};
use crate::lru::BoundedLru;
use crate::model::{Message, RoomId, UserId};
use crate::ports::{Cache, HistoryQuery, MessageRepo, RoomRepo};

const HISTORY_CACHE_TTL: Duration = Duration::from_secs(30);
const ACCESS_CACHE_TTL: Duration = Duration::from_secs(300);
const QUERY_TIMEOUT: Duration = Duration::from_secs(8);
const MAX_RETRIES: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(1_500);
const BACKOFF_FACTOR: f64 = 1.5;
const BACKOFF_CAP: Duration = Duration::from_secs(5);

fn cache_key(room_id: &str, before: Option<i64>) -> String {
    match before {
        Some(ts) => format!("history:{room_id}:{ts}"),
        None => format!("history:{room_id}:latest"),
    }
}

/// `AccessCacheKey` (spec.md §3): `room_access:<roomId>:<userId>`, 5 min TTL,
/// caches only positive participation results.
fn access_cache_key(room_id: &str, user_id: &str) -> String {
    format!("room_access:{room_id}:{user_id}")
}

/// Single-flight key for concurrent identical page requests.
type InflightKey = (RoomId, Option<i64>);

pub struct HistoryLoader {
    repo: Arc<dyn MessageRepo>,
    rooms: Arc<dyn RoomRepo>,
    cache: Arc<dyn Cache>,
    page_size: usize,
    inflight: BoundedLru<InflightKey, ()>,
    locks: Mutex<HashMap<InflightKey, Arc<Mutex<()>>>>,
}

impl HistoryLoader {
    pub fn new(
        repo: Arc<dyn MessageRepo>,
        rooms: Arc<dyn RoomRepo>,
        cache: Arc<dyn Cache>,
        page_size: usize,
        max_inflight: usize,
    ) -> Self {
        Self {
            repo,
            rooms,
            cache,
            page_size,
            inflight: BoundedLru::new(max_inflight),
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, key: &InflightKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// `VerifyAccess(roomId, userId)` (spec.md §4.6 step 1): cache-through
    /// room participation check. Only positive results are cached — a
    /// rejected user must re-check on every call rather than being locked out
    /// by a stale cache entry after later joining.
    async fn verify_access(&self, room_id: &str, user_id: &UserId) -> ChatResult<()> {
        let key = access_cache_key(room_id, user_id);
        if self.cache.get(&key).await.is_some() {
            return Ok(());
        }

        let is_member = self.rooms.is_participant(room_id, user_id).await.unwrap_or(false);
        if !is_member {
            return Err(ChatError::AccessDenied);
        }

        self.cache.set(&key, "1".to_owned(), ACCESS_CACHE_TTL).await;
        Ok(())
    }

    /// `LoadPage(roomId, userId, before?) -> Message[] | AccessDenied |
    /// LoadError`.
    pub async fn load_page(&self, room_id: &str, user_id: &UserId, before: Option<i64>) -> ChatResult<Vec<Message>> {
        self.verify_access(room_id, user_id).await?;

        let key = cache_key(room_id, before);
        if let Some(cached) = self.cache.get(&key).await {
            if let Ok(messages) = serde_json::from_str::<Vec<Message>>(&cached) {
                return Ok(messages);
            }
        }

        let inflight_key: InflightKey = (room_id.to_owned(), before);
        let flight_lock = self.lock_for(&inflight_key).await;
        let _guard = flight_lock.lock().await;

        // Re-check the cache: a concurrent caller may have just populated it
        // while we waited on the single-flight lock.
        if let Some(cached) = self.cache.get(&key).await {
            if let Ok(messages) = serde_json::from_str::<Vec<Message>>(&cached) {
                return Ok(messages);
            }
        }

        self.inflight.insert(inflight_key.clone(), ()).await;
        let result = self.fetch_with_retry(room_id, before).await;
        self.inflight.remove(&inflight_key).await;

        if let Ok(messages) = &result {
            if let Ok(encoded) = serde_json::to_string(messages) {
                self.cache.set(&key, encoded, HISTORY_CACHE_TTL).await;
            }
        }
        result
    }

    async fn fetch_with_retry(&self, room_id: &str, before: Option<i64>) -> ChatResult<Vec<Message>> {
        let query = HistoryQuery { room_id: room_id.to_owned(), before, limit: self.page_size };
        let mut attempt = 0u32;
        let mut backoff = BACKOFF_BASE;
        loop {
            let outcome = tokio::time::timeout(QUERY_TIMEOUT, self.repo.find_page(query.clone())).await;
            match outcome {
                Ok(Ok(messages)) => return Ok(messages),
                Ok(Err(err)) if attempt >= MAX_RETRIES => return Err(err),
                Err(_elapsed) if attempt >= MAX_RETRIES => return Err(ChatError::LoadError),
                _ => {
                    attempt += 1;
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.mul_f64(BACKOFF_FACTOR).min(BACKOFF_CAP);
                }
            }
        }
    }

    pub async fn invalidate(&self, room_id: &str) {
        // The exact set of cached pages for a room isn't tracked, so
        // invalidate only the "latest" page — the one new messages affect.
        self.cache.delete(&cache_key(room_id, None)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeCache, FakeMessageRepo, FakeRoomRepo};
    use crate::model::{MessageKind, Room};
    use indexmap::IndexSet;

    async fn member_rooms(room_id: &str, user_id: &str) -> Arc<FakeRoomRepo> {
        let rooms = Arc::new(FakeRoomRepo::new());
        let mut participants = IndexSet::new();
        participants.insert(user_id.to_owned());
        rooms
            .insert(Room {
                id: room_id.to_owned(),
                name: room_id.to_owned(),
                password_hash: None,
                creator_id: user_id.to_owned(),
                participants,
                created_at: 0,
            })
            .await;
        rooms
    }

    async fn seed(repo: &FakeMessageRepo, room_id: &str, n: usize) {
        for i in 0..n {
            repo.create(Message {
                id: format!("m{i}"),
                room_id: room_id.to_owned(),
                sender_id: Some("u1".to_owned()),
                content: format!("msg {i}"),
                kind: MessageKind::Text,
                file: None,
                ai_type: None,
                timestamp: i as i64,
                readers: Vec::new(),
                reactions: HashMap::new(),
                deleted: false,
            })
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn loads_page_and_caches_it() {
        let repo = Arc::new(FakeMessageRepo::new());
        seed(&repo, "room1", 5).await;
        let rooms = member_rooms("room1", "u1").await;
        let cache = Arc::new(FakeCache::new());
        let loader = HistoryLoader::new(Arc::clone(&repo) as _, Arc::clone(&rooms) as _, Arc::clone(&cache) as _, 20, 100);

        let page = loader.load_page("room1", &"u1".to_owned(), None).await.expect("load");
        assert_eq!(page.len(), 5);
        assert!(cache.get("history:room1:latest").await.is_some());
    }

    #[tokio::test]
    async fn load_page_denies_non_participants() {
        let repo = Arc::new(FakeMessageRepo::new());
        seed(&repo, "room1", 5).await;
        let rooms = member_rooms("room1", "u1").await;
        let cache = Arc::new(FakeCache::new());
        let loader = HistoryLoader::new(Arc::clone(&repo) as _, Arc::clone(&rooms) as _, Arc::clone(&cache) as _, 20, 100);

        let err = loader.load_page("room1", &"intruder".to_owned(), None).await.unwrap_err();
        assert!(matches!(err, ChatError::AccessDenied));
    }

    #[tokio::test]
    async fn exact_pagination_math_over_50_messages() {
        let repo = Arc::new(FakeMessageRepo::new());
        seed(&repo, "room1", 50).await;
        let rooms = member_rooms("room1", "u1").await;
        let cache = Arc::new(FakeCache::new());
        let loader = HistoryLoader::new(Arc::clone(&repo) as _, Arc::clone(&rooms) as _, Arc::clone(&cache) as _, 20, 100);
        let user_id = "u1".to_owned();

        let first = loader.load_page("room1", &user_id, None).await.expect("first page");
        assert_eq!(first.len(), 20);
        let oldest_in_first = first.last().unwrap().timestamp;

        let second = loader.load_page("room1", &user_id, Some(oldest_in_first)).await.expect("second page");
        assert_eq!(second.len(), 20);
        assert!(second.iter().all(|m| m.timestamp < oldest_in_first));

        let oldest_in_second = second.last().unwrap().timestamp;
        let third = loader.load_page("room1", &user_id, Some(oldest_in_second)).await.expect("third page");
        assert_eq!(third.len(), 10);
    }

    #[tokio::test]
    async fn invalidate_clears_latest_page_cache() {
        let repo = Arc::new(FakeMessageRepo::new());
        seed(&repo, "room1", 3).await;
        let rooms = member_rooms("room1", "u1").await;
        let cache = Arc::new(FakeCache::new());
        let loader = HistoryLoader::new(Arc::clone(&repo) as _, Arc::clone(&rooms) as _, Arc::clone(&cache) as _, 20, 100);

        loader.load_page("room1", &"u1".to_owned(), None).await.expect("load");
        assert!(cache.get("history:room1:latest").await.is_some());
        loader.invalidate("room1").await;
        assert!(cache.get("history:room1:latest").await.is_none());
    }
}
