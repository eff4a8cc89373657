// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory stand-ins for the external collaborators in `ports.rs`. These
//! back the crate's own unit/integration tests and let the server run
//! standalone without a real store, cache, or bus.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, RwLock};

use crate::error::{ChatError, ChatResult};
use crate::model::{FileRef, Message, Room, Session, User, UserId};
use crate::ports::{AiEvent, AiGenerator, AuthVerifier, Cache, Clock, FileRepo, HistoryQuery, MessageRepo, PubSub, RoomRepo, UserRepo};

/// Deterministic clock for tests — advances only when told to.
pub struct FixedClock {
    now_ms: AtomicI64,
}

impl FixedClock {
    pub fn new(now_ms: i64) -> Self {
        Self { now_ms: AtomicI64::new(now_ms) }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// In-memory `Cache`. `failing()` simulates a cache that is down: every
/// operation behaves as a miss/no-op, exercising callers' degrade paths.
pub struct FakeCache {
    store: RwLock<HashMap<String, CacheEntry>>,
    counters: RwLock<HashMap<String, (u64, Instant)>>,
    down: bool,
}

impl FakeCache {
    pub fn new() -> Self {
        Self { store: RwLock::new(HashMap::new()), counters: RwLock::new(HashMap::new()), down: false }
    }

    pub fn failing() -> Self {
        Self { store: RwLock::new(HashMap::new()), counters: RwLock::new(HashMap::new()), down: true }
    }
}

impl Default for FakeCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for FakeCache {
    async fn get(&self, key: &str) -> Option<String> {
        if self.down {
            return None;
        }
        let store = self.store.read().await;
        let entry = store.get(key)?;
        if entry.expires_at < Instant::now() {
            return None;
        }
        Some(entry.value.clone())
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        if self.down {
            return;
        }
        self.store.write().await.insert(key.to_owned(), CacheEntry { value, expires_at: Instant::now() + ttl });
    }

    async fn delete(&self, key: &str) {
        self.store.write().await.remove(key);
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Option<u64> {
        if self.down {
            return None;
        }
        let mut counters = self.counters.write().await;
        let now = Instant::now();
        let entry = counters.entry(key.to_owned()).or_insert((0, now + ttl));
        if entry.1 < now {
            *entry = (0, now + ttl);
        }
        entry.0 += 1;
        Some(entry.0)
    }
}

/// In-memory `PubSub`: a broadcast channel per topic, fanning out to every
/// subscriber — the single-process analogue of a real NATS bus.
#[derive(Default)]
pub struct FakePubSub {
    topics: RwLock<HashMap<String, broadcast::Sender<String>>>,
}

impl FakePubSub {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PubSub for FakePubSub {
    async fn publish(&self, topic: &str, payload: String) {
        let topics = self.topics.read().await;
        if let Some(tx) = topics.get(topic) {
            let _ = tx.send(payload);
        }
    }

    async fn subscribe(&self, topic: &str) -> mpsc::Receiver<String> {
        let mut broadcast_rx = {
            let mut topics = self.topics.write().await;
            let tx = topics.entry(topic.to_owned()).or_insert_with(|| broadcast::channel(256).0);
            tx.subscribe()
        };
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(async move {
            loop {
                match broadcast_rx.recv().await {
                    Ok(msg) => {
                        if tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        rx
    }
}

#[derive(Default)]
pub struct FakeAuthVerifier {
    /// token -> user_id
    tokens: RwLock<HashMap<String, String>>,
    /// (user_id, session_id) pairs considered valid.
    sessions: RwLock<HashMap<String, String>>,
}

impl FakeAuthVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, token: &str, user_id: &str, session_id: &str) {
        self.tokens.write().await.insert(token.to_owned(), user_id.to_owned());
        self.sessions.write().await.insert(session_id.to_owned(), user_id.to_owned());
    }
}

#[async_trait]
impl AuthVerifier for FakeAuthVerifier {
    async fn verify_token(&self, token: &str) -> ChatResult<UserId> {
        self.tokens.read().await.get(token).cloned().ok_or(ChatError::InvalidToken)
    }

    async fn validate_session(&self, user_id: &str, session_id: &str) -> ChatResult<Session> {
        let sessions = self.sessions.read().await;
        match sessions.get(session_id) {
            Some(owner) if owner == user_id => {
                Ok(Session { id: session_id.to_owned(), user_id: user_id.to_owned() })
            }
            Some(_) => Err(ChatError::InvalidSession),
            None => Err(ChatError::InvalidSession),
        }
    }
}

#[derive(Default)]
pub struct FakeUserRepo {
    users: RwLock<HashMap<String, User>>,
}

impl FakeUserRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user: User) {
        self.users.write().await.insert(user.id.clone(), user);
    }
}

#[async_trait]
impl UserRepo for FakeUserRepo {
    async fn find_by_id(&self, id: &str) -> ChatResult<User> {
        self.users.read().await.get(id).cloned().ok_or(ChatError::UserNotFound)
    }
}

#[derive(Default)]
pub struct FakeRoomRepo {
    rooms: RwLock<HashMap<String, Room>>,
}

impl FakeRoomRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, room: Room) {
        self.rooms.write().await.insert(room.id.clone(), room);
    }
}

#[async_trait]
impl RoomRepo for FakeRoomRepo {
    async fn find_by_id(&self, id: &str) -> ChatResult<Room> {
        self.rooms.read().await.get(id).cloned().ok_or(ChatError::NotFound)
    }

    async fn add_participant(&self, room_id: &str, user_id: &str) -> ChatResult<Vec<UserId>> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(room_id).ok_or(ChatError::NotFound)?;
        room.participants.insert(user_id.to_owned());
        Ok(room.participants.iter().cloned().collect())
    }

    async fn remove_participant(&self, room_id: &str, user_id: &str) -> ChatResult<Vec<UserId>> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(room_id).ok_or(ChatError::NotFound)?;
        room.participants.shift_remove(user_id);
        Ok(room.participants.iter().cloned().collect())
    }

    async fn is_participant(&self, room_id: &str, user_id: &str) -> ChatResult<bool> {
        let rooms = self.rooms.read().await;
        let room = rooms.get(room_id).ok_or(ChatError::NotFound)?;
        Ok(room.participants.contains(user_id))
    }
}

#[derive(Default)]
pub struct FakeFileRepo {
    files: RwLock<HashMap<String, FileRef>>,
}

impl FakeFileRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, file: FileRef) {
        self.files.write().await.insert(file.id.clone(), file);
    }
}

#[async_trait]
impl FileRepo for FakeFileRepo {
    async fn find_by_id(&self, id: &str) -> ChatResult<FileRef> {
        self.files.read().await.get(id).cloned().ok_or(ChatError::NotFound)
    }
}

#[derive(Default)]
pub struct FakeMessageRepo {
    messages: RwLock<Vec<Message>>,
}

impl FakeMessageRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageRepo for FakeMessageRepo {
    async fn create(&self, msg: Message) -> ChatResult<Message> {
        let mut messages = self.messages.write().await;
        messages.push(msg.clone());
        Ok(msg)
    }

    async fn find_by_id(&self, id: &str) -> ChatResult<Message> {
        self.messages.read().await.iter().find(|m| m.id == id).cloned().ok_or(ChatError::NotFound)
    }

    async fn find_page(&self, query: HistoryQuery) -> ChatResult<Vec<Message>> {
        let messages = self.messages.read().await;
        let mut matched: Vec<Message> = messages
            .iter()
            .filter(|m| m.room_id == query.room_id && !m.deleted)
            .filter(|m| query.before.map_or(true, |before| m.timestamp < before))
            .cloned()
            .collect();
        // Newest-first, as spec.md §4.6 step 3 requires of the raw query.
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matched.truncate(query.limit);
        Ok(matched)
    }

    async fn mark_read(&self, message_id: &str, user_id: &str, read_at: i64) -> ChatResult<()> {
        let mut messages = self.messages.write().await;
        let msg = messages.iter_mut().find(|m| m.id == message_id).ok_or(ChatError::NotFound)?;
        if !msg.has_reader(user_id) {
            msg.readers.push(crate::model::Reader { user_id: user_id.to_owned(), read_at });
        }
        Ok(())
    }

    async fn set_reaction(
        &self,
        message_id: &str,
        emoji: &str,
        user_id: &str,
        add: bool,
    ) -> ChatResult<Message> {
        let mut messages = self.messages.write().await;
        let msg = messages.iter_mut().find(|m| m.id == message_id).ok_or(ChatError::NotFound)?;
        let set = msg.reactions.entry(emoji.to_owned()).or_default();
        if add {
            set.insert(user_id.to_owned());
        } else {
            set.remove(user_id);
        }
        Ok(msg.clone())
    }
}

/// Emits two canned chunks then completes — enough to exercise C9's
/// streaming lifecycle without a real model backend.
#[derive(Default)]
pub struct FakeAiGenerator {
    pub fail: bool,
}

impl FakeAiGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { fail: true }
    }
}

#[async_trait]
impl AiGenerator for FakeAiGenerator {
    async fn stream(&self, query: &str, _model: &str) -> ChatResult<mpsc::Receiver<AiEvent>> {
        let (tx, rx) = mpsc::channel(16);
        let fail = self.fail;
        let query = query.to_owned();
        tokio::spawn(async move {
            if fail {
                let _ = tx.send(AiEvent::Error("generator unavailable".to_owned())).await;
                return;
            }
            let _ = tx.send(AiEvent::Chunk(format!("Thinking about: {query}"))).await;
            let _ = tx.send(AiEvent::Chunk(" ...done.".to_owned())).await;
            let _ = tx.send(AiEvent::Done).await;
        });
        Ok(rx)
    }
}

pub struct StaticMetrics;
impl crate::ports::Metrics for StaticMetrics {
    fn incr_counter(&self, _name: &str, _value: u64) {}
    fn set_gauge(&self, _name: &str, _value: f64) {}
}
