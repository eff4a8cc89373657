// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! External collaborators, modeled as traits (ports). The HTTP routing,
//! durable store, cache, pub/sub fabric, and AI generator all live outside
//! this crate (spec.md §1 "Out of scope") — callers supply real adapters;
//! `fakes` ships in-memory stand-ins for tests and local runs.

use async_trait::async_trait;

use crate::error::ChatResult;
use crate::model::{Message, MessageId, Room, RoomId, Session, SessionId, User, UserId};

/// Validates bearer tokens and session identifiers. Owned by the auth
/// service; the core only consumes it (spec.md §4.3).
#[async_trait]
pub trait AuthVerifier: Send + Sync {
    /// Verify a token's signature and extract the user id it authorizes.
    async fn verify_token(&self, token: &str) -> ChatResult<UserId>;

    /// Validate that `session_id` is a live session belonging to `user_id`.
    async fn validate_session(&self, user_id: &str, session_id: &str) -> ChatResult<Session>;
}

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn find_by_id(&self, id: &str) -> ChatResult<User>;
}

#[async_trait]
pub trait RoomRepo: Send + Sync {
    async fn find_by_id(&self, id: &str) -> ChatResult<Room>;

    /// Add a participant, returning the populated participant set.
    async fn add_participant(&self, room_id: &str, user_id: &str) -> ChatResult<Vec<UserId>>;

    async fn remove_participant(&self, room_id: &str, user_id: &str) -> ChatResult<Vec<UserId>>;

    async fn is_participant(&self, room_id: &str, user_id: &str) -> ChatResult<bool>;
}

/// File metadata lookup for file-kind messages. Upload itself is out of
/// scope (HTTP routing concern).
#[async_trait]
pub trait FileRepo: Send + Sync {
    async fn find_by_id(&self, id: &str) -> ChatResult<crate::model::FileRef>;
}

/// Criteria for a paginated history query (spec.md §4.6 step 3).
#[derive(Debug, Clone)]
pub struct HistoryQuery {
    pub room_id: RoomId,
    pub before: Option<i64>,
    pub limit: usize,
}

#[async_trait]
pub trait MessageRepo: Send + Sync {
    async fn create(&self, msg: Message) -> ChatResult<Message>;

    async fn find_by_id(&self, id: &str) -> ChatResult<Message>;

    /// Find non-deleted messages in `query.room_id`, optionally before
    /// `query.before`, newest-first, capped at `query.limit`.
    async fn find_page(&self, query: HistoryQuery) -> ChatResult<Vec<Message>>;

    /// Add `{user_id, read_at}` to `readers` iff not already present.
    async fn mark_read(&self, message_id: &str, user_id: &str, read_at: i64) -> ChatResult<()>;

    /// Add or remove `user_id` from `reactions[emoji]`.
    async fn set_reaction(
        &self,
        message_id: &str,
        emoji: &str,
        user_id: &str,
        add: bool,
    ) -> ChatResult<Message>;
}

/// A single chunk of an AI response, or the terminal outcome.
#[derive(Debug, Clone)]
pub enum AiEvent {
    Chunk(String),
    Done,
    Error(String),
}

/// Streams a model response for `query`. Consumed as a lazy sequence
/// terminated by `AiEvent::Done`/`AiEvent::Error` (spec.md §9 "AI streaming
/// as push-style callbacks").
#[async_trait]
pub trait AiGenerator: Send + Sync {
    async fn stream(
        &self,
        query: &str,
        model: &str,
    ) -> ChatResult<tokio::sync::mpsc::Receiver<AiEvent>>;
}

/// Best-effort cache. Failures never fail the surrounding request — callers
/// treat `Err`/`None` as a miss (spec.md §5 "Shared-resource policy").
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    async fn set(&self, key: &str, value: String, ttl: std::time::Duration);

    async fn delete(&self, key: &str);

    /// Atomic increment-and-get, creating the counter at 1 with `ttl` if
    /// absent. Used by the rate limiter (spec.md §4.2).
    async fn incr(&self, key: &str, ttl: std::time::Duration) -> Option<u64>;
}

/// Cross-instance event bus. Publish failures are logged, never surfaced
/// (spec.md §5).
#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, topic: &str, payload: String);

    /// Subscribe to a topic; events arrive on the returned receiver until
    /// dropped.
    async fn subscribe(&self, topic: &str) -> tokio::sync::mpsc::Receiver<String>;
}

/// Wall-clock abstraction so rate windows and TTLs are deterministic in
/// tests.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
    }
}

/// Observability hook for counters the janitor and hot paths report.
/// Logging itself always goes through `tracing`; this is for numeric
/// metrics export (spec.md §1 "Metrics").
pub trait Metrics: Send + Sync {
    fn incr_counter(&self, name: &str, value: u64);
    fn set_gauge(&self, name: &str, value: f64);
}

/// No-op metrics sink, used when the embedder doesn't wire a real exporter.
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn incr_counter(&self, _name: &str, _value: u64) {}
    fn set_gauge(&self, _name: &str, _value: f64) {}
}

/// Identifier for a live connection handle, opaque to the core.
pub type ConnId = SessionId;
