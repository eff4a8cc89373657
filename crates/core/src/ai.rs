// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C9: AI streaming coordinator. Each `@<model>` mention spawns a streaming
//! session that emits `aiMessageStart` / `aiMessageChunk` / `aiMessageComplete`
//! (or `aiMessageError`) over the room's bus, then persists the assembled
//! reply as an `ai`-kind message. Idle sessions are reaped silently by the
//! janitor (spec.md §4.9).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::ChatResult;
use crate::lru::BoundedLru;
use crate::model::{Message, MessageKind, MessageView, RoomId, UserId};
use crate::ports::{AiEvent, AiGenerator, Clock, MessageRepo, PubSub};
use crate::wire::OutboundEvent;

#[derive(Debug, Clone)]
pub struct StreamingSession {
    pub id: String,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub model: String,
    pub started_at: i64,
    pub last_chunk_at: i64,
}

pub struct AiCoordinator {
    repo: Arc<dyn MessageRepo>,
    pubsub: Arc<dyn PubSub>,
    generator: Arc<dyn AiGenerator>,
    clock: Arc<dyn Clock>,
    sessions: BoundedLru<String, StreamingSession>,
    last_activity: RwLock<HashMap<String, i64>>,
    instance_id: String,
}

impl AiCoordinator {
    pub fn new(
        repo: Arc<dyn MessageRepo>,
        pubsub: Arc<dyn PubSub>,
        generator: Arc<dyn AiGenerator>,
        clock: Arc<dyn Clock>,
        max_streams: usize,
        instance_id: String,
    ) -> Self {
        Self {
            repo,
            pubsub,
            generator,
            clock,
            sessions: BoundedLru::new(max_streams),
            last_activity: RwLock::new(HashMap::new()),
            instance_id,
        }
    }

    fn topic(room_id: &str) -> String {
        crate::messages::MessageIngest::room_topic(room_id)
    }

    /// Begin a streaming session for one `@<model>` mention. Runs to
    /// completion on a spawned task; the returned id lets the caller
    /// correlate `aiMessageStart`/`aiMessageChunk`/`aiMessageComplete` events.
    pub async fn start(self: &Arc<Self>, room_id: &str, user_id: &str, model: &str, query: &str) -> ChatResult<String> {
        let session_id = Uuid::new_v4().to_string();
        let now = self.clock.now_ms();
        let session = StreamingSession {
            id: session_id.clone(),
            room_id: room_id.to_owned(),
            user_id: user_id.to_owned(),
            model: model.to_owned(),
            started_at: now,
            last_chunk_at: now,
        };
        self.sessions.insert(session_id.clone(), session).await;
        self.last_activity.write().await.insert(session_id.clone(), now);

        self.publish(
            room_id,
            OutboundEvent::AiMessageStart { sid: session_id.clone(), model: model.to_owned(), timestamp: now },
        )
        .await;

        let this = Arc::clone(self);
        let room_id = room_id.to_owned();
        let model = model.to_owned();
        let query = query.to_owned();
        let session_id_task = session_id.clone();
        tokio::spawn(async move {
            this.run_stream(session_id_task, room_id, model, query).await;
        });

        Ok(session_id)
    }

    async fn run_stream(&self, session_id: String, room_id: String, model: String, query: String) {
        let mut rx = match self.generator.stream(&query, &model).await {
            Ok(rx) => rx,
            Err(_) => {
                self.publish(&room_id, OutboundEvent::AiMessageError { sid: session_id.clone() }).await;
                self.sessions.remove(&session_id).await;
                self.last_activity.write().await.remove(&session_id);
                return;
            }
        };

        let mut assembled = String::new();
        loop {
            match rx.recv().await {
                Some(AiEvent::Chunk(chunk)) => {
                    assembled.push_str(&chunk);
                    self.touch(&session_id).await;
                    self.publish(
                        &room_id,
                        OutboundEvent::AiMessageChunk {
                            sid: session_id.clone(),
                            chunk,
                            full_content: assembled.clone(),
                        },
                    )
                    .await;
                }
                Some(AiEvent::Done) => {
                    let msg = Message {
                        id: Uuid::new_v4().to_string(),
                        room_id: room_id.clone(),
                        sender_id: None,
                        content: assembled.clone(),
                        kind: MessageKind::Ai,
                        file: None,
                        ai_type: Some(model.clone()),
                        timestamp: self.clock.now_ms(),
                        readers: Vec::new(),
                        reactions: HashMap::new(),
                        deleted: false,
                    };
                    if let Ok(persisted) = self.repo.create(msg).await {
                        let view = MessageView::from_message(&persisted, None);
                        self.publish(&room_id, OutboundEvent::AiMessageComplete { sid: session_id.clone(), message: view })
                            .await;
                    } else {
                        self.publish(&room_id, OutboundEvent::AiMessageError { sid: session_id.clone() }).await;
                    }
                    break;
                }
                Some(AiEvent::Error(_)) | None => {
                    self.publish(&room_id, OutboundEvent::AiMessageError { sid: session_id.clone() }).await;
                    break;
                }
            }
        }
        self.sessions.remove(&session_id).await;
        self.last_activity.write().await.remove(&session_id);
    }

    async fn touch(&self, session_id: &str) {
        self.last_activity.write().await.insert(session_id.to_owned(), self.clock.now_ms());
    }

    async fn publish(&self, room_id: &str, event: OutboundEvent) {
        let envelope = event.to_envelope(&self.instance_id);
        if let Ok(encoded) = serde_json::to_string(&envelope) {
            self.pubsub.publish(&Self::topic(room_id), encoded).await;
        }
    }

    /// Janitor-only reap of sessions that have gone quiet past `max_idle`.
    /// Silent: no `aiMessageError` is emitted, matching a normal-looking
    /// close (spec.md §4.9 step 6).
    pub async fn reap_idle(&self, max_idle: Duration) -> Vec<String> {
        let now = self.clock.now_ms();
        let max_idle_ms = max_idle.as_millis() as i64;
        let stale: Vec<String> = self
            .last_activity
            .read()
            .await
            .iter()
            .filter(|(_, last)| now - **last > max_idle_ms)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            self.sessions.remove(id).await;
            self.last_activity.write().await.remove(id);
        }
        stale
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.len().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeAiGenerator, FakeMessageRepo, FakePubSub, FixedClock};

    #[tokio::test]
    async fn successful_stream_persists_ai_message_and_emits_events() {
        let repo = Arc::new(FakeMessageRepo::new());
        let pubsub = Arc::new(FakePubSub::new());
        let generator = Arc::new(FakeAiGenerator::new());
        let clock = Arc::new(FixedClock::new(0));
        let coordinator =
            Arc::new(AiCoordinator::new(repo.clone(), pubsub.clone(), generator, clock, 100, "instance-a".to_owned()));

        let mut rx = pubsub.subscribe(&crate::messages::MessageIngest::room_topic("room1")).await;
        coordinator.start("room1", "u1", "helper-bot", "what's up").await.expect("start");

        // aiMessageStart, aiMessageChunk x2, aiMessageComplete
        for _ in 0..4 {
            rx.recv().await.expect("event");
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(coordinator.active_count().await, 0);
    }

    #[tokio::test]
    async fn failing_generator_emits_ai_error_without_persisting() {
        let repo = Arc::new(FakeMessageRepo::new());
        let pubsub = Arc::new(FakePubSub::new());
        let generator = Arc::new(FakeAiGenerator::failing());
        let clock = Arc::new(FixedClock::new(0));
        let coordinator =
            Arc::new(AiCoordinator::new(repo.clone(), pubsub.clone(), generator, clock, 100, "instance-a".to_owned()));

        let mut rx = pubsub.subscribe(&crate::messages::MessageIngest::room_topic("room1")).await;
        coordinator.start("room1", "u1", "broken-bot", "hello").await.expect("start");

        let start_evt = rx.recv().await.expect("aiMessageStart");
        assert!(start_evt.contains("aiMessageStart"));
        let err_evt = rx.recv().await.expect("aiMessageError");
        assert!(err_evt.contains("aiMessageError"));
    }

    #[tokio::test]
    async fn reap_idle_removes_stale_sessions_silently() {
        let repo = Arc::new(FakeMessageRepo::new());
        let pubsub = Arc::new(FakePubSub::new());
        let generator = Arc::new(FakeAiGenerator::new());
        let clock = Arc::new(FixedClock::new(0));
        let coordinator = Arc::new(AiCoordinator::new(repo, pubsub, generator, clock.clone(), 100, "instance-a".to_owned()));

        coordinator.sessions.insert(
            "s1".to_owned(),
            StreamingSession {
                id: "s1".to_owned(),
                room_id: "room1".to_owned(),
                user_id: "u1".to_owned(),
                model: "helper-bot".to_owned(),
                started_at: 0,
                last_chunk_at: 0,
            },
        )
        .await;
        coordinator.last_activity.write().await.insert("s1".to_owned(), 0);

        clock.advance(40 * 60 * 1000);
        let reaped = coordinator.reap_idle(Duration::from_secs(30 * 60)).await;
        assert_eq!(reaped, vec!["s1".to_owned()]);
        assert_eq!(coordinator.active_count().await, 0);
    }
}
