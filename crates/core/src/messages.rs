// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C7: message ingestion and fan-out — the hot path. Validates, rate-limits,
//! persists, and delivers a message both to local subscribers and to other
//! instances over the bus, then spawns any AI jobs the message's
//! `@<model>` mentions trigger (spec.md §4.7).

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};
use crate::history::HistoryLoader;
use crate::model::{Message, MessageKind, RoomId, SenderView};
use crate::ports::{Clock, MessageRepo, PubSub};
use crate::ratelimit::RateLimiter;
use crate::wire::OutboundEvent;

const MAX_CONTENT_LEN: usize = 4000;

/// Outcome of ingesting one inbound message: the persisted record, the
/// content with `@<model>` mentions stripped (spec.md §4.7 step 7), and the
/// model tags it should spawn AI jobs for.
pub struct IngestOutcome {
    pub message: Message,
    pub mentioned_models: Vec<String>,
    pub query_without_mentions: String,
}

pub struct MessageIngest {
    repo: Arc<dyn MessageRepo>,
    pubsub: Arc<dyn PubSub>,
    clock: Arc<dyn Clock>,
    rate_limiter: Arc<RateLimiter>,
    history: Arc<HistoryLoader>,
    mention_re: Option<Regex>,
    known_models: Vec<String>,
    instance_id: String,
}

const MENTION_PATTERN: &str = r"@([A-Za-z0-9_-]+)";

impl MessageIngest {
    pub fn new(
        repo: Arc<dyn MessageRepo>,
        pubsub: Arc<dyn PubSub>,
        clock: Arc<dyn Clock>,
        rate_limiter: Arc<RateLimiter>,
        history: Arc<HistoryLoader>,
        known_models: Vec<String>,
        instance_id: String,
    ) -> Self {
        let mention_re = match Regex::new(MENTION_PATTERN) {
            Ok(re) => Some(re),
            Err(err) => {
                tracing::error!(err = %err, "mention pattern failed to compile, @mentions disabled");
                None
            }
        };

        Self {
            repo,
            pubsub,
            clock,
            rate_limiter,
            history,
            mention_re,
            known_models,
            instance_id,
        }
    }

    pub fn room_topic(room_id: &str) -> String {
        format!("room:{room_id}")
    }

    fn validate(content: &str) -> ChatResult<()> {
        if content.trim().is_empty() {
            return Err(ChatError::InvalidInput);
        }
        if content.len() > MAX_CONTENT_LEN {
            return Err(ChatError::InvalidInput);
        }
        Ok(())
    }

    fn detect_mentions(&self, content: &str) -> Vec<String> {
        let Some(mention_re) = &self.mention_re else {
            return Vec::new();
        };
        mention_re
            .captures_iter(content)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_owned()))
            .filter(|name| self.known_models.iter().any(|m| m == name))
            .collect()
    }

    fn strip_mentions(&self, content: &str, models: &[String]) -> String {
        let mut stripped = content.to_owned();
        for model in models {
            stripped = stripped.replace(&format!("@{model}"), "");
        }
        stripped.trim().to_owned()
    }

    /// `SendMessage(userId, roomId, content) -> Message | InvalidInput |
    /// RateLimited | PersistFailed`.
    pub async fn send(&self, user_id: &str, room_id: &str, content: &str, sender: SenderView) -> ChatResult<IngestOutcome> {
        Self::validate(content)?;
        self.rate_limiter.check(user_id).await?;

        let mentioned_models = self.detect_mentions(content);
        let query_without_mentions = self.strip_mentions(content, &mentioned_models);

        let msg = Message {
            id: Uuid::new_v4().to_string(),
            room_id: room_id.to_owned(),
            sender_id: Some(user_id.to_owned()),
            content: content.to_owned(),
            kind: MessageKind::Text,
            file: None,
            ai_type: None,
            timestamp: self.clock.now_ms(),
            readers: Vec::new(),
            reactions: HashMap::new(),
            deleted: false,
        };

        let persisted = self.repo.create(msg).await.map_err(|_| ChatError::PersistFailed)?;
        self.fan_out(&persisted, Some(sender)).await;
        self.history.invalidate(room_id).await;

        Ok(IngestOutcome { message: persisted, mentioned_models, query_without_mentions })
    }

    /// `SendFileMessage` (spec.md §4.7): identical path but the payload is a
    /// file reference resolved by the caller via `FileRepo` beforehand.
    pub async fn send_file(
        &self,
        user_id: &str,
        room_id: &str,
        file: crate::model::FileRef,
        sender: SenderView,
    ) -> ChatResult<IngestOutcome> {
        self.rate_limiter.check(user_id).await?;

        let msg = Message {
            id: Uuid::new_v4().to_string(),
            room_id: room_id.to_owned(),
            sender_id: Some(user_id.to_owned()),
            content: file.originalname.clone(),
            kind: MessageKind::File,
            file: Some(file),
            ai_type: None,
            timestamp: self.clock.now_ms(),
            readers: Vec::new(),
            reactions: HashMap::new(),
            deleted: false,
        };

        let persisted = self.repo.create(msg).await.map_err(|_| ChatError::PersistFailed)?;
        self.fan_out(&persisted, Some(sender)).await;
        self.history.invalidate(room_id).await;

        Ok(IngestOutcome { message: persisted, mentioned_models: Vec::new(), query_without_mentions: String::new() })
    }

    async fn fan_out(&self, msg: &Message, sender: Option<SenderView>) {
        let view = crate::model::MessageView::from_message(msg, sender);
        let envelope = OutboundEvent::Message(view).to_envelope(&self.instance_id);
        if let Ok(encoded) = serde_json::to_string(&envelope) {
            self.pubsub.publish(&Self::room_topic(&msg.room_id), encoded).await;
        }
    }

    /// Subscribe to a room's fan-out topic for local delivery of events
    /// published by any instance (including this one, filtered by origin at
    /// the transport layer per spec.md §9 fan-out amplification).
    pub async fn subscribe_room(&self, room_id: &RoomId) -> tokio::sync::mpsc::Receiver<String> {
        self.pubsub.subscribe(&Self::room_topic(room_id)).await
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

/// Typing events bypass rate limiting entirely (spec.md open question:
/// "typing events are not rate-limited").
pub async fn publish_typing(pubsub: &Arc<dyn PubSub>, instance_id: &str, room_id: &str, user_id: &str, is_typing: bool) {
    let envelope =
        OutboundEvent::UserTyping { room_id: room_id.to_owned(), user_id: user_id.to_owned(), is_typing }.to_envelope(instance_id);
    if let Ok(encoded) = serde_json::to_string(&envelope) {
        pubsub.publish(&MessageIngest::room_topic(room_id), encoded).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeCache, FakeMessageRepo, FakePubSub, FakeRoomRepo, FixedClock};

    fn test_sender() -> SenderView {
        SenderView { id: "u1".to_owned(), name: "Alice".to_owned(), email: "a@example.com".to_owned(), profile_image: None }
    }

    fn ingest(known_models: Vec<String>) -> MessageIngest {
        let repo = Arc::new(FakeMessageRepo::new());
        let rooms = Arc::new(FakeRoomRepo::new());
        let pubsub = Arc::new(FakePubSub::new());
        let clock = Arc::new(FixedClock::new(0));
        let cache = Arc::new(FakeCache::new());
        let rate_limiter = Arc::new(RateLimiter::new(Arc::clone(&cache) as _, Arc::clone(&clock) as _, 60_000, 40, 1000));
        let history = Arc::new(HistoryLoader::new(Arc::clone(&repo) as _, rooms, cache, 20, 100));
        MessageIngest::new(repo, pubsub, clock, rate_limiter, history, known_models, "instance-a".to_owned())
    }

    #[tokio::test]
    async fn sends_and_persists_a_text_message() {
        let ingest = ingest(vec![]);
        let outcome = ingest.send("u1", "room1", "hello", test_sender()).await.expect("send");
        assert_eq!(outcome.message.content, "hello");
        assert!(outcome.mentioned_models.is_empty());
    }

    #[tokio::test]
    async fn rejects_empty_content() {
        let ingest = ingest(vec![]);
        assert_eq!(ingest.send("u1", "room1", "   ", test_sender()).await.unwrap_err(), ChatError::InvalidInput);
    }

    #[tokio::test]
    async fn detects_known_model_mentions_and_strips_them() {
        let ingest = ingest(vec!["helper-bot".to_owned()]);
        let outcome = ingest.send("u1", "room1", "hey @helper-bot and @random-guy", test_sender()).await.expect("send");
        assert_eq!(outcome.mentioned_models, vec!["helper-bot".to_owned()]);
        assert_eq!(outcome.query_without_mentions, "hey  and @random-guy");
    }

    #[tokio::test]
    async fn forty_first_call_in_a_window_is_rejected() {
        let ingest = ingest(vec![]);
        for i in 0..40 {
            ingest.send("u1", "room1", &format!("msg {i}"), test_sender()).await.expect("within budget");
        }
        assert_eq!(ingest.send("u1", "room1", "one too many", test_sender()).await.unwrap_err(), ChatError::RateLimited);
    }

    #[tokio::test]
    async fn fan_out_reaches_a_room_subscriber_as_a_message_event() {
        let ingest = ingest(vec![]);
        let mut rx = ingest.subscribe_room(&"room1".to_owned()).await;
        ingest.send("u1", "room1", "hi there", test_sender()).await.expect("send");
        let payload = rx.recv().await.expect("should receive fan-out");
        assert!(payload.contains("hi there"));
        assert!(payload.contains("\"event\":\"message\""));
    }
}
