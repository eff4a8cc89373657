// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C5: room membership and presence. Tracks which room each connected user
//! currently has open and emits system messages on join/leave — but only for
//! voluntary transitions, never for pre-emption (spec.md §4.5).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};
use crate::messages::MessageIngest;
use crate::model::{Message, MessageKind, MessageView, RoomId, UserId};
use crate::ports::{Clock, MessageRepo, PubSub, RoomRepo};
use crate::wire::OutboundEvent;

/// Tracks the single room each online user currently has open, separate from
/// a room's durable participant list (`RoomRepo`).
pub struct PresenceTracker {
    current_room: RwLock<HashMap<UserId, RoomId>>,
    rooms: Arc<dyn RoomRepo>,
    messages: Arc<dyn MessageRepo>,
    pubsub: Arc<dyn PubSub>,
    clock: Arc<dyn Clock>,
    instance_id: String,
}

pub struct JoinOutcome {
    pub left_room: Option<RoomId>,
    pub system_message: Message,
    pub participants: Vec<UserId>,
}

impl PresenceTracker {
    pub fn new(
        rooms: Arc<dyn RoomRepo>,
        messages: Arc<dyn MessageRepo>,
        pubsub: Arc<dyn PubSub>,
        clock: Arc<dyn Clock>,
        instance_id: String,
    ) -> Self {
        Self { current_room: RwLock::new(HashMap::new()), rooms, messages, pubsub, clock, instance_id }
    }

    async fn publish(&self, room_id: &str, event: OutboundEvent) {
        let envelope = event.to_envelope(&self.instance_id);
        if let Ok(encoded) = serde_json::to_string(&envelope) {
            self.pubsub.publish(&MessageIngest::room_topic(room_id), encoded).await;
        }
    }

    fn system_message(&self, room_id: &str, content: String) -> Message {
        Message {
            id: Uuid::new_v4().to_string(),
            room_id: room_id.to_owned(),
            sender_id: None,
            content,
            kind: MessageKind::System,
            file: None,
            ai_type: None,
            timestamp: self.clock.now_ms(),
            readers: Vec::new(),
            reactions: HashMap::new(),
            deleted: false,
        }
    }

    /// Persist the system message without blocking the join/leave caller;
    /// failures log only (spec.md §4.5 "persisted asynchronously").
    fn persist_async(&self, repo: Arc<dyn MessageRepo>, msg: Message) {
        tokio::spawn(async move {
            if let Err(err) = repo.create(msg).await {
                tracing::warn!(err = %err, "failed to persist room system message");
            }
        });
    }

    /// `Join(userId, roomId) -> RoomState | AccessDenied`. Atomically leaves
    /// any previously-open room before joining the new one; rejoining the
    /// current room is a no-op.
    pub async fn join(&self, user_id: &str, room_id: &str, password: Option<&str>) -> ChatResult<JoinOutcome> {
        let room = self.rooms.find_by_id(room_id).await?;
        if let Some(hash) = &room.password_hash {
            let provided = password.ok_or(ChatError::AccessDenied)?;
            if provided != hash {
                return Err(ChatError::AccessDenied);
            }
        }

        if self.current_room_of(user_id).await.as_deref() == Some(room_id) {
            let participants = self.rooms.add_participant(room_id, user_id).await?;
            return Ok(JoinOutcome {
                left_room: None,
                system_message: self.system_message(room_id, format!("{user_id} joined the room")),
                participants,
            });
        }

        let left_room = {
            let mut guard = self.current_room.write().await;
            guard.insert(user_id.to_owned(), room_id.to_owned())
        };

        if let Some(prev) = &left_room {
            if prev != room_id {
                if let Ok(remaining) = self.rooms.remove_participant(prev, user_id).await {
                    self.publish(prev, OutboundEvent::ParticipantsUpdate { room_id: prev.clone(), participants: remaining })
                        .await;
                }
            }
        }

        let participants = self.rooms.add_participant(room_id, user_id).await?;
        let system_message = self.system_message(room_id, format!("{user_id} joined the room"));
        self.persist_async(Arc::clone(&self.messages), system_message.clone());

        let view = MessageView::from_message(&system_message, None);
        self.publish(room_id, OutboundEvent::UserJoined { room_id: room_id.to_owned(), user_id: user_id.to_owned(), message: view })
            .await;
        self.publish(room_id, OutboundEvent::ParticipantsUpdate { room_id: room_id.to_owned(), participants: participants.clone() })
            .await;

        Ok(JoinOutcome {
            left_room: left_room.filter(|prev| prev != room_id),
            system_message,
            participants,
        })
    }

    /// Graceful leave (explicit client action or disconnect). Emits a system
    /// message; pre-emption disconnects must call `clear` instead.
    pub async fn leave(&self, user_id: &str) -> ChatResult<Option<(RoomId, Message, Vec<UserId>)>> {
        let room_id = {
            let mut guard = self.current_room.write().await;
            guard.remove(user_id)
        };
        let Some(room_id) = room_id else { return Ok(None) };

        let participants = self.rooms.remove_participant(&room_id, user_id).await?;
        let system_message = self.system_message(&room_id, format!("{user_id} disconnected"));
        self.persist_async(Arc::clone(&self.messages), system_message.clone());

        let view = MessageView::from_message(&system_message, None);
        self.publish(&room_id, OutboundEvent::UserLeft { room_id: room_id.clone(), user_id: user_id.to_owned(), message: view })
            .await;
        self.publish(&room_id, OutboundEvent::ParticipantsUpdate { room_id: room_id.clone(), participants: participants.clone() })
            .await;

        Ok(Some((room_id, system_message, participants)))
    }

    /// Silent removal used for session pre-emption: no system message.
    pub async fn clear(&self, user_id: &str) -> Option<RoomId> {
        self.current_room.write().await.remove(user_id)
    }

    pub async fn current_room_of(&self, user_id: &str) -> Option<RoomId> {
        self.current_room.read().await.get(user_id).cloned()
    }

    pub async fn require_current_room(&self, user_id: &str, expected: &str) -> ChatResult<()> {
        match self.current_room_of(user_id).await {
            Some(room) if room == expected => Ok(()),
            _ => Err(ChatError::AccessDenied),
        }
    }
}
