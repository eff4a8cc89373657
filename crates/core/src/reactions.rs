// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C8: read receipts and reactions. Both are idempotent from the caller's
//! point of view — marking an already-read message, or re-adding a reaction
//! a user already placed, changes nothing (spec.md §4.8).

use std::sync::Arc;

use crate::error::ChatResult;
use crate::model::{Message, MessageId};
use crate::ports::{Clock, MessageRepo, PubSub};
use crate::wire::{BusEnvelope, OutboundEvent};

pub struct ReactionProcessor {
    repo: Arc<dyn MessageRepo>,
    pubsub: Arc<dyn PubSub>,
    clock: Arc<dyn Clock>,
    instance_id: String,
}

impl ReactionProcessor {
    pub fn new(repo: Arc<dyn MessageRepo>, pubsub: Arc<dyn PubSub>, clock: Arc<dyn Clock>, instance_id: String) -> Self {
        Self { repo, pubsub, clock, instance_id }
    }

    async fn dispatch(&self, room_id: &str, envelope: BusEnvelope) {
        if let Ok(encoded) = serde_json::to_string(&envelope) {
            self.pubsub.publish(&crate::messages::MessageIngest::room_topic(room_id), encoded).await;
        }
    }

    async fn publish(&self, room_id: &str, event: OutboundEvent) {
        self.dispatch(room_id, event.to_envelope(&self.instance_id)).await;
    }

    /// `MarkRead(userId, messageIds[])`: bulk, idempotent. Broadcasts
    /// `messagesRead` to the room, excluding the caller at the transport
    /// layer (spec.md §4.8).
    pub async fn mark_read(&self, reader_id: &str, room_id: &str, message_ids: &[MessageId]) -> ChatResult<()> {
        let read_at = self.clock.now_ms();
        for message_id in message_ids {
            self.repo.mark_read(message_id, reader_id, read_at).await?;
        }

        let event = OutboundEvent::MessagesRead { user_id: reader_id.to_owned(), message_ids: message_ids.to_vec() };
        self.dispatch(room_id, event.to_envelope_excluding(&self.instance_id, reader_id)).await;
        Ok(())
    }

    /// `SetReaction(userId, messageId, emoji, add) -> Message`. Last writer
    /// wins: adding twice or removing twice is a no-op on the set itself.
    pub async fn set_reaction(
        &self,
        user_id: &str,
        room_id: &str,
        message_id: &str,
        emoji: &str,
        add: bool,
    ) -> ChatResult<Message> {
        let updated = self.repo.set_reaction(message_id, emoji, user_id, add).await?;

        let reactions = updated
            .reactions
            .iter()
            .map(|(emoji, users)| (emoji.clone(), users.iter().cloned().collect()))
            .collect();
        self.publish(
            room_id,
            OutboundEvent::MessageReactionUpdate { message_id: message_id.to_owned(), reactions },
        )
        .await;
        Ok(updated)
    }
}
