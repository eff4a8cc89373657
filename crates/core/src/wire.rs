// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire-level event catalogue (spec.md §6). Inbound events arrive from a
//! session's transport; outbound events are what C5–C9 broadcast, both
//! locally and across the bus.

use serde::{Deserialize, Serialize};

use crate::error::ErrorBody;
use crate::model::{MessageId, MessageView, RoomId, UserId};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum InboundEvent {
    #[serde(rename = "joinRoom")]
    JoinRoom { room_id: RoomId, password: Option<String> },
    #[serde(rename = "chatMessage")]
    ChatMessage { room: RoomId, content: String, file_id: Option<String> },
    #[serde(rename = "fetchPreviousMessages")]
    FetchPreviousMessages { room_id: RoomId, before: Option<i64> },
    #[serde(rename = "markMessagesAsRead")]
    MarkMessagesAsRead { room_id: RoomId, message_ids: Vec<MessageId> },
    #[serde(rename = "messageReaction")]
    MessageReaction { message_id: MessageId, reaction: String, op: ReactionOp },
    #[serde(rename = "typing")]
    Typing { room_id: RoomId, is_typing: bool },
    #[serde(rename = "updateUserStatus")]
    UpdateUserStatus { status: UserStatus },
    #[serde(rename = "force_login")]
    ForceLogin { token: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionOp {
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Online,
    Away,
    Busy,
    Offline,
}

/// Envelope placed on the cross-instance bus (spec.md §6 "Cross-instance
/// bus"). Carries the publishing instance's id so subscribers can drop
/// events they already delivered locally (spec.md §9 fan-out amplification),
/// and an optional `exclude_user` the transport layer must not deliver to
/// (spec.md §4.8 "excluding the caller" for read receipts).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEnvelope {
    pub origin_instance: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub exclude_user: Option<UserId>,
    pub event: OutboundEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum OutboundEvent {
    #[serde(rename = "message")]
    Message(MessageView),
    #[serde(rename = "messageLoadStart")]
    MessageLoadStart,
    #[serde(rename = "previousMessagesLoaded")]
    PreviousMessagesLoaded { messages: Vec<MessageView>, has_more: bool, oldest_timestamp: Option<i64> },
    #[serde(rename = "joinRoomSuccess")]
    JoinRoomSuccess { room_id: RoomId, participants: Vec<UserId> },
    #[serde(rename = "joinRoomError")]
    JoinRoomError { error: ErrorBody },
    #[serde(rename = "participantsUpdate")]
    ParticipantsUpdate { room_id: RoomId, participants: Vec<UserId> },
    #[serde(rename = "userLeft")]
    UserLeft { room_id: RoomId, user_id: UserId, message: MessageView },
    #[serde(rename = "userJoined")]
    UserJoined { room_id: RoomId, user_id: UserId, message: MessageView },
    #[serde(rename = "messagesRead")]
    MessagesRead { user_id: UserId, message_ids: Vec<MessageId> },
    #[serde(rename = "messageReactionUpdate")]
    MessageReactionUpdate { message_id: MessageId, reactions: std::collections::HashMap<String, Vec<UserId>> },
    #[serde(rename = "userTyping")]
    UserTyping { room_id: RoomId, user_id: UserId, is_typing: bool },
    #[serde(rename = "userStatusUpdate")]
    UserStatusUpdate { room_id: RoomId, user_id: UserId, status: UserStatus },
    #[serde(rename = "duplicate_login")]
    DuplicateLogin { user_agent: Option<String>, ip: Option<String>, timestamp: i64 },
    #[serde(rename = "session_ended")]
    SessionEnded { reason: String },
    #[serde(rename = "aiMessageStart")]
    AiMessageStart { sid: String, model: String, timestamp: i64 },
    #[serde(rename = "aiMessageChunk")]
    AiMessageChunk { sid: String, chunk: String, full_content: String },
    #[serde(rename = "aiMessageComplete")]
    AiMessageComplete { sid: String, message: MessageView },
    #[serde(rename = "aiMessageError")]
    AiMessageError { sid: String },
    #[serde(rename = "error")]
    Error(ErrorBody),
}

impl OutboundEvent {
    pub fn to_envelope(self, origin_instance: &str) -> BusEnvelope {
        BusEnvelope { origin_instance: origin_instance.to_owned(), exclude_user: None, event: self }
    }

    /// Same as `to_envelope`, but marks `user_id` as the one connection the
    /// transport layer must not deliver this event to.
    pub fn to_envelope_excluding(self, origin_instance: &str, user_id: &str) -> BusEnvelope {
        BusEnvelope { origin_instance: origin_instance.to_owned(), exclude_user: Some(user_id.to_owned()), event: self }
    }
}
