// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Data model (spec.md §3). Messages are append-only except for `readers`,
//! `reactions`, and the `deleted` flag; everything else is immutable once
//! persisted.

use std::collections::{HashMap, HashSet};

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

pub type UserId = String;
pub type RoomId = String;
pub type MessageId = String;
pub type SessionId = String;

/// Read-only to the core; owned by `UserRepo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub profile_image: Option<String>,
}

/// Mutated only via participant add/remove (`RoomRepo::add_participant` /
/// `remove_participant`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub password_hash: Option<String>,
    pub creator_id: UserId,
    pub participants: IndexSet<UserId>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    File,
    System,
    Ai,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRef {
    pub id: String,
    pub filename: String,
    pub originalname: String,
    pub mimetype: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reader {
    pub user_id: UserId,
    pub read_at: i64,
}

/// Immutable except `readers`, `reactions`, `deleted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: Option<UserId>,
    pub content: String,
    pub kind: MessageKind,
    pub file: Option<FileRef>,
    pub ai_type: Option<String>,
    pub timestamp: i64,
    pub readers: Vec<Reader>,
    pub reactions: HashMap<String, HashSet<UserId>>,
    pub deleted: bool,
}

impl Message {
    pub fn has_reader(&self, user_id: &str) -> bool {
        self.readers.iter().any(|r| r.user_id == user_id)
    }
}

/// Issued by the auth collaborator; the core only validates and bumps
/// `last_activity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
}

/// Wire payload for a sender embedded in a message (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderView {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
}

/// Wire payload for a message (spec.md §6 schema).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    #[serde(rename = "_id")]
    pub id: MessageId,
    pub room: RoomId,
    pub sender: Option<SenderView>,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<FileRef>,
    #[serde(rename = "aiType", skip_serializing_if = "Option::is_none")]
    pub ai_type: Option<String>,
    pub timestamp: i64,
    pub readers: Vec<ReaderView>,
    pub reactions: HashMap<String, Vec<UserId>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderView {
    pub user_id: UserId,
    pub read_at: i64,
}

impl MessageView {
    pub fn from_message(msg: &Message, sender: Option<SenderView>) -> Self {
        Self {
            id: msg.id.clone(),
            room: msg.room_id.clone(),
            sender,
            content: msg.content.clone(),
            kind: msg.kind,
            file: msg.file.clone(),
            ai_type: msg.ai_type.clone(),
            timestamp: msg.timestamp,
            readers: msg
                .readers
                .iter()
                .map(|r| ReaderView { user_id: r.user_id.clone(), read_at: r.read_at })
                .collect(),
            reactions: msg
                .reactions
                .iter()
                .map(|(emoji, users)| (emoji.clone(), users.iter().cloned().collect()))
                .collect(),
        }
    }
}
