// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenario harness. Wires a real `AppState` against the crate's
//! own in-memory fakes so scenarios exercise the full C1–C10 call graph
//! (auth, presence, ingest, history, reactions, AI) without a network hop.

use std::sync::Arc;

use chat_core::config::CoreConfig;
use chat_core::fakes::{
    FakeAiGenerator, FakeAuthVerifier, FakeCache, FakeFileRepo, FakeMessageRepo, FakePubSub, FakeRoomRepo, FakeUserRepo,
    FixedClock, StaticMetrics,
};
use chat_core::model::{Room, SenderView, User};
use chat_core::state::{AppState, Collaborators};
use indexmap::IndexSet;
use tokio_util::sync::CancellationToken;

pub struct Harness {
    pub state: Arc<AppState>,
    pub clock: Arc<FixedClock>,
    pub auth: Arc<FakeAuthVerifier>,
    pub users: Arc<FakeUserRepo>,
    pub rooms: Arc<FakeRoomRepo>,
    pub messages: Arc<FakeMessageRepo>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(CoreConfig::default())
    }

    pub fn with_config(config: CoreConfig) -> Self {
        let clock = Arc::new(FixedClock::new(1_000));
        let auth = Arc::new(FakeAuthVerifier::new());
        let users = Arc::new(FakeUserRepo::new());
        let rooms = Arc::new(FakeRoomRepo::new());
        let messages = Arc::new(FakeMessageRepo::new());

        let collaborators = Collaborators {
            auth: Arc::clone(&auth) as _,
            users: Arc::clone(&users) as _,
            rooms: Arc::clone(&rooms) as _,
            files: Arc::new(FakeFileRepo::new()),
            messages: Arc::clone(&messages) as _,
            ai: Arc::new(FakeAiGenerator::new()),
            cache: Arc::new(FakeCache::new()),
            pubsub: Arc::new(FakePubSub::new()),
            clock: Arc::clone(&clock) as _,
            metrics: Arc::new(StaticMetrics),
        };

        let state = Arc::new(AppState::new(config, collaborators, CancellationToken::new()));
        Self { state, clock, auth, users, rooms, messages }
    }

    /// Register a user with a token/session pair the authenticator accepts.
    pub async fn register_user(&self, user_id: &str, name: &str) -> (String, String) {
        let token = format!("tok-{user_id}");
        let session_id = format!("sess-{user_id}");
        self.users
            .insert(User { id: user_id.to_owned(), name: name.to_owned(), email: format!("{user_id}@example.com"), profile_image: None })
            .await;
        self.auth.register(&token, user_id, &session_id).await;
        (token, session_id)
    }

    pub async fn create_room(&self, room_id: &str, creator: &str) {
        self.rooms
            .insert(Room {
                id: room_id.to_owned(),
                name: room_id.to_owned(),
                password_hash: None,
                creator_id: creator.to_owned(),
                participants: IndexSet::new(),
                created_at: self.clock.now_ms(),
            })
            .await;
    }

    pub fn sender(&self, user_id: &str, name: &str) -> SenderView {
        SenderView { id: user_id.to_owned(), name: name.to_owned(), email: format!("{user_id}@example.com"), profile_image: None }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
