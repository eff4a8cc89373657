// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared application state: every component wired to its collaborators,
//! ready for the transport layer to drive.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::ai::AiCoordinator;
use crate::auth::SessionAuthenticator;
use crate::config::CoreConfig;
use crate::connections::ConnectionRegistry;
use crate::history::HistoryLoader;
use crate::janitor::{Janitor, ProcessHeapSampler};
use crate::messages::MessageIngest;
use crate::ports::{AiGenerator, AuthVerifier, Cache, Clock, FileRepo, Metrics, PubSub, RoomRepo, UserRepo};
use crate::ratelimit::RateLimiter;
use crate::reactions::ReactionProcessor;
use crate::rooms::PresenceTracker;

/// Builds a fully in-memory `Collaborators` for standalone runs with no
/// external store, cache, or bus configured — the same role `fakes.rs`
/// plays for unit tests, lifted to a runnable default (spec.md §9
/// "no process-wide singletons", but a demo binary still needs something).
impl Collaborators {
    pub fn in_memory() -> Self {
        use crate::fakes::{
            FakeAiGenerator, FakeAuthVerifier, FakeCache, FakeFileRepo, FakeMessageRepo, FakePubSub, FakeRoomRepo,
            FakeUserRepo, StaticMetrics,
        };
        Self {
            auth: Arc::new(FakeAuthVerifier::new()),
            users: Arc::new(FakeUserRepo::new()),
            rooms: Arc::new(FakeRoomRepo::new()),
            files: Arc::new(FakeFileRepo::new()),
            messages: Arc::new(FakeMessageRepo::new()),
            ai: Arc::new(FakeAiGenerator::new()),
            cache: Arc::new(FakeCache::new()),
            pubsub: Arc::new(FakePubSub::new()),
            clock: Arc::new(crate::ports::SystemClock),
            metrics: Arc::new(StaticMetrics),
        }
    }
}

/// Every external collaborator the core needs, grouped for a single
/// constructor call (spec.md §1 "Out of scope").
pub struct Collaborators {
    pub auth: Arc<dyn AuthVerifier>,
    pub users: Arc<dyn UserRepo>,
    pub rooms: Arc<dyn RoomRepo>,
    pub files: Arc<dyn FileRepo>,
    pub messages: Arc<dyn crate::ports::MessageRepo>,
    pub ai: Arc<dyn AiGenerator>,
    pub cache: Arc<dyn Cache>,
    pub pubsub: Arc<dyn PubSub>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<dyn Metrics>,
}

/// Shared core state: every component, wired once at startup and handed to
/// the transport layer as `Arc<AppState>`.
pub struct AppState {
    pub config: CoreConfig,
    pub shutdown: CancellationToken,
    pub instance_id: String,

    pub authenticator: Arc<SessionAuthenticator>,
    pub connections: Arc<ConnectionRegistry>,
    pub presence: Arc<PresenceTracker>,
    pub history: Arc<HistoryLoader>,
    pub ingest: Arc<MessageIngest>,
    pub reactions: Arc<ReactionProcessor>,
    pub ai: Arc<AiCoordinator>,
    pub rate_limiter: Arc<RateLimiter>,

    pub pubsub: Arc<dyn PubSub>,
    pub files: Arc<dyn FileRepo>,
    pub users: Arc<dyn UserRepo>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<dyn Metrics>,
}

impl AppState {
    pub fn new(config: CoreConfig, collaborators: Collaborators, shutdown: CancellationToken) -> Self {
        let instance_id = Uuid::new_v4().to_string();

        let authenticator =
            Arc::new(SessionAuthenticator::new(collaborators.auth, Arc::clone(&collaborators.users), Arc::clone(&collaborators.cache)));

        let connections =
            Arc::new(ConnectionRegistry::new(Arc::clone(&collaborators.clock), config.preempt_window(), config.max_connections));

        let presence = Arc::new(PresenceTracker::new(
            Arc::clone(&collaborators.rooms),
            Arc::clone(&collaborators.messages),
            Arc::clone(&collaborators.pubsub),
            Arc::clone(&collaborators.clock),
            instance_id.clone(),
        ));

        let rate_limiter = Arc::new(RateLimiter::new(
            Arc::clone(&collaborators.cache),
            Arc::clone(&collaborators.clock),
            config.rate_window_ms,
            config.rate_max,
            config.max_rate_buckets,
        ));

        let history = Arc::new(HistoryLoader::new(
            Arc::clone(&collaborators.messages),
            Arc::clone(&collaborators.rooms),
            Arc::clone(&collaborators.cache),
            config.history_page_size,
            config.max_history_inflight,
        ));

        let ingest = Arc::new(MessageIngest::new(
            Arc::clone(&collaborators.messages),
            Arc::clone(&collaborators.pubsub),
            Arc::clone(&collaborators.clock),
            Arc::clone(&rate_limiter),
            Arc::clone(&history),
            config.ai_model_set(),
            instance_id.clone(),
        ));

        let reactions = Arc::new(ReactionProcessor::new(
            Arc::clone(&collaborators.messages),
            Arc::clone(&collaborators.pubsub),
            Arc::clone(&collaborators.clock),
            instance_id.clone(),
        ));

        let ai = Arc::new(AiCoordinator::new(
            Arc::clone(&collaborators.messages),
            Arc::clone(&collaborators.pubsub),
            collaborators.ai,
            Arc::clone(&collaborators.clock),
            config.max_streams,
            instance_id.clone(),
        ));

        Self {
            config,
            shutdown,
            instance_id,
            authenticator,
            connections,
            presence,
            history,
            ingest,
            reactions,
            ai,
            rate_limiter,
            pubsub: collaborators.pubsub,
            files: collaborators.files,
            users: collaborators.users,
            clock: collaborators.clock,
            metrics: collaborators.metrics,
        }
    }

    /// Spawn the background janitor loop; returns its task handle so the
    /// caller can await it during shutdown.
    pub fn spawn_janitor(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let janitor = Arc::new(Janitor::new(
            Arc::clone(&self.connections),
            Arc::clone(&self.rate_limiter),
            Arc::clone(&self.ai),
            Arc::new(ProcessHeapSampler),
            Duration::from_millis(self.config.janitor_interval_ms),
            Duration::from_millis(self.config.janitor_interval_ms) * 10,
            self.config.stream_idle(),
            self.config.heap_soft_mb,
            self.config.heap_hard_mb,
        ));
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move { janitor.run(shutdown).await })
    }
}
