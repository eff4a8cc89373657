// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C4: connection registry. Enforces single active session per user: a new
//! connection for an already-connected user pre-empts the old one after a
//! grace period rather than rejecting outright.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{ChatError, ChatResult};
use crate::model::UserId;
use crate::ports::{Clock, ConnId};

/// Sent to a connection's outbound task to tell it what happened.
#[derive(Debug, Clone)]
pub enum ConnSignal {
    /// A newer session just registered for the same user. Sent immediately
    /// so the incumbent can warn its client (spec.md §8 invariant 1).
    DuplicateLogin,
    /// The grace period has elapsed with no incumbent disconnect; this
    /// connection must close with `session_ended{reason:"duplicate_login"}`.
    Preempted,
}

struct ConnectionEntry {
    conn_id: ConnId,
    user_id: UserId,
    last_activity: i64,
    signal_tx: mpsc::Sender<ConnSignal>,
    preempt_token: CancellationToken,
}

/// Tracks one live connection per user (spec.md §4.4 "single active session").
pub struct ConnectionRegistry {
    by_user: RwLock<std::collections::HashMap<UserId, ConnectionEntry>>,
    clock: Arc<dyn Clock>,
    preempt_grace: Duration,
    max_connections: usize,
}

pub struct RegisterOutcome {
    pub signal_rx: mpsc::Receiver<ConnSignal>,
    /// `Some` if a prior connection for this user existed and was pre-empted.
    pub preempted_prior: Option<ConnId>,
}

impl ConnectionRegistry {
    pub fn new(clock: Arc<dyn Clock>, preempt_grace: Duration, max_connections: usize) -> Self {
        Self {
            by_user: RwLock::new(std::collections::HashMap::new()),
            clock,
            preempt_grace,
            max_connections,
        }
    }

    /// Register a new connection for `user_id`, pre-empting any existing one
    /// after `preempt_grace` rather than immediately (spec.md §4.4 step 2).
    pub async fn register(&self, user_id: &str, conn_id: ConnId) -> ChatResult<RegisterOutcome> {
        let mut guard = self.by_user.write().await;
        if guard.len() >= self.max_connections && !guard.contains_key(user_id) {
            return Err(ChatError::Internal);
        }

        let (signal_tx, signal_rx) = mpsc::channel(4);
        let preempt_token = CancellationToken::new();

        let preempted_prior = if let Some(prior) = guard.remove(user_id) {
            let prior_conn = prior.conn_id.clone();
            let prior_signal = prior.signal_tx.clone();
            let prior_token = prior.preempt_token.clone();
            let grace = self.preempt_grace;
            let _ = prior_signal.try_send(ConnSignal::DuplicateLogin);
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(grace) => {
                        let _ = prior_signal.send(ConnSignal::Preempted).await;
                    }
                    _ = prior_token.cancelled() => {}
                }
            });
            info!(user_id, prior_conn, "pre-empting existing session for new connection");
            Some(prior_conn)
        } else {
            None
        };

        guard.insert(
            user_id.to_owned(),
            ConnectionEntry {
                conn_id,
                user_id: user_id.to_owned(),
                last_activity: self.clock.now_ms(),
                signal_tx,
                preempt_token,
            },
        );

        Ok(RegisterOutcome { signal_rx, preempted_prior })
    }

    /// Remove `user_id`'s connection iff it still points at `conn_id` — a
    /// stale unregister from a connection that already lost a race against a
    /// newer registration must not evict the newer one.
    pub async fn unregister(&self, user_id: &str, conn_id: &ConnId) {
        let mut guard = self.by_user.write().await;
        if let Some(entry) = guard.get(user_id) {
            if &entry.conn_id == conn_id {
                entry.preempt_token.cancel();
                guard.remove(user_id);
            }
        }
    }

    pub async fn touch(&self, user_id: &str) {
        let mut guard = self.by_user.write().await;
        if let Some(entry) = guard.get_mut(user_id) {
            entry.last_activity = self.clock.now_ms();
        }
    }

    pub async fn is_current(&self, user_id: &str, conn_id: &ConnId) -> bool {
        self.by_user.read().await.get(user_id).is_some_and(|e| &e.conn_id == conn_id)
    }

    pub async fn active_count(&self) -> usize {
        self.by_user.read().await.len()
    }

    /// Janitor sweep: report connections idle past `max_idle` for the caller
    /// to decide whether to close them. Does not remove anything itself.
    pub async fn idle_beyond(&self, max_idle: Duration) -> Vec<UserId> {
        let now = self.clock.now_ms();
        let max_idle_ms = max_idle.as_millis() as i64;
        self.by_user
            .read()
            .await
            .values()
            .filter(|e| now - e.last_activity > max_idle_ms)
            .map(|e| e.user_id.clone())
            .collect()
    }
}
