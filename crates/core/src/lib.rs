// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chat-core: the multi-tenant realtime group-chat engine.

pub mod ai;
pub mod auth;
pub mod config;
pub mod connections;
pub mod error;
pub mod fakes;
pub mod history;
pub mod janitor;
pub mod lru;
pub mod messages;
pub mod model;
pub mod ports;
pub mod ratelimit;
pub mod reactions;
pub mod rooms;
pub mod state;
pub mod transport;
pub mod wire;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::CoreConfig;
use crate::state::{AppState, Collaborators};
use crate::transport::build_router;

/// Run the chat server until shutdown.
pub async fn run(config: CoreConfig, collaborators: Collaborators) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let state = Arc::new(AppState::new(config, collaborators, shutdown.clone()));
    state.spawn_janitor();

    tracing::info!("chat-core listening on {addr}");
    let router = build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal(shutdown)).await?;

    Ok(())
}

/// Waits for SIGINT/SIGTERM, then cancels the shared shutdown token so the
/// janitor and any in-flight streaming sessions wind down (spec.md §5 "Exit
/// semantics").
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        if let Ok(mut sig) = signal(SignalKind::terminate()) {
            sig.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    token.cancel();
}
