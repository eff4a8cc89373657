// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use chat_core::config::CoreConfig;
use chat_core::state::Collaborators;

#[tokio::main]
async fn main() {
    let config = CoreConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let collaborators = Collaborators::in_memory();

    if let Err(e) = chat_core::run(config, collaborators).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
