// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration for the chat core, mirroring `MuxConfig`'s
//! clap-derive-plus-env-var shape.

use std::time::Duration;

/// Runtime configuration for the chat core server.
#[derive(Debug, Clone, clap::Args)]
pub struct CoreConfig {
    /// Host to bind on.
    #[arg(long, default_value = "0.0.0.0", env = "CHAT_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8080, env = "CHAT_PORT")]
    pub port: u16,

    /// Bearer token for HTTP auth. If unset, HTTP auth is disabled
    /// (session auth still runs via `AuthVerifier` regardless).
    #[arg(long, env = "CHAT_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Rate limit window in milliseconds.
    #[arg(long, default_value_t = 60_000, env = "CHAT_RATE_WINDOW_MS")]
    pub rate_window_ms: u64,

    /// Max operations per rate-limit window per user.
    #[arg(long, default_value_t = 40, env = "CHAT_RATE_MAX")]
    pub rate_max: u32,

    /// History page size default.
    #[arg(long, default_value_t = 25, env = "CHAT_HISTORY_PAGE_SIZE")]
    pub history_page_size: usize,

    /// History fetch timeout in milliseconds, per attempt.
    #[arg(long, default_value_t = 8_000, env = "CHAT_HISTORY_TIMEOUT_MS")]
    pub history_timeout_ms: u64,

    /// Pre-emption warning-to-force-close window in milliseconds.
    #[arg(long, default_value_t = 8_000, env = "CHAT_PREEMPT_MS")]
    pub preempt_ms: u64,

    /// Streaming session idle expiry in milliseconds.
    #[arg(long, default_value_t = 1_800_000, env = "CHAT_STREAM_IDLE_MS")]
    pub stream_idle_ms: u64,

    /// Background janitor tick interval in milliseconds.
    #[arg(long, default_value_t = 180_000, env = "CHAT_JANITOR_MS")]
    pub janitor_interval_ms: u64,

    /// Max concurrent connections tracked by the connection registry.
    #[arg(long, default_value_t = 2_000, env = "CHAT_MAX_CONNECTIONS")]
    pub max_connections: usize,

    /// Max concurrent AI streaming sessions.
    #[arg(long, default_value_t = 500, env = "CHAT_MAX_STREAMS")]
    pub max_streams: usize,

    /// Max tracked user->room mappings.
    #[arg(long, default_value_t = 2_000, env = "CHAT_MAX_PRESENCE")]
    pub max_presence: usize,

    /// Max in-flight history load keys.
    #[arg(long, default_value_t = 1_000, env = "CHAT_MAX_HISTORY_INFLIGHT")]
    pub max_history_inflight: usize,

    /// Max tracked rate-limit buckets.
    #[arg(long, default_value_t = 2_000, env = "CHAT_MAX_RATE_BUCKETS")]
    pub max_rate_buckets: usize,

    /// Soft heap threshold (MB) above which the janitor logs a warning.
    #[arg(long, default_value_t = 512, env = "CHAT_HEAP_SOFT_MB")]
    pub heap_soft_mb: u64,

    /// Hard heap threshold (MB) above which the janitor clears caches.
    #[arg(long, default_value_t = 1024, env = "CHAT_HEAP_HARD_MB")]
    pub heap_hard_mb: u64,

    /// NATS server URL for cross-instance fan-out. If unset, the server runs
    /// single-instance with no bus.
    #[arg(long, env = "CHAT_NATS_URL")]
    pub nats_url: Option<String>,

    /// AI model tags recognised in `@<model>` mentions (comma-separated).
    #[arg(long, default_value = "wayneAI,consultingAI", env = "CHAT_AI_MODELS")]
    pub ai_models: String,
}

impl CoreConfig {
    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_window_ms)
    }

    pub fn history_timeout(&self) -> Duration {
        Duration::from_millis(self.history_timeout_ms)
    }

    pub fn preempt_window(&self) -> Duration {
        Duration::from_millis(self.preempt_ms)
    }

    pub fn stream_idle(&self) -> Duration {
        Duration::from_millis(self.stream_idle_ms)
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_millis(self.janitor_interval_ms)
    }

    pub fn ai_model_set(&self) -> Vec<String> {
        self.ai_models.split(',').map(|s| s.trim().to_owned()).filter(|s| !s.is_empty()).collect()
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8080,
            auth_token: None,
            rate_window_ms: 60_000,
            rate_max: 40,
            history_page_size: 25,
            history_timeout_ms: 8_000,
            preempt_ms: 8_000,
            stream_idle_ms: 1_800_000,
            janitor_interval_ms: 180_000,
            max_connections: 2_000,
            max_streams: 500,
            max_presence: 2_000,
            max_history_inflight: 1_000,
            max_rate_buckets: 2_000,
            heap_soft_mb: 512,
            heap_hard_mb: 1024,
            nats_url: None,
            ai_models: "wayneAI,consultingAI".to_owned(),
        }
    }
}
