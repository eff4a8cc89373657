// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C10: background janitor. On a fixed tick, sweeps every bounded registry
//! for staleness and watches process heap usage against soft/hard
//! thresholds (spec.md §4.10).

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::ai::AiCoordinator;
use crate::connections::ConnectionRegistry;
use crate::ratelimit::RateLimiter;

/// Heap-usage sample, pluggable so tests don't depend on the real OS.
pub trait HeapSampler: Send + Sync {
    fn resident_mb(&self) -> u64;
}

pub struct ProcessHeapSampler;

impl HeapSampler for ProcessHeapSampler {
    fn resident_mb(&self) -> u64 {
        // No portable stdlib API for RSS; a real deployment wires a crate
        // such as `sysinfo` here. Reporting 0 disables the threshold checks
        // rather than guessing.
        0
    }
}

pub struct Janitor {
    connections: Arc<ConnectionRegistry>,
    rate_limiter: Arc<RateLimiter>,
    ai: Arc<AiCoordinator>,
    heap: Arc<dyn HeapSampler>,
    interval: Duration,
    connection_idle: Duration,
    stream_idle: Duration,
    heap_soft_mb: u64,
    heap_hard_mb: u64,
}

impl Janitor {
    pub fn new(
        connections: Arc<ConnectionRegistry>,
        rate_limiter: Arc<RateLimiter>,
        ai: Arc<AiCoordinator>,
        heap: Arc<dyn HeapSampler>,
        interval: Duration,
        connection_idle: Duration,
        stream_idle: Duration,
        heap_soft_mb: u64,
        heap_hard_mb: u64,
    ) -> Self {
        Self {
            connections,
            rate_limiter,
            ai,
            heap,
            interval,
            connection_idle,
            stream_idle,
            heap_soft_mb,
            heap_hard_mb,
        }
    }

    /// Run the sweep loop until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep().await,
                _ = shutdown.cancelled() => {
                    info!("janitor shutting down");
                    break;
                }
            }
        }
    }

    async fn sweep(&self) {
        let idle_users = self.connections.idle_beyond(self.connection_idle).await;
        if !idle_users.is_empty() {
            info!(count = idle_users.len(), "janitor found idle connections");
        }

        self.rate_limiter.evict_stale_local(self.interval.as_millis() as i64 * 4).await;

        let reaped = self.ai.reap_idle(self.stream_idle).await;
        if !reaped.is_empty() {
            info!(count = reaped.len(), "janitor reaped idle AI streaming sessions");
        }

        self.check_heap();
    }

    fn check_heap(&self) {
        let resident = self.heap.resident_mb();
        if resident == 0 {
            return;
        }
        if resident >= self.heap_hard_mb {
            warn!(resident, hard = self.heap_hard_mb, "heap usage past hard threshold");
        } else if resident >= self.heap_soft_mb {
            warn!(resident, soft = self.heap_soft_mb, "heap usage past soft threshold");
        }
    }
}
