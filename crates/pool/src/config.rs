// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pool configuration and the `WORKER_*` environment overrides.

use loft_core::config::DEFAULT_TIMEOUT;
use loft_core::parse_memory_size;
use std::time::Duration;

/// Default total memory pool: 256 MiB.
pub const DEFAULT_POOL_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Hard cap on simultaneously running jobs across all tenants; also
    /// the size of the worker fleet.
    pub max_concurrent_total: usize,
    /// Soft per-tenant cap: beyond it new spawns queue instead of running.
    pub max_concurrent_per_tenant: usize,
    /// Per-tenant cap on pending jobs before spawns are rejected.
    pub max_queue_depth: usize,
    /// Total bytes allocatable from the memory budget.
    pub memory_pool_bytes: u64,
    /// Hard cap on in-flight daemons per tenant.
    pub max_daemons_per_tenant: usize,
    /// Timeout applied when a job config carries none.
    pub default_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent_total: 20,
            max_concurrent_per_tenant: 5,
            max_queue_depth: 100,
            memory_pool_bytes: DEFAULT_POOL_BYTES,
            max_daemons_per_tenant: 2,
            default_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl PoolConfig {
    loft_core::setters! {
        set {
            max_concurrent_total: usize,
            max_concurrent_per_tenant: usize,
            max_queue_depth: usize,
            memory_pool_bytes: u64,
            max_daemons_per_tenant: usize,
            default_timeout: Duration,
        }
    }

    /// Defaults with any `WORKER_*` environment overrides applied.
    /// Unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(bytes) = env_memory("WORKER_POOL_SIZE_BYTES") {
            config.memory_pool_bytes = bytes;
        }
        if let Some(n) = env_count("WORKER_MAX_CONCURRENT_TOTAL") {
            config.max_concurrent_total = n;
        }
        if let Some(n) = env_count("WORKER_MAX_CONCURRENT_PER_TENANT") {
            config.max_concurrent_per_tenant = n;
        }
        if let Some(n) = env_count("WORKER_MAX_DAEMONS_PER_TENANT") {
            config.max_daemons_per_tenant = n;
        }
        if let Some(n) = env_count("WORKER_MAX_QUEUE_DEPTH") {
            config.max_queue_depth = n;
        }
        if let Some(timeout) = env_duration("WORKER_DEFAULT_TIMEOUT") {
            config.default_timeout = timeout;
        }
        config
    }

    /// Capacity of the dispatch channel: generous enough that admission
    /// control is the only back-pressure a spawner ever sees.
    pub fn queue_capacity(&self) -> usize {
        self.max_queue_depth.saturating_mul(16).max(1)
    }
}

fn env_count(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|s| s.parse::<usize>().ok()).filter(|n| *n >= 1)
}

fn env_memory(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| parse_memory_size(&s).ok()).filter(|n| *n > 0)
}

fn env_duration(name: &str) -> Option<Duration> {
    std::env::var(name).ok().and_then(|s| humantime::parse_duration(s.trim()).ok())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
