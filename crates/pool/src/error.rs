// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduler-level error kinds.

use loft_core::TenantId;
use loft_storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Spawn after shutdown.
    #[error("worker pool is closed")]
    Closed,
    /// Per-tenant queue cap reached.
    #[error("job queue full for tenant '{0}'")]
    QueueFull(TenantId),
    /// Per-tenant daemon cap reached.
    #[error("daemon limit reached for tenant '{0}'")]
    DaemonLimit(TenantId),
    /// No such job id.
    #[error("no such job: {0}")]
    NotFound(String),
    /// The dispatch queue refused an enqueue. Internal; the queue is sized
    /// so admission control is the only back-pressure.
    #[error("dispatch queue unavailable")]
    QueueUnavailable,
    /// Workers did not drain within the caller's deadline. They keep
    /// draining in the background.
    #[error("shutdown deadline exceeded")]
    ShutdownTimeout,
    /// Malformed job configuration from the caller.
    #[error(transparent)]
    InvalidConfig(#[from] loft_core::ConfigError),
    #[error(transparent)]
    Storage(#[from] StoreError),
}
