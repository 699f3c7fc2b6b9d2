// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! loft-storage: durable job rows for the worker pool.
//!
//! One logical table keyed by job id. The scheduler needs nothing more
//! than single-row atomic writes; implementations may sit on any durable
//! key-value or relational store.

mod file;
#[cfg(any(test, feature = "test-support"))]
mod memory;

pub use file::FileStore;
#[cfg(any(test, feature = "test-support"))]
pub use memory::MemoryStore;

use loft_core::{JobRecord, JobStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt job row: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Query shape for [`JobStore::list`].
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub tenant: Option<String>,
    pub status: Option<JobStatus>,
    /// 0 means no limit.
    pub limit: usize,
}

/// The persistence contract the scheduler runs against.
///
/// `insert` and `update` are both whole-row writes and idempotent at the
/// row level; the split exists so stores that care (SQL, audit logs) can
/// distinguish creation from mutation.
pub trait JobStore: Send + Sync + 'static {
    fn insert(&self, record: &JobRecord) -> Result<(), StoreError>;

    fn update(&self, record: &JobRecord) -> Result<(), StoreError>;

    fn load(&self, id: &str) -> Result<Option<JobRecord>, StoreError>;

    /// Rows ordered by `created_at_ms` descending.
    fn list(&self, query: &ListQuery) -> Result<Vec<JobRecord>, StoreError>;

    /// Daemon rows in non-terminal status, for crash recovery.
    fn daemons_in_flight(&self) -> Result<Vec<JobRecord>, StoreError>;
}

pub(crate) fn matches(record: &JobRecord, query: &ListQuery) -> bool {
    if let Some(tenant) = &query.tenant {
        if record.tenant_id.as_str() != tenant {
            return false;
        }
    }
    if let Some(status) = query.status {
        if record.status != status {
            return false;
        }
    }
    true
}

pub(crate) fn sort_and_clip(mut rows: Vec<JobRecord>, limit: usize) -> Vec<JobRecord> {
    rows.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
    if limit > 0 {
        rows.truncate(limit);
    }
    rows
}
