// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host capabilities consumed by the scheduler and the executor.

use crate::script::{HostError, HostValue};
use loft_core::{JobRecord, JobStatus, TenantId};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ReadError {
    #[error("handler not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Other(String),
}

/// Tenant-scoped file reader. The scheduler loads the handler source
/// through this immediately before execution.
pub trait SourceReader: Send + Sync + 'static {
    fn read(&self, tenant: &TenantId, path: &str) -> Result<String, ReadError>;
}

/// Tenant-scoped key-value namespace exposed to handlers as `storage.*`.
pub trait KvAdapter: Send + Sync + 'static {
    fn get(&self, tenant: &TenantId, key: &str) -> Result<Option<HostValue>, HostError>;

    fn put(&self, tenant: &TenantId, key: &str, value: HostValue) -> Result<(), HostError>;

    fn delete(&self, tenant: &TenantId, key: &str) -> Result<(), HostError>;

    /// Keys with the given prefix, lexicographic.
    fn list(&self, tenant: &TenantId, prefix: &str) -> Result<Vec<String>, HostError>;
}

/// Child-job operations exposed to handlers as `jobs.*`, pinned to the
/// spawning tenant. The pool implements this; errors are surfaced into
/// the script as host exceptions.
pub trait JobSpawner: Send + Sync + 'static {
    fn spawn(
        &self,
        tenant: &TenantId,
        handler: &str,
        config: &HostValue,
    ) -> Result<JobRecord, HostError>;

    fn get(&self, tenant: &TenantId, id: &str) -> Result<Option<JobRecord>, HostError>;

    fn list(
        &self,
        tenant: &TenantId,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, HostError>;

    /// Returns false when no such job exists for this tenant.
    fn cancel(&self, tenant: &TenantId, id: &str) -> Result<bool, HostError>;
}
