// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide pool state and the public scheduler API.

use crate::budget::{BudgetStats, MemoryBudget};
use crate::config::PoolConfig;
use crate::error::PoolError;
use loft_core::{Clock, Job, JobConfig, JobId, JobRecord, JobStatus, TenantId};
use loft_host::{HostError, JobExecutor, JobSpawner, SourceReader};
use loft_storage::{JobStore, ListQuery};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Subscriber-count query supplied by the host for the idle watcher.
pub type ListenerCountFn = Arc<dyn Fn(&TenantId, &str) -> usize + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolStats {
    pub pending: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub total: usize,
    pub tenants_running: usize,
    pub memory: BudgetStats,
}

/// The background worker pool.
///
/// Constructed once at startup, torn down exactly once via [`Pool::shutdown`].
/// All methods take `&self`; the pool lives behind an `Arc` shared by the
/// worker tasks, the host API surface, and running handlers (through the
/// child-job namespace).
pub struct Pool<C: Clock> {
    pub(crate) config: PoolConfig,
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) clock: C,
    pub(crate) budget: Arc<MemoryBudget<C>>,
    pub(crate) jobs: RwLock<HashMap<JobId, Arc<Job>>>,
    pub(crate) tenant_running: Mutex<HashMap<TenantId, usize>>,
    pub(crate) queue_tx: mpsc::Sender<Arc<Job>>,
    pub(crate) queue_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Arc<Job>>>>,
    pub(crate) executor: RwLock<Option<Arc<dyn JobExecutor>>>,
    pub(crate) reader: RwLock<Option<Arc<dyn SourceReader>>>,
    pub(crate) listener_count: RwLock<Option<ListenerCountFn>>,
    pub(crate) closed: AtomicBool,
    started: AtomicBool,
    pub(crate) shutdown_token: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<C: Clock> Pool<C> {
    pub fn new(config: PoolConfig, store: Arc<dyn JobStore>, clock: C) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity());
        let budget = Arc::new(MemoryBudget::new(config.memory_pool_bytes, clock.clone()));
        Arc::new(Self {
            config,
            store,
            clock,
            budget,
            jobs: RwLock::new(HashMap::new()),
            tenant_running: Mutex::new(HashMap::new()),
            queue_tx,
            queue_rx: Arc::new(tokio::sync::Mutex::new(queue_rx)),
            executor: RwLock::new(None),
            reader: RwLock::new(None),
            listener_count: RwLock::new(None),
            closed: AtomicBool::new(false),
            started: AtomicBool::new(false),
            shutdown_token: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        })
    }

    // --- dependency injection ---

    pub fn set_executor(&self, executor: Arc<dyn JobExecutor>) {
        *self.executor.write() = Some(executor);
    }

    pub fn set_source_reader(&self, reader: Arc<dyn SourceReader>) {
        *self.reader.write() = Some(reader);
    }

    pub fn set_listener_count(&self, f: ListenerCountFn) {
        *self.listener_count.write() = Some(f);
    }

    /// Launch the worker fleet and the budget sampler. Idempotent; call
    /// after the injection points are wired.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.budget.start_sampler();
        let mut workers = self.workers.lock();
        for worker_id in 0..self.config.max_concurrent_total {
            let pool = Arc::clone(self);
            workers.push(tokio::spawn(async move { pool.worker_loop(worker_id).await }));
        }
        tracing::info!(workers = self.config.max_concurrent_total, "worker pool started");
    }

    pub fn budget(&self) -> &MemoryBudget<C> {
        &self.budget
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // --- spawn ---

    /// Admit a new job, or return the in-flight holder of its unique key.
    pub fn spawn(
        &self,
        tenant: TenantId,
        handler: &str,
        mut config: JobConfig,
    ) -> Result<Arc<Job>, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }

        if !config.unique_key.is_empty() {
            if let Some(existing) = self.find_unique(&tenant, &config.unique_key) {
                tracing::debug!(
                    job = %existing.id,
                    unique_key = %config.unique_key,
                    "spawn deduplicated by unique key"
                );
                return Ok(existing);
            }
        }

        let (running, pending) = self.tenant_load(&tenant);
        if running >= self.config.max_concurrent_per_tenant
            && pending >= self.config.max_queue_depth
        {
            return Err(PoolError::QueueFull(tenant));
        }

        if config.daemon && self.tenant_daemons(&tenant) >= self.config.max_daemons_per_tenant {
            return Err(PoolError::DaemonLimit(tenant));
        }

        if config.memory_bytes == 0 {
            config.memory_bytes = loft_core::config::DEFAULT_MEMORY_BYTES;
        }

        let job = Arc::new(Job::new(tenant, handler, config, self.clock.epoch_ms()));
        self.store.insert(&job.record())?;
        self.jobs.write().insert(job.id, job.clone());

        if let Err(err) = self.enqueue(job.clone()) {
            self.jobs.write().remove(job.id.as_str());
            return Err(err);
        }
        tracing::info!(job = %job.id, tenant = %job.tenant, handler = %job.handler, "job spawned");
        Ok(job)
    }

    /// Spawn from a handler-supplied JSON config value.
    pub fn spawn_value(
        &self,
        tenant: TenantId,
        handler: &str,
        config: &serde_json::Value,
    ) -> Result<Arc<Job>, PoolError> {
        let config = JobConfig::from_value(config, self.config.default_timeout)?;
        self.spawn(tenant, handler, config)
    }

    // --- cancel / get / list / stats ---

    /// Flag a job cancelled and tear down its execution context. A pending
    /// job terminates when a worker next sees it.
    pub fn cancel(&self, id: &str) -> Result<(), PoolError> {
        let job = self
            .jobs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| PoolError::NotFound(id.to_string()))?;
        job.request_cancel();
        tracing::info!(job = %job.id, "job cancel requested");
        Ok(())
    }

    /// Snapshot from memory, falling back to the durable store.
    pub fn get(&self, id: &str) -> Result<JobRecord, PoolError> {
        if let Some(job) = self.jobs.read().get(id) {
            return Ok(job.record());
        }
        self.store
            .load(id)?
            .ok_or_else(|| PoolError::NotFound(id.to_string()))
    }

    /// Persisted rows overlaid with live in-memory state, newest first.
    pub fn list(
        &self,
        tenant: Option<&TenantId>,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, PoolError> {
        let mut by_id: HashMap<String, JobRecord> = HashMap::new();
        let stored = self.store.list(&ListQuery {
            tenant: tenant.map(|t| t.as_str().to_string()),
            status: None,
            limit: 0,
        })?;
        for record in stored {
            by_id.insert(record.id.as_str().to_string(), record);
        }
        for job in self.jobs.read().values() {
            if tenant.is_some_and(|t| job.tenant != *t) {
                continue;
            }
            let record = job.record();
            by_id.insert(record.id.as_str().to_string(), record);
        }

        let mut rows: Vec<JobRecord> = by_id
            .into_values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .collect();
        rows.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
        if limit > 0 {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    pub fn stats(&self) -> PoolStats {
        let jobs = self.jobs.read();
        let mut stats = PoolStats {
            pending: 0,
            running: 0,
            done: 0,
            failed: 0,
            cancelled: 0,
            total: jobs.len(),
            tenants_running: 0,
            memory: self.budget.stats(),
        };
        for job in jobs.values() {
            match job.status() {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Done => stats.done += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
            }
        }
        drop(jobs);
        stats.tenants_running =
            self.tenant_running.lock().values().filter(|n| **n > 0).count();
        stats
    }

    // --- crash recovery ---

    /// Re-queue persisted in-flight daemons. Idempotent: daemons already
    /// held in memory are left alone.
    pub fn restore_daemons(&self) -> Result<usize, PoolError> {
        let mut restored = 0;
        for mut record in self.store.daemons_in_flight()? {
            if self.jobs.read().contains_key(record.id.as_str()) {
                continue;
            }
            // Nothing is running after a restart; the row re-enters the
            // queue with attempt, checkpoint, and restart bookkeeping kept.
            record.status = JobStatus::Pending;
            self.store.update(&record)?;
            let job = Arc::new(Job::from_record(record));
            self.jobs.write().insert(job.id, job.clone());
            self.enqueue(job.clone())?;
            tracing::info!(job = %job.id, tenant = %job.tenant, "daemon restored from store");
            restored += 1;
        }
        Ok(restored)
    }

    // --- shutdown ---

    /// Close the pool, cancel everything in flight, and wait for workers
    /// to drain, bounded by `deadline`. On timeout the workers keep
    /// draining in the background.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), PoolError> {
        self.closed.store(true, Ordering::SeqCst);
        self.shutdown_token.cancel();
        self.budget.close();

        let in_flight: Vec<Arc<Job>> = self
            .jobs
            .read()
            .values()
            .filter(|j| !j.is_terminal())
            .cloned()
            .collect();
        for job in in_flight {
            job.request_cancel();
        }

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        let drain = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        match tokio::time::timeout(deadline, drain).await {
            Ok(()) => {
                tracing::info!("worker pool shut down");
                Ok(())
            }
            Err(_) => {
                tracing::warn!("shutdown deadline exceeded; workers drain in background");
                Err(PoolError::ShutdownTimeout)
            }
        }
    }

    // --- internals shared with dispatch ---

    pub(crate) fn enqueue(&self, job: Arc<Job>) -> Result<(), PoolError> {
        self.queue_tx.try_send(job).map_err(|_| PoolError::QueueUnavailable)
    }

    /// Re-enqueue from a retry/restart/budget timer. Quietly drops the
    /// attempt when the pool has closed; a daemon row stays pending in the
    /// store for the next restore.
    pub(crate) fn re_enqueue(&self, job: Arc<Job>) {
        if self.is_closed() {
            tracing::debug!(job = %job.id, "pool closed; dropping re-enqueue");
            return;
        }
        if self.enqueue(job.clone()).is_err() {
            tracing::error!(job = %job.id, "dispatch queue refused re-enqueue");
        }
    }

    pub(crate) fn remove_job(&self, job: &Job) {
        self.jobs.write().remove(job.id.as_str());
    }

    pub(crate) fn persist(&self, job: &Job) {
        if let Err(err) = self.store.update(&job.record()) {
            tracing::error!(job = %job.id, error = %err, "failed to persist job row");
        }
    }

    pub(crate) fn inc_running(&self, tenant: &TenantId) {
        *self.tenant_running.lock().entry(tenant.clone()).or_insert(0) += 1;
    }

    pub(crate) fn dec_running(&self, tenant: &TenantId) {
        let mut counts = self.tenant_running.lock();
        if let Some(count) = counts.get_mut(tenant) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(tenant);
            }
        }
    }

    fn find_unique(&self, tenant: &TenantId, key: &str) -> Option<Arc<Job>> {
        self.jobs
            .read()
            .values()
            .find(|j| j.tenant == *tenant && j.holds_unique_key(key))
            .cloned()
    }

    /// (running, pending) counts for a tenant.
    fn tenant_load(&self, tenant: &TenantId) -> (usize, usize) {
        let running = self.tenant_running.lock().get(tenant).copied().unwrap_or(0);
        let pending = self
            .jobs
            .read()
            .values()
            .filter(|j| j.tenant == *tenant && j.status() == JobStatus::Pending)
            .count();
        (running, pending)
    }

    fn tenant_daemons(&self, tenant: &TenantId) -> usize {
        self.jobs
            .read()
            .values()
            .filter(|j| j.tenant == *tenant && j.daemon() && j.is_in_flight())
            .count()
    }
}

/// Child-job namespace bridge: handlers reach the pool through this,
/// pinned to their own tenant.
impl<C: Clock> JobSpawner for Pool<C> {
    fn spawn(
        &self,
        tenant: &TenantId,
        handler: &str,
        config: &serde_json::Value,
    ) -> Result<JobRecord, HostError> {
        self.spawn_value(tenant.clone(), handler, config)
            .map(|job| job.record())
            .map_err(|e| HostError::new(e.to_string()))
    }

    fn get(&self, tenant: &TenantId, id: &str) -> Result<Option<JobRecord>, HostError> {
        match Pool::get(self, id) {
            Ok(record) if record.tenant_id == *tenant => Ok(Some(record)),
            Ok(_) | Err(PoolError::NotFound(_)) => Ok(None),
            Err(e) => Err(HostError::new(e.to_string())),
        }
    }

    fn list(
        &self,
        tenant: &TenantId,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, HostError> {
        Pool::list(self, Some(tenant), status, limit).map_err(|e| HostError::new(e.to_string()))
    }

    fn cancel(&self, tenant: &TenantId, id: &str) -> Result<bool, HostError> {
        // Tenant scoping first: a handler can only touch its own jobs.
        match JobSpawner::get(self, tenant, id)? {
            Some(_) => match Pool::cancel(self, id) {
                Ok(()) => Ok(true),
                Err(PoolError::NotFound(_)) => Ok(false),
                Err(e) => Err(HostError::new(e.to_string())),
            },
            None => Ok(false),
        }
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
