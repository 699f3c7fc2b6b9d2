// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared harness for the workspace specs.

pub use loft_core::{
    Clock, FakeClock, Job, JobConfig, JobRecord, JobStatus, SystemClock, TenantId, Timeout,
};
pub use loft_host::{
    EngineError, ExecError, Executor, FakeFactory, FakeRun, HostValue, JobExecutor, JobSpawner,
    KvAdapter, MemoryKv, ReadError, SourceReader,
};
pub use loft_pool::{Pool, PoolConfig, PoolError};
pub use loft_storage::{JobStore, MemoryStore};
pub use serde_json::json;
pub use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
pub use std::sync::Arc;
pub use std::time::Duration;
pub use tokio_util::sync::CancellationToken;

/// Executor built from an async closure; what most scenarios inject.
pub struct FnExecutor<F>(pub F);

#[async_trait::async_trait]
impl<F, Fut> JobExecutor for FnExecutor<F>
where
    F: Fn(CancellationToken, Arc<Job>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<HostValue, ExecError>> + Send + 'static,
{
    async fn execute(
        &self,
        token: CancellationToken,
        job: Arc<Job>,
        _source: String,
    ) -> Result<HostValue, ExecError> {
        (self.0)(token, job).await
    }
}

/// Reader that serves the same source for every handler path.
pub struct StaticReader;

impl SourceReader for StaticReader {
    fn read(&self, _tenant: &TenantId, _path: &str) -> Result<String, ReadError> {
        Ok("handler source".to_string())
    }
}

/// Started pool over a fresh in-memory store with the given executor.
pub fn harness<C: Clock>(
    config: PoolConfig,
    clock: C,
    executor: Arc<dyn JobExecutor>,
) -> (Arc<Pool<C>>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let pool = Pool::new(config, store.clone(), clock);
    pool.set_source_reader(Arc::new(StaticReader));
    pool.set_executor(executor);
    pool.start();
    (pool, store)
}

/// Started pool wired through the real host glue: a scripted engine
/// factory, an in-memory kv namespace, and the pool itself as the
/// child-job spawner.
pub fn engine_harness(
    config: PoolConfig,
    factory: FakeFactory,
) -> (Arc<Pool<SystemClock>>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let pool = Pool::new(config, store.clone(), SystemClock);
    pool.set_source_reader(Arc::new(StaticReader));
    let executor = Executor::new(
        factory,
        Arc::new(MemoryKv::new()) as Arc<dyn KvAdapter>,
        pool.clone() as Arc<dyn JobSpawner>,
        SystemClock,
    );
    pool.set_executor(Arc::new(executor));
    pool.start();
    (pool, store)
}

pub fn tenant(name: &str) -> TenantId {
    TenantId::new(name)
}

/// Poll until the predicate holds; panics after ~20 (possibly simulated)
/// seconds.
pub async fn wait_until(pred: impl Fn() -> bool) {
    for _ in 0..4000 {
        if pred() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// Poll until the job's observable status matches.
pub async fn wait_status<C: Clock>(pool: &Arc<Pool<C>>, id: &str, status: JobStatus) {
    let pool = pool.clone();
    let id = id.to_string();
    wait_until(move || {
        pool.get(&id).map(|record| record.status == status).unwrap_or(false)
    })
    .await;
}
