// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI specs against a live pool.

use crate::prelude::*;
use loft::commands::worker::{run, WorkerCommand, WorkerCtx};

fn worker_ctx(
    pool: Arc<Pool<SystemClock>>,
    store: Arc<MemoryStore>,
) -> WorkerCtx {
    WorkerCtx { pool, store }
}

#[tokio::test]
async fn list_show_and_stats_reflect_finished_work() {
    let executor = Arc::new(FnExecutor(|_token: CancellationToken, _job: Arc<Job>| async {
        Ok(json!("synced"))
    }));
    let (pool, store) = harness(PoolConfig::default(), SystemClock, executor);

    let job = pool.spawn(tenant("alpha"), "workers/sync", JobConfig::default()).unwrap();
    wait_status(&pool, job.id.as_str(), JobStatus::Done).await;
    let ctx = worker_ctx(pool, store);

    let list = run(
        WorkerCommand::List { tenant: Some("alpha".into()), status: None, limit: 20 },
        &ctx,
    )
    .unwrap();
    assert!(list.contains("workers/sync"));
    assert!(list.contains("done"));
    assert!(list.contains("100%"));

    let show = run(WorkerCommand::Show { job_id: job.id.to_string() }, &ctx).unwrap();
    assert!(show.contains("synced"));
    assert!(show.contains("done"));

    let stats = run(WorkerCommand::Stats, &ctx).unwrap();
    assert!(stats.contains("jobs.total"));
    assert!(stats.contains("memory.pool_bytes"));
}

#[tokio::test]
async fn cancel_through_the_cli_stops_a_running_job() {
    let executor = Arc::new(FnExecutor(|token: CancellationToken, _job: Arc<Job>| async move {
        token.cancelled().await;
        Err(ExecError::Cancelled)
    }));
    let (pool, store) = harness(PoolConfig::default(), SystemClock, executor);

    let job = pool.spawn(tenant("alpha"), "workers/slow", JobConfig::default()).unwrap();
    wait_status(&pool, job.id.as_str(), JobStatus::Running).await;

    let ctx = worker_ctx(pool.clone(), store);
    let out = run(WorkerCommand::Cancel { job_id: job.id.to_string() }, &ctx).unwrap();
    assert!(out.contains("cancelled"));

    wait_status(&pool, job.id.as_str(), JobStatus::Cancelled).await;
}
