// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Admission-control specs: unique keys, fairness caps, budget back-pressure.

use crate::prelude::*;

/// Executor that parks every handler until the gate opens.
fn gated_executor(gate: CancellationToken) -> Arc<dyn JobExecutor> {
    Arc::new(FnExecutor(move |_token: CancellationToken, _job: Arc<Job>| {
        let gate = gate.clone();
        async move {
            gate.cancelled().await;
            Ok(json!("released"))
        }
    }))
}

#[tokio::test]
async fn unique_key_spawns_are_single_flight_until_terminal() {
    let gate = CancellationToken::new();
    let (pool, store) = harness(PoolConfig::default(), SystemClock, gated_executor(gate.clone()));

    let config = JobConfig { unique_key: "u1".into(), ..JobConfig::default() };
    let first = pool.spawn(tenant("a"), "workers/sync", config.clone()).unwrap();
    let second = pool.spawn(tenant("a"), "workers/sync", config.clone()).unwrap();

    // both calls observe the same job; one row, one enqueue
    assert_eq!(first.id, second.id);
    assert_eq!(store.row_count(), 1);

    gate.cancel();
    wait_status(&pool, first.id.as_str(), JobStatus::Done).await;

    // the slot frees once the holder is terminal
    let third = pool.spawn(tenant("a"), "workers/sync", config).unwrap();
    assert_ne!(third.id, first.id);
}

#[tokio::test]
async fn queue_full_rejects_only_when_running_and_pending_caps_hit() {
    let gate = CancellationToken::new();
    // one worker total so later spawns genuinely wait in the queue
    let config = PoolConfig::default()
        .max_concurrent_total(1)
        .max_concurrent_per_tenant(1)
        .max_queue_depth(2);
    let (pool, _store) = harness(config, SystemClock, gated_executor(gate.clone()));

    let running = pool.spawn(tenant("a"), "workers/slow", JobConfig::default()).unwrap();
    wait_status(&pool, running.id.as_str(), JobStatus::Running).await;

    // the queue absorbs up to max_queue_depth pending spawns
    pool.spawn(tenant("a"), "workers/slow", JobConfig::default()).unwrap();
    pool.spawn(tenant("a"), "workers/slow", JobConfig::default()).unwrap();
    let err = pool.spawn(tenant("a"), "workers/slow", JobConfig::default()).unwrap_err();
    assert!(matches!(err, PoolError::QueueFull(_)));

    // another tenant is not affected
    pool.spawn(tenant("b"), "workers/slow", JobConfig::default()).unwrap();

    gate.cancel();
}

#[tokio::test]
async fn daemon_cap_counts_running_and_pending() {
    let gate = CancellationToken::new();
    let config = PoolConfig::default().max_concurrent_per_tenant(1).max_daemons_per_tenant(2);
    let (pool, _store) = harness(config, SystemClock, gated_executor(gate.clone()));

    let daemon = JobConfig { daemon: true, ..JobConfig::default() };
    let first = pool.spawn(tenant("a"), "workers/d1", daemon.clone()).unwrap();
    wait_status(&pool, first.id.as_str(), JobStatus::Running).await;
    pool.spawn(tenant("a"), "workers/d2", daemon.clone()).unwrap();

    let err = pool.spawn(tenant("a"), "workers/d3", daemon.clone()).unwrap_err();
    assert!(matches!(err, PoolError::DaemonLimit(_)));

    gate.cancel();
}

#[tokio::test(start_paused = true)]
async fn budget_back_pressure_requeues_without_failing() {
    let gate = CancellationToken::new();
    let first_call = Arc::new(AtomicBool::new(true));
    let flag = first_call.clone();
    let hold = gate.clone();
    // the first job parks while holding its reservation; later ones return
    let executor = Arc::new(FnExecutor(move |_token: CancellationToken, _job: Arc<Job>| {
        let hold = hold.clone();
        let first = flag.swap(false, Ordering::SeqCst);
        async move {
            if first {
                hold.cancelled().await;
            }
            Ok(json!("ok"))
        }
    }));
    let config = PoolConfig::default().memory_pool_bytes(64 * 1024 * 1024);
    let (pool, _store) = harness(config, SystemClock, executor);

    let big = JobConfig { memory_bytes: 48 * 1024 * 1024, ..JobConfig::default() };
    let holder = pool.spawn(tenant("a"), "workers/big1", big.clone()).unwrap();
    wait_status(&pool, holder.id.as_str(), JobStatus::Running).await;

    let waiter = pool.spawn(tenant("a"), "workers/big2", big).unwrap();

    // the second job cannot fit; it stays pending and is never failed
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(pool.get(waiter.id.as_str()).unwrap().status, JobStatus::Pending);
    assert_eq!(pool.budget().allocated(), 48 * 1024 * 1024);

    gate.cancel();
    wait_status(&pool, waiter.id.as_str(), JobStatus::Done).await;
    wait_until(move || pool.budget().allocated() == 0).await;
}
