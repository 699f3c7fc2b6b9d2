// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cancellation specs, driven through the full engine glue.

use crate::prelude::*;

#[tokio::test]
async fn cancelling_a_running_job_interrupts_promptly() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    // a handler that loops forever in small sleep steps
    let factory = FakeFactory::new(move |run| {
        counter.fetch_add(1, Ordering::SeqCst);
        loop {
            run.call("loft", "sleep", &[json!(5)])?;
        }
    });
    let (pool, store) = engine_harness(PoolConfig::default(), factory);

    let config = JobConfig { daemon: true, ..JobConfig::default() };
    let job = pool.spawn(tenant("a"), "workers/loop", config).unwrap();
    wait_status(&pool, job.id.as_str(), JobStatus::Running).await;

    let cancelled_at = std::time::Instant::now();
    pool.cancel(job.id.as_str()).unwrap();
    wait_status(&pool, job.id.as_str(), JobStatus::Cancelled).await;
    // the interrupt lands within one scheduling step of the handler
    assert!(cancelled_at.elapsed() < Duration::from_millis(500));

    let record = pool.get(job.id.as_str()).unwrap();
    assert!(record.error.unwrap().contains("cancelled"));
    // the daemon flag was cleared: no restart happens
    assert!(!record.config.daemon);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let row = store.load(job.id.as_str()).unwrap().unwrap();
    assert_eq!(row.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn cancelling_a_pending_job_terminates_it_without_running() {
    let gate = CancellationToken::new();
    let hold = gate.clone();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let executor = Arc::new(FnExecutor(move |_token: CancellationToken, _job: Arc<Job>| {
        let hold = hold.clone();
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
            hold.cancelled().await;
            Ok(json!("released"))
        }
    }));
    let (pool, _store) =
        harness(PoolConfig::default().max_concurrent_total(1), SystemClock, executor);

    let running = pool.spawn(tenant("a"), "workers/slow", JobConfig::default()).unwrap();
    wait_status(&pool, running.id.as_str(), JobStatus::Running).await;
    let queued = pool.spawn(tenant("a"), "workers/slow", JobConfig::default()).unwrap();

    pool.cancel(queued.id.as_str()).unwrap();
    gate.cancel();

    wait_status(&pool, queued.id.as_str(), JobStatus::Cancelled).await;
    // only the first job ever reached the executor
    wait_status(&pool, running.id.as_str(), JobStatus::Done).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
