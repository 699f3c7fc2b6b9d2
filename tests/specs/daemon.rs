// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon restart and backoff specs.

use crate::prelude::*;

fn crashing_executor(calls: Arc<AtomicU32>) -> Arc<dyn JobExecutor> {
    Arc::new(FnExecutor(move |_token: CancellationToken, _job: Arc<Job>| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ExecError::Handler("crash".to_string()))
        }
    }))
}

#[tokio::test(start_paused = true)]
async fn restart_backoff_doubles_per_consecutive_failure() {
    let calls = Arc::new(AtomicU32::new(0));
    let (pool, _store) =
        harness(PoolConfig::default(), SystemClock, crashing_executor(calls.clone()));

    let config = JobConfig { daemon: true, ..JobConfig::default() };
    let job = pool.spawn(tenant("a"), "workers/day", config).unwrap();
    let id = job.id;

    for (failures, backoff_ms) in [(1, 1_000), (2, 2_000), (3, 4_000), (4, 8_000), (5, 16_000)] {
        let pool = pool.clone();
        wait_until(move || {
            pool.get(id.as_str())
                .map(|r| r.restart_count == failures && r.daemon_backoff_ms == backoff_ms)
                .unwrap_or(false)
        })
        .await;
    }

    // restarts do not consume retry attempts
    assert_eq!(pool.get(id.as_str()).unwrap().attempt, 1);
    assert!(calls.load(Ordering::SeqCst) >= 5);
}

#[tokio::test(start_paused = true)]
async fn healthy_window_resets_the_backoff_sequence() {
    let clock = FakeClock::new();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let handler_clock = clock.clone();
    // five quick crashes, then a long healthy run, then another crash
    let executor = Arc::new(FnExecutor(move |_token: CancellationToken, _job: Arc<Job>| {
        let counter = counter.clone();
        let clock = handler_clock.clone();
        async move {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if call == 6 {
                // the sixth run stays up well past the healthy window
                clock.advance(Duration::from_secs(6 * 60));
            }
            Err(ExecError::Handler("crash".to_string()))
        }
    }));
    let (pool, _store) = harness(PoolConfig::default(), clock, executor);

    let config = JobConfig { daemon: true, ..JobConfig::default() };
    let job = pool.spawn(tenant("a"), "workers/day", config).unwrap();
    let id = job.id;

    {
        let pool = pool.clone();
        wait_until(move || {
            pool.get(id.as_str()).map(|r| r.restart_count == 5).unwrap_or(false)
        })
        .await;
    }

    // after the healthy run the sequence starts over at the base delay
    {
        let pool = pool.clone();
        let calls = calls.clone();
        wait_until(move || {
            calls.load(Ordering::SeqCst) >= 6
                && pool
                    .get(id.as_str())
                    .map(|r| r.restart_count == 1 && r.daemon_backoff_ms == 1_000)
                    .unwrap_or(false)
        })
        .await;
    }
}

#[tokio::test(start_paused = true)]
async fn cancelled_daemon_is_not_restarted() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    // a daemon that runs until its context is torn down
    let executor = Arc::new(FnExecutor(move |token: CancellationToken, _job: Arc<Job>| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            token.cancelled().await;
            Err(ExecError::Cancelled)
        }
    }));
    let (pool, store) = harness(PoolConfig::default(), SystemClock, executor);

    let config = JobConfig { daemon: true, ..JobConfig::default() };
    let job = pool.spawn(tenant("a"), "workers/day", config).unwrap();
    wait_status(&pool, job.id.as_str(), JobStatus::Running).await;

    pool.cancel(job.id.as_str()).unwrap();
    wait_status(&pool, job.id.as_str(), JobStatus::Cancelled).await;

    // give any (incorrect) restart a chance to fire
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let row = store.load(job.id.as_str()).unwrap().unwrap();
    assert_eq!(row.status, JobStatus::Cancelled);
    assert!(!row.config.daemon);
    assert!(row.error.unwrap().contains("cancelled"));
}
