// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Idle-listener stop specs.

use crate::prelude::*;
use serde_json::Value;

fn parked_daemon_executor() -> Arc<dyn JobExecutor> {
    Arc::new(FnExecutor(|token: CancellationToken, _job: Arc<Job>| async move {
        token.cancelled().await;
        Err(ExecError::Interrupted)
    }))
}

fn idle_config(timeout: Duration, channel: &str) -> JobConfig {
    JobConfig {
        daemon: true,
        idle_timeout: Some(timeout),
        idle_channel: Some(channel.to_string()),
        ..JobConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn idle_stop_is_a_clean_done_without_restart() {
    let (pool, store) = harness(PoolConfig::default(), SystemClock, parked_daemon_executor());
    pool.set_listener_count(Arc::new(|_, _| 0));

    let job = pool
        .spawn(tenant("a"), "workers/stream", idle_config(Duration::from_millis(500), "ch1"))
        .unwrap();
    wait_status(&pool, job.id.as_str(), JobStatus::Done).await;

    let record = pool.get(job.id.as_str()).unwrap();
    let result: Value = serde_json::from_str(record.result.as_deref().unwrap()).unwrap();
    assert_eq!(result["reason"], json!("idle_timeout"));
    assert_eq!(record.error, None);
    assert!(record
        .logs
        .iter()
        .any(|l| l.contains("No listeners on channel 'ch1'")));

    // clean stop: the daemon flag is dropped and nothing restarts
    assert!(!record.config.daemon);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(pool.stats().total, 0);
    assert_eq!(store.load(job.id.as_str()).unwrap().unwrap().status, JobStatus::Done);
}

#[tokio::test(start_paused = true)]
async fn daemon_with_listeners_keeps_running() {
    let (pool, _store) = harness(PoolConfig::default(), SystemClock, parked_daemon_executor());
    pool.set_listener_count(Arc::new(|_, _| 3));

    let job = pool
        .spawn(tenant("a"), "workers/stream", idle_config(Duration::from_secs(1), "ch1"))
        .unwrap();
    wait_status(&pool, job.id.as_str(), JobStatus::Running).await;

    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(pool.get(job.id.as_str()).unwrap().status, JobStatus::Running);

    pool.cancel(job.id.as_str()).unwrap();
    wait_status(&pool, job.id.as_str(), JobStatus::Cancelled).await;
}

#[tokio::test(start_paused = true)]
async fn idle_inputs_without_listener_fn_do_nothing() {
    let (pool, _store) = harness(PoolConfig::default(), SystemClock, parked_daemon_executor());
    // no listener-count function injected

    let job = pool
        .spawn(tenant("a"), "workers/stream", idle_config(Duration::from_millis(500), "ch1"))
        .unwrap();
    wait_status(&pool, job.id.as_str(), JobStatus::Running).await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(pool.get(job.id.as_str()).unwrap().status, JobStatus::Running);

    pool.cancel(job.id.as_str()).unwrap();
    wait_status(&pool, job.id.as_str(), JobStatus::Cancelled).await;
}
