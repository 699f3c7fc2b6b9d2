// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Non-daemon retry specs.

use crate::prelude::*;

#[tokio::test(start_paused = true)]
async fn retry_exhaustion_runs_exactly_max_attempts() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let executor = Arc::new(FnExecutor(move |_token: CancellationToken, _job: Arc<Job>| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ExecError::Handler("boom".to_string()))
        }
    }));
    let (pool, _store) = harness(PoolConfig::default(), SystemClock, executor);

    let config = JobConfig {
        max_attempts: 3,
        retry_delay: Duration::from_millis(10),
        ..JobConfig::default()
    };
    let started = tokio::time::Instant::now();
    let job = pool.spawn(tenant("a"), "workers/fail", config).unwrap();
    let id = job.id;

    {
        let calls = calls.clone();
        let pool = pool.clone();
        wait_until(move || {
            calls.load(Ordering::SeqCst) == 3
                && pool.get(id.as_str()).map(|r| r.status == JobStatus::Failed).unwrap_or(false)
        })
        .await;
    }

    let record = pool.get(id.as_str()).unwrap();
    assert_eq!(record.attempt, 3);
    assert!(record.error.unwrap().contains("boom"));

    // two retry delays must have elapsed between the three attempts
    assert!(started.elapsed() >= Duration::from_millis(20));

    // no further dispatch after the final attempt
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(pool.stats().total, 0);
}

#[tokio::test(start_paused = true)]
async fn intermediate_retries_pass_through_pending() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    // first attempt fails, second succeeds
    let executor = Arc::new(FnExecutor(move |_token: CancellationToken, job: Arc<Job>| {
        let counter = counter.clone();
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ExecError::Handler("transient".to_string()))
            } else {
                Ok(json!(format!("attempt {}", job.attempt())))
            }
        }
    }));
    let (pool, _store) = harness(PoolConfig::default(), SystemClock, executor);

    let config = JobConfig {
        max_attempts: 2,
        retry_delay: Duration::from_millis(10),
        ..JobConfig::default()
    };
    let job = pool.spawn(tenant("a"), "workers/flaky", config).unwrap();
    wait_status(&pool, job.id.as_str(), JobStatus::Done).await;

    let record = pool.get(job.id.as_str()).unwrap();
    assert_eq!(record.attempt, 2);
    assert_eq!(record.result.as_deref(), Some("attempt 2"));
    // the failure from attempt 1 was cleared by the successful run
    assert_eq!(record.error, None);
}

#[tokio::test(start_paused = true)]
async fn handler_not_found_still_consumes_attempts() {
    let (pool, _store) = harness(
        PoolConfig::default(),
        SystemClock,
        Arc::new(FnExecutor(|_token: CancellationToken, _job: Arc<Job>| async { Ok(json!(null)) })),
    );
    // replace the reader with one that has no sources
    struct EmptyReader;
    impl SourceReader for EmptyReader {
        fn read(&self, _tenant: &TenantId, path: &str) -> Result<String, ReadError> {
            Err(ReadError::NotFound(path.to_string()))
        }
    }
    pool.set_source_reader(Arc::new(EmptyReader));

    let config = JobConfig {
        max_attempts: 2,
        retry_delay: Duration::from_millis(5),
        ..JobConfig::default()
    };
    let job = pool.spawn(tenant("a"), "workers/ghost", config).unwrap();
    wait_status(&pool, job.id.as_str(), JobStatus::Failed).await;

    let pool_ref = pool.clone();
    let id = job.id;
    wait_until(move || {
        pool_ref
            .get(id.as_str())
            .map(|r| r.status == JobStatus::Failed && r.attempt == 2)
            .unwrap_or(false)
    })
    .await;
    let record = pool.get(job.id.as_str()).unwrap();
    assert!(record.error.unwrap().contains("handler not found"));
}
