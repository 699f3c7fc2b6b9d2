// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Happy-path job lifecycle specs.

use crate::prelude::*;

#[tokio::test]
async fn happy_path_synchronous_return() {
    let executor = Arc::new(FnExecutor(|_token: CancellationToken, _job: Arc<Job>| async { Ok(json!("ok")) }));
    let (pool, store) = harness(PoolConfig::default(), SystemClock, executor);

    let config = JobConfig {
        memory_bytes: 32 * 1024 * 1024,
        timeout: Timeout::After(Duration::from_secs(5)),
        max_attempts: 1,
        ..JobConfig::default()
    };
    let job = pool.spawn(tenant("a"), "workers/ok", config).unwrap();
    wait_status(&pool, job.id.as_str(), JobStatus::Done).await;

    let record = pool.get(job.id.as_str()).unwrap();
    assert_eq!(record.status, JobStatus::Done);
    assert_eq!(record.progress, 1.0);
    assert_eq!(record.result.as_deref(), Some("ok"));
    assert_eq!(record.attempt, 1);
    assert_eq!(record.error, None);

    // persisted row carries the final status
    let row = store.load(job.id.as_str()).unwrap().unwrap();
    assert_eq!(row.status, JobStatus::Done);

    // terminal non-daemon jobs are evicted from memory
    wait_until(move || pool.stats().total == 0).await;
}

#[tokio::test]
async fn handler_mutations_flow_through_the_engine() {
    let factory = FakeFactory::new(|run| {
        run.call("job", "progress", &[json!(40)])?;
        run.call("console", "log", &[json!("halfway")])?;
        run.call("job", "checkpoint", &[json!({"cursor": 11})])?;
        run.call("storage", "put", &[json!("last-run"), json!("ok")])?;
        Ok(json!({"synced": 3}))
    });
    let (pool, _store) = engine_harness(PoolConfig::default(), factory);

    let job = pool.spawn(tenant("a"), "workers/sync", JobConfig::default()).unwrap();
    wait_status(&pool, job.id.as_str(), JobStatus::Done).await;

    let record = pool.get(job.id.as_str()).unwrap();
    assert_eq!(record.result.as_deref(), Some(r#"{"synced":3}"#));
    assert_eq!(record.progress, 1.0); // done forces full progress
    assert_eq!(record.checkpoint.as_deref(), Some(r#"{"cursor":11}"#));
    assert!(record.logs.iter().any(|l| l.contains("halfway")));
}

#[tokio::test]
async fn handler_error_fails_the_job_with_message() {
    let (pool, _store) =
        engine_harness(PoolConfig::default(), FakeFactory::failing("TypeError: boom"));

    let job = pool.spawn(tenant("a"), "workers/bad", JobConfig::default()).unwrap();
    wait_status(&pool, job.id.as_str(), JobStatus::Failed).await;

    let record = pool.get(job.id.as_str()).unwrap();
    assert_eq!(record.error.as_deref(), Some("TypeError: boom"));
    assert_eq!(record.attempt, 1);
}

#[tokio::test]
async fn child_jobs_spawned_from_handlers_run_too() {
    // the parent handler spawns a child and returns its id
    let factory = FakeFactory::new(|run| {
        if run.source().contains("child") {
            return Ok(json!("child done"));
        }
        let child = run.call("jobs", "spawn", &[json!("workers/child")])?;
        Ok(child["id"].clone())
    });

    let store = Arc::new(MemoryStore::new());
    let pool = Pool::new(PoolConfig::default(), store.clone(), SystemClock);
    // serve distinguishable sources so the scripted engine can branch
    struct PathReader;
    impl SourceReader for PathReader {
        fn read(&self, _tenant: &TenantId, path: &str) -> Result<String, ReadError> {
            Ok(format!("source of {}", path))
        }
    }
    pool.set_source_reader(Arc::new(PathReader));
    let executor = Executor::new(
        factory,
        Arc::new(MemoryKv::new()) as Arc<dyn KvAdapter>,
        pool.clone() as Arc<dyn JobSpawner>,
        SystemClock,
    );
    pool.set_executor(Arc::new(executor));
    pool.start();

    let parent = pool.spawn(tenant("a"), "workers/parent", JobConfig::default()).unwrap();
    wait_status(&pool, parent.id.as_str(), JobStatus::Done).await;

    let child_id = pool.get(parent.id.as_str()).unwrap().result.unwrap();
    wait_status(&pool, &child_id, JobStatus::Done).await;
    let child = pool.get(&child_id).unwrap();
    assert_eq!(child.tenant_id, tenant("a"));
    assert_eq!(child.result.as_deref(), Some("child done"));
}
