// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host glue between a dispatched job and a scripting-engine instance.
//!
//! One [`Executor::execute`] call per attempt: build an isolated engine,
//! bind the job-facing API and the tenant-scoped namespaces, run the
//! handler source on a blocking thread, and translate the outcome.

use crate::adapters::{JobSpawner, KvAdapter};
use crate::script::{
    EngineError, EngineFactory, HostError, HostValue, InterruptHandle, ScriptEngine,
};
use async_trait::async_trait;
use loft_core::{Clock, Job, JobStatus, TenantId};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Poll cadence for `jobs.wait`.
const WAIT_POLL: Duration = Duration::from_millis(50);

/// Default deadline for `jobs.wait` when the script passes none.
const WAIT_DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Chunk size for the synchronous sleep helper; bounds how stale the
/// interrupt check can get inside one host call.
const SLEEP_CHUNK: Duration = Duration::from_millis(10);

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Interrupted and the job's cancelled flag was set.
    #[error("job cancelled")]
    Cancelled,
    /// Interrupted without the cancelled flag (deadline or shutdown).
    #[error("job interrupted")]
    Interrupted,
    /// The handler threw or panicked; message carried verbatim.
    #[error("{0}")]
    Handler(String),
    /// The engine itself could not be constructed or run.
    #[error("engine error: {0}")]
    Engine(String),
}

/// The one call the scheduler makes into tenant code.
#[async_trait]
pub trait JobExecutor: Send + Sync + 'static {
    async fn execute(
        &self,
        token: CancellationToken,
        job: Arc<Job>,
        source: String,
    ) -> Result<HostValue, ExecError>;
}

pub struct Executor<F: EngineFactory, C: Clock> {
    factory: F,
    kv: Arc<dyn KvAdapter>,
    spawner: Arc<dyn JobSpawner>,
    clock: C,
}

impl<F: EngineFactory, C: Clock> Executor<F, C> {
    pub fn new(factory: F, kv: Arc<dyn KvAdapter>, spawner: Arc<dyn JobSpawner>, clock: C) -> Self {
        Self { factory, kv, spawner, clock }
    }

    fn bind_all(&self, engine: &mut F::Engine, job: &Arc<Job>) {
        let interrupt = engine.interrupt_handle();
        let config = job.config();

        // console: visible to the tenant in job logs, and to the operator
        // through the diagnostic sink.
        {
            let job = job.clone();
            let clock = self.clock.clone();
            engine.bind_fn(
                "console",
                "log",
                Box::new(move |args| {
                    let line = join_log_args(args);
                    tracing::info!(job = %job.id, tenant = %job.tenant, "{}", line);
                    job.append_log(clock.epoch_ms(), &line);
                    Ok(HostValue::Null)
                }),
            );
        }

        // loft.sleep(ms): blocking from the handler's point of view.
        {
            let interrupt = interrupt.clone();
            engine.bind_fn(
                "loft",
                "sleep",
                Box::new(move |args| {
                    let ms = arg_u64(args, 0, "sleep(ms)")?;
                    let deadline = Duration::from_millis(ms);
                    let mut slept = Duration::ZERO;
                    while slept < deadline && !interrupt.fired() {
                        let chunk = SLEEP_CHUNK.min(deadline - slept);
                        std::thread::sleep(chunk);
                        slept += chunk;
                    }
                    Ok(HostValue::Null)
                }),
            );
        }

        // job: the handler-facing view of its own run.
        engine.bind_value("job", "id", HostValue::String(job.id.to_string()));
        engine.bind_value("job", "data", config.data.clone());
        engine.bind_value("job", "attempt", job.attempt().into());
        engine.bind_value("job", "memory", config.memory_bytes.into());
        engine.bind_value("job", "daemon", config.daemon.into());
        {
            let job = job.clone();
            engine.bind_fn(
                "job",
                "cancelled",
                Box::new(move |_| Ok(HostValue::Bool(job.is_cancelled()))),
            );
        }
        {
            let job = job.clone();
            engine.bind_fn(
                "job",
                "progress",
                Box::new(move |args| {
                    let percent = arg_f64(args, 0, "progress(percent)")?;
                    job.set_progress(percent / 100.0);
                    Ok(HostValue::Null)
                }),
            );
        }
        {
            let job = job.clone();
            let clock = self.clock.clone();
            engine.bind_fn(
                "job",
                "log",
                Box::new(move |args| {
                    let line = join_log_args(args);
                    job.append_log(clock.epoch_ms(), &line);
                    Ok(HostValue::Null)
                }),
            );
        }
        {
            let job = job.clone();
            engine.bind_fn(
                "job",
                "checkpoint",
                Box::new(move |args| match args.first() {
                    // Zero-arg call: previous checkpoint as a parsed value.
                    None => Ok(job
                        .checkpoint()
                        .and_then(|text| serde_json::from_str(&text).ok())
                        .unwrap_or(HostValue::Null)),
                    Some(value) => {
                        let serialized = value.to_string();
                        job.set_checkpoint(serialized).map_err(|e| HostError::new(e.to_string()))?;
                        Ok(HostValue::Null)
                    }
                }),
            );
        }

        self.bind_storage(engine, &job.tenant);
        self.bind_jobs(engine, &job.tenant, &interrupt);
    }

    fn bind_storage(&self, engine: &mut F::Engine, tenant: &TenantId) {
        {
            let kv = self.kv.clone();
            let tenant = tenant.clone();
            engine.bind_fn(
                "storage",
                "get",
                Box::new(move |args| {
                    let key = arg_str(args, 0, "get(key)")?;
                    Ok(kv.get(&tenant, key)?.unwrap_or(HostValue::Null))
                }),
            );
        }
        {
            let kv = self.kv.clone();
            let tenant = tenant.clone();
            engine.bind_fn(
                "storage",
                "put",
                Box::new(move |args| {
                    let key = arg_str(args, 0, "put(key, value)")?;
                    let value = args.get(1).cloned().unwrap_or(HostValue::Null);
                    kv.put(&tenant, key, value)?;
                    Ok(HostValue::Null)
                }),
            );
        }
        {
            let kv = self.kv.clone();
            let tenant = tenant.clone();
            engine.bind_fn(
                "storage",
                "delete",
                Box::new(move |args| {
                    let key = arg_str(args, 0, "delete(key)")?;
                    kv.delete(&tenant, key)?;
                    Ok(HostValue::Null)
                }),
            );
        }
        {
            let kv = self.kv.clone();
            let tenant = tenant.clone();
            engine.bind_fn(
                "storage",
                "list",
                Box::new(move |args| {
                    let prefix = args.first().and_then(|v| v.as_str()).unwrap_or("");
                    let keys = kv.list(&tenant, prefix)?;
                    Ok(HostValue::Array(keys.into_iter().map(HostValue::String).collect()))
                }),
            );
        }
    }

    fn bind_jobs(&self, engine: &mut F::Engine, tenant: &TenantId, interrupt: &InterruptHandle) {
        {
            let spawner = self.spawner.clone();
            let tenant = tenant.clone();
            engine.bind_fn(
                "jobs",
                "spawn",
                Box::new(move |args| {
                    let handler = arg_str(args, 0, "spawn(handler, config?)")?;
                    let config = args.get(1).cloned().unwrap_or(HostValue::Null);
                    let record = spawner.spawn(&tenant, handler, &config)?;
                    record_value(&record)
                }),
            );
        }
        {
            let spawner = self.spawner.clone();
            let tenant = tenant.clone();
            engine.bind_fn(
                "jobs",
                "get",
                Box::new(move |args| {
                    let id = arg_str(args, 0, "get(job_id)")?;
                    match spawner.get(&tenant, id)? {
                        Some(record) => record_value(&record),
                        None => Ok(HostValue::Null),
                    }
                }),
            );
        }
        {
            let spawner = self.spawner.clone();
            let tenant = tenant.clone();
            engine.bind_fn(
                "jobs",
                "list",
                Box::new(move |args| {
                    let status = match args.first().and_then(|v| v.as_str()) {
                        Some(s) => Some(
                            JobStatus::parse(s)
                                .ok_or_else(|| HostError::new(format!("unknown status {:?}", s)))?,
                        ),
                        None => None,
                    };
                    let limit = args.get(1).and_then(|v| v.as_u64()).unwrap_or(0) as usize;
                    let records = spawner.list(&tenant, status, limit)?;
                    let values: Result<Vec<_>, _> =
                        records.iter().map(record_value).collect();
                    Ok(HostValue::Array(values?))
                }),
            );
        }
        {
            let spawner = self.spawner.clone();
            let tenant = tenant.clone();
            engine.bind_fn(
                "jobs",
                "cancel",
                Box::new(move |args| {
                    let id = arg_str(args, 0, "cancel(job_id)")?;
                    Ok(HostValue::Bool(spawner.cancel(&tenant, id)?))
                }),
            );
        }
        {
            let spawner = self.spawner.clone();
            let tenant = tenant.clone();
            let interrupt = interrupt.clone();
            engine.bind_fn(
                "jobs",
                "wait",
                Box::new(move |args| {
                    let id = arg_str(args, 0, "wait(job_id, timeout_ms?)")?;
                    let timeout = args
                        .get(1)
                        .and_then(|v| v.as_u64())
                        .map(Duration::from_millis)
                        .unwrap_or(WAIT_DEFAULT_TIMEOUT);
                    let mut waited = Duration::ZERO;
                    loop {
                        let record = spawner
                            .get(&tenant, id)?
                            .ok_or_else(|| HostError::new(format!("no such job: {}", id)))?;
                        if record.status.is_terminal() {
                            return record_value(&record);
                        }
                        if interrupt.fired() {
                            return Err(HostError::new("wait interrupted"));
                        }
                        if waited >= timeout {
                            return Err(HostError::new(format!(
                                "timed out waiting for job {}",
                                id
                            )));
                        }
                        std::thread::sleep(WAIT_POLL);
                        waited += WAIT_POLL;
                    }
                }),
            );
        }
    }
}

#[async_trait]
impl<F: EngineFactory, C: Clock> JobExecutor for Executor<F, C> {
    async fn execute(
        &self,
        token: CancellationToken,
        job: Arc<Job>,
        source: String,
    ) -> Result<HostValue, ExecError> {
        let mut engine = self.factory.create().map_err(|e| ExecError::Engine(e.to_string()))?;
        self.bind_all(&mut engine, &job);

        // Cancellation reaches the engine as an interrupt.
        let interrupt = engine.interrupt_handle();
        let watcher = tokio::spawn({
            let token = token.clone();
            async move {
                token.cancelled().await;
                interrupt.fire();
            }
        });

        let evaluated =
            tokio::task::spawn_blocking(move || engine.eval(&source)).await;
        watcher.abort();

        match evaluated {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(EngineError::Interrupted)) => {
                if job.is_cancelled() {
                    Err(ExecError::Cancelled)
                } else {
                    Err(ExecError::Interrupted)
                }
            }
            Ok(Err(EngineError::Script(message))) => Err(ExecError::Handler(message)),
            // The blocking task died: a panic inside handler glue is
            // reported as a handler error, never propagated.
            Err(join_err) => Err(ExecError::Handler(format!("handler panicked: {}", join_err))),
        }
    }
}

fn record_value(record: &loft_core::JobRecord) -> Result<HostValue, HostError> {
    serde_json::to_value(record).map_err(|e| HostError::new(e.to_string()))
}

fn join_log_args(args: &[HostValue]) -> String {
    args.iter()
        .map(|v| match v {
            HostValue::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn arg_str<'a>(args: &'a [HostValue], index: usize, what: &str) -> Result<&'a str, HostError> {
    args.get(index)
        .and_then(|v| v.as_str())
        .ok_or_else(|| HostError::new(format!("{}: expected string argument {}", what, index)))
}

fn arg_u64(args: &[HostValue], index: usize, what: &str) -> Result<u64, HostError> {
    args.get(index)
        .and_then(|v| v.as_u64())
        .ok_or_else(|| HostError::new(format!("{}: expected integer argument {}", what, index)))
}

fn arg_f64(args: &[HostValue], index: usize, what: &str) -> Result<f64, HostError> {
    args.get(index)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HostError::new(format!("{}: expected number argument {}", what, index)))
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
