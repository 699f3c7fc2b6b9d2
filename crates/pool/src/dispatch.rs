// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker loop: dequeue, admit against the budget, execute, disposition,
//! and post-completion routing (retry / daemon restart).

use crate::idle;
use crate::pool::Pool;
use loft_core::{Clock, Job, JobConfig, JobStatus};
use loft_host::{ExecError, HostValue};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Pause before re-queueing a job the budget refused.
const BUDGET_RETRY_DELAY: Duration = Duration::from_millis(100);

struct DispatchFailure {
    cancelled: bool,
    message: String,
}

impl DispatchFailure {
    fn failure(message: impl Into<String>) -> Self {
        Self { cancelled: false, message: message.into() }
    }
}

impl<C: Clock> Pool<C> {
    pub(crate) async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        loop {
            let next = tokio::select! {
                _ = self.shutdown_token.cancelled() => break,
                job = async {
                    let mut rx = self.queue_rx.lock().await;
                    rx.recv().await
                } => job,
            };
            match next {
                Some(job) => self.run_job(job, worker_id).await,
                None => break,
            }
        }
        tracing::debug!(worker = worker_id, "worker exited");
    }

    async fn run_job(&self, job: Arc<Job>, worker_id: usize) {
        // Fast path: cancelled while still pending.
        if job.is_cancelled() {
            if job.mark_cancelled(self.clock.epoch_ms()) {
                self.persist(&job);
            }
            self.remove_job(&job);
            return;
        }

        let config = job.config();
        if !self.budget.request(config.memory_bytes) {
            // Normal back-pressure, not a failure: hold briefly, requeue.
            tokio::time::sleep(BUDGET_RETRY_DELAY).await;
            self.re_enqueue(job);
            return;
        }

        self.inc_running(&job.tenant);
        self.execute_admitted(&job, &config, worker_id).await;
        self.route_completion(&job);
        self.budget.release(config.memory_bytes);
        self.dec_running(&job.tenant);
    }

    /// Steps between the budget admission and post-completion routing:
    /// transition to running, wire cancellation/deadline/idle watching,
    /// load the source, invoke the executor, disposition the outcome.
    async fn execute_admitted(&self, job: &Arc<Job>, config: &JobConfig, worker_id: usize) {
        if !job.mark_running(self.clock.epoch_ms()) {
            tracing::warn!(job = %job.id, status = %job.status(), "dispatch lost a status race");
            return;
        }
        self.persist(job);
        tracing::info!(
            job = %job.id,
            tenant = %job.tenant,
            worker = worker_id,
            attempt = job.attempt(),
            "job started"
        );

        let token = self.shutdown_token.child_token();
        {
            let token = token.clone();
            job.install_cancel_fn(Box::new(move || token.cancel()));
        }
        // Close the race with a cancel that landed before the install.
        if job.is_cancelled() {
            token.cancel();
        }

        let deadline_hit = Arc::new(AtomicBool::new(false));
        if let Some(timeout) = config.timeout.as_duration() {
            let token = token.clone();
            let deadline_hit = deadline_hit.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(timeout) => {
                        deadline_hit.store(true, Ordering::SeqCst);
                        token.cancel();
                    }
                }
            });
        }

        let idle_reason: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        if let Some((idle_timeout, channel)) = config.idle_watch() {
            if let Some(listener_count) = self.listener_count.read().clone() {
                tokio::spawn(idle::watch(idle::Watch {
                    job: job.clone(),
                    channel: channel.to_string(),
                    idle_timeout,
                    listener_count,
                    token: token.clone(),
                    reason: idle_reason.clone(),
                }));
            }
        }

        let outcome = self.invoke_executor(job, &token).await;

        let now = self.clock.epoch_ms();
        match outcome {
            Ok(result) => {
                job.mark_done(result, now);
            }
            Err(failure) => {
                if deadline_hit.load(Ordering::SeqCst) {
                    job.append_log(now, "Job timed out");
                    job.mark_failed("timeout exceeded".to_string(), now);
                } else if let Some(reason) = idle_reason.lock().take() {
                    // Idle stop is a clean stop: logged, done, no restart.
                    job.append_log(now, &reason);
                    job.clear_daemon();
                    job.mark_done(r#"{"reason":"idle_timeout"}"#.to_string(), now);
                } else if failure.cancelled || job.is_cancelled() {
                    job.mark_cancelled(now);
                } else {
                    job.mark_failed(failure.message, now);
                }
            }
        }
        job.clear_cancel_fn();
        // Tear down the deadline and idle tasks.
        token.cancel();
        self.persist(job);
    }

    /// Load the handler source and run it; exactly one executor call per
    /// dispatched attempt.
    async fn invoke_executor(
        &self,
        job: &Arc<Job>,
        token: &CancellationToken,
    ) -> Result<String, DispatchFailure> {
        let Some(reader) = self.reader.read().clone() else {
            return Err(DispatchFailure::failure("no source reader configured"));
        };
        let source = reader
            .read(&job.tenant, &job.handler)
            .map_err(|e| DispatchFailure::failure(e.to_string()))?;

        let Some(executor) = self.executor.read().clone() else {
            return Err(DispatchFailure::failure("no executor configured"));
        };
        match executor.execute(token.clone(), job.clone(), source).await {
            Ok(value) => Ok(serialize_result(value)),
            Err(err @ ExecError::Cancelled) => {
                Err(DispatchFailure { cancelled: true, message: err.to_string() })
            }
            Err(err) => Err(DispatchFailure::failure(err.to_string())),
        }
    }

    fn route_completion(&self, job: &Arc<Job>) {
        match job.status() {
            JobStatus::Failed => self.route_failure(job),
            JobStatus::Done | JobStatus::Cancelled => self.remove_job(job),
            // A lost status race left the job untouched; nothing to route.
            _ => {}
        }
    }

    fn route_failure(&self, job: &Arc<Job>) {
        if job.daemon() {
            if let Some(backoff) = job.schedule_daemon_restart(self.clock.epoch_ms()) {
                self.persist(job);
                tracing::info!(
                    job = %job.id,
                    backoff_ms = backoff.as_millis() as u64,
                    "daemon restart scheduled"
                );
                self.requeue_after(job.clone(), backoff);
                return;
            }
            self.remove_job(job);
        } else if job.schedule_retry() {
            let delay = job.config().retry_delay;
            self.persist(job);
            tracing::info!(
                job = %job.id,
                attempt = job.attempt(),
                delay_ms = delay.as_millis() as u64,
                "retry scheduled"
            );
            self.requeue_after(job.clone(), delay);
        } else {
            tracing::info!(job = %job.id, attempt = job.attempt(), "attempts exhausted");
            self.remove_job(job);
        }
    }

    /// Put the job back on the queue after `delay`, unless the pool shuts
    /// down first (the pending row then waits for the next restore).
    fn requeue_after(&self, job: Arc<Job>, delay: Duration) {
        let tx = self.queue_tx.clone();
        let shutdown = self.shutdown_token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if tx.try_send(job).is_err() {
                        tracing::error!("dispatch queue refused a timed re-enqueue");
                    }
                }
            }
        });
    }
}

/// Strings are stored bare; everything else keeps its JSON form.
fn serialize_result(value: HostValue) -> String {
    match value {
        HostValue::String(s) => s,
        other => other.to_string(),
    }
}
