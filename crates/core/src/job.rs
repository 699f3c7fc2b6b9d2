// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job entity, status machine, and the persisted row snapshot.

use crate::config::JobConfig;
use crate::tenant::TenantId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

crate::define_id! {
    /// Unique identifier for a job instance.
    pub struct JobId("job-");
}

/// In-memory log ring size. Older entries are dropped.
pub const MAX_LOG_ENTRIES: usize = 100;

/// Maximum serialized checkpoint size accepted from a handler.
pub const MAX_CHECKPOINT_BYTES: usize = 1024 * 1024;

/// Base delay for a daemon restart; doubles per consecutive restart.
pub const RESTART_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Ceiling for the daemon restart delay.
pub const RESTART_BACKOFF_MAX: Duration = Duration::from_secs(60);

/// A daemon that stayed up this long counts as healthy again; the next
/// restart starts over from the base backoff.
pub const HEALTHY_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the dispatch queue (or for a retry/restart timer).
    Pending,
    /// A worker is executing the handler.
    Running,
    /// Handler returned normally. Terminal.
    Done,
    /// Attempt failed; may re-enter `Pending` via retry or daemon restart.
    Failed,
    /// Explicitly cancelled. Always final.
    Cancelled,
}

impl JobStatus {
    /// Pending or running: counted for fairness caps and unique-key checks.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "done" => Some(JobStatus::Done),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    fn can_become(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (*self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Done)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Failed, Pending)
        )
    }
}

crate::simple_display! {
    JobStatus {
        Pending => "pending",
        Running => "running",
        Done => "done",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

/// Mutable state guarded by the job's internal mutex.
///
/// The scheduler writes status, timestamps, and retry bookkeeping; the
/// handler (through the host glue) writes progress, logs, and checkpoint.
/// Disjoint fields, one lock.
#[derive(Debug, Clone)]
struct JobState {
    status: JobStatus,
    config: JobConfig,
    progress: f64,
    result: Option<String>,
    error: Option<String>,
    logs: VecDeque<String>,
    attempt: u32,
    checkpoint: Option<String>,
    restart_count: u32,
    daemon_backoff: Duration,
    started_at_ms: Option<u64>,
    done_at_ms: Option<u64>,
    last_healthy_at_ms: Option<u64>,
}

/// Raised to the handler when a checkpoint payload exceeds the 1 MiB cap.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("checkpoint exceeds {MAX_CHECKPOINT_BYTES} byte limit ({size} bytes)")]
pub struct CheckpointTooLarge {
    pub size: usize,
}

/// One execution request.
///
/// Shared behind an `Arc` between the in-memory map, the dispatch queue,
/// the worker running it, and any retry/restart timer. Removed from all of
/// them once the scheduler decides the outcome is final.
pub struct Job {
    pub id: JobId,
    pub tenant: TenantId,
    pub handler: String,
    pub created_at_ms: u64,
    state: Mutex<JobState>,
    cancelled: AtomicBool,
    cancel_fn: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("tenant", &self.tenant)
            .field("handler", &self.handler)
            .field("status", &state.status)
            .field("attempt", &state.attempt)
            .finish_non_exhaustive()
    }
}

impl Job {
    /// Create a new pending job with attempt 1.
    pub fn new(
        tenant: TenantId,
        handler: impl Into<String>,
        config: JobConfig,
        now_ms: u64,
    ) -> Self {
        Self {
            id: JobId::new(),
            tenant,
            handler: handler.into(),
            created_at_ms: now_ms,
            state: Mutex::new(JobState {
                status: JobStatus::Pending,
                config,
                progress: 0.0,
                result: None,
                error: None,
                logs: VecDeque::new(),
                attempt: 1,
                checkpoint: None,
                restart_count: 0,
                daemon_backoff: Duration::ZERO,
                started_at_ms: None,
                done_at_ms: None,
                last_healthy_at_ms: None,
            }),
            cancelled: AtomicBool::new(false),
            cancel_fn: Mutex::new(None),
        }
    }

    /// Rebuild an in-memory job from a persisted row.
    ///
    /// Runtime handles (cancel function, cancelled flag) start cleared;
    /// attempt, checkpoint, and restart bookkeeping carry forward.
    pub fn from_record(record: JobRecord) -> Self {
        Self {
            id: record.id,
            tenant: record.tenant_id,
            handler: record.handler,
            created_at_ms: record.created_at_ms,
            state: Mutex::new(JobState {
                status: record.status,
                config: record.config,
                progress: record.progress,
                result: record.result,
                error: record.error,
                logs: record.logs.into(),
                attempt: record.attempt,
                checkpoint: record.checkpoint,
                restart_count: record.restart_count,
                daemon_backoff: Duration::from_millis(record.daemon_backoff_ms),
                started_at_ms: record.started_at_ms,
                done_at_ms: record.done_at_ms,
                last_healthy_at_ms: record.last_healthy_at_ms,
            }),
            cancelled: AtomicBool::new(false),
            cancel_fn: Mutex::new(None),
        }
    }

    /// Snapshot every persisted attribute as a row.
    pub fn record(&self) -> JobRecord {
        let state = self.state.lock();
        JobRecord {
            id: self.id,
            tenant_id: self.tenant.clone(),
            handler: self.handler.clone(),
            status: state.status,
            config: state.config.clone(),
            progress: state.progress,
            result: state.result.clone(),
            error: state.error.clone(),
            logs: state.logs.iter().cloned().collect(),
            checkpoint: state.checkpoint.clone(),
            attempt: state.attempt,
            restart_count: state.restart_count,
            daemon_backoff_ms: state.daemon_backoff.as_millis() as u64,
            created_at_ms: self.created_at_ms,
            started_at_ms: state.started_at_ms,
            done_at_ms: state.done_at_ms,
            last_healthy_at_ms: state.last_healthy_at_ms,
        }
    }

    // --- read accessors ---

    pub fn status(&self) -> JobStatus {
        self.state.lock().status
    }

    pub fn attempt(&self) -> u32 {
        self.state.lock().attempt
    }

    pub fn progress(&self) -> f64 {
        self.state.lock().progress
    }

    pub fn config(&self) -> JobConfig {
        self.state.lock().config.clone()
    }

    pub fn daemon(&self) -> bool {
        self.state.lock().config.daemon
    }

    pub fn memory_bytes(&self) -> u64 {
        self.state.lock().config.memory_bytes
    }

    pub fn is_terminal(&self) -> bool {
        self.state.lock().status.is_terminal()
    }

    pub fn is_in_flight(&self) -> bool {
        self.state.lock().status.is_in_flight()
    }

    /// True when this job holds the single-flight slot for `key`.
    pub fn holds_unique_key(&self, key: &str) -> bool {
        let state = self.state.lock();
        state.status.is_in_flight() && state.config.unique_key == key
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    // --- cancellation plumbing ---

    /// Install the function that tears down the running execution context.
    pub fn install_cancel_fn(&self, f: Box<dyn Fn() + Send + Sync>) {
        *self.cancel_fn.lock() = Some(f);
    }

    pub fn clear_cancel_fn(&self) {
        *self.cancel_fn.lock() = None;
    }

    /// Flip the cancelled flag, fire the installed cancel function, and
    /// clear the daemon flag so no restart is scheduled afterwards.
    pub fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.state.lock().config.daemon = false;
        if let Some(f) = self.cancel_fn.lock().as_ref() {
            f();
        }
    }

    /// Drop the daemon flag (idle-watcher stop: clean stop, no restart).
    pub fn clear_daemon(&self) {
        self.state.lock().config.daemon = false;
    }

    // --- handler-facing mutations ---

    /// Append a log entry with a wall-clock prefix, keeping the last
    /// [`MAX_LOG_ENTRIES`].
    pub fn append_log(&self, now_ms: u64, message: &str) {
        let stamp = chrono::DateTime::from_timestamp_millis(now_ms as i64)
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_default();
        let mut state = self.state.lock();
        state.logs.push_back(format!("[{}] {}", stamp, message));
        while state.logs.len() > MAX_LOG_ENTRIES {
            state.logs.pop_front();
        }
    }

    /// Store progress as a fraction, clamped to [0, 1].
    pub fn set_progress(&self, fraction: f64) {
        let clamped = fraction.clamp(0.0, 1.0);
        self.state.lock().progress = if clamped.is_nan() { 0.0 } else { clamped };
    }

    /// Replace the checkpoint; payloads over 1 MiB are rejected.
    pub fn set_checkpoint(&self, serialized: String) -> Result<(), CheckpointTooLarge> {
        if serialized.len() > MAX_CHECKPOINT_BYTES {
            return Err(CheckpointTooLarge { size: serialized.len() });
        }
        self.state.lock().checkpoint = Some(serialized);
        Ok(())
    }

    pub fn checkpoint(&self) -> Option<String> {
        self.state.lock().checkpoint.clone()
    }

    pub fn logs(&self) -> Vec<String> {
        self.state.lock().logs.iter().cloned().collect()
    }

    // --- scheduler transitions ---
    // Each returns false (state unchanged) when the transition is not in
    // the status machine; the scheduler treats that as a lost race.

    pub fn mark_running(&self, now_ms: u64) -> bool {
        let mut state = self.state.lock();
        if !state.status.can_become(JobStatus::Running) {
            return false;
        }
        state.status = JobStatus::Running;
        state.started_at_ms = Some(now_ms);
        state.error = None;
        state.result = None;
        if state.config.daemon {
            // A daemon's health reference is the start of its current run;
            // outliving HEALTHY_WINDOW resets the restart backoff.
            state.last_healthy_at_ms = Some(now_ms);
        }
        true
    }

    pub fn mark_done(&self, result: String, now_ms: u64) -> bool {
        let mut state = self.state.lock();
        if !state.status.can_become(JobStatus::Done) {
            return false;
        }
        state.status = JobStatus::Done;
        state.progress = 1.0;
        state.result = Some(result);
        state.error = None;
        state.done_at_ms = Some(now_ms);
        true
    }

    pub fn mark_failed(&self, error: String, now_ms: u64) -> bool {
        let mut state = self.state.lock();
        if !state.status.can_become(JobStatus::Failed) {
            return false;
        }
        state.status = JobStatus::Failed;
        state.error = Some(error);
        state.done_at_ms = Some(now_ms);
        true
    }

    pub fn mark_cancelled(&self, now_ms: u64) -> bool {
        let mut state = self.state.lock();
        if !state.status.can_become(JobStatus::Cancelled) {
            return false;
        }
        state.status = JobStatus::Cancelled;
        state.error = Some("job cancelled".to_string());
        state.done_at_ms = Some(now_ms);
        true
    }

    /// Schedule a non-daemon retry: `failed → pending` with the next
    /// attempt number. Refused once `max_attempts` is reached.
    pub fn schedule_retry(&self) -> bool {
        let mut state = self.state.lock();
        if !state.status.can_become(JobStatus::Pending) || state.attempt >= state.config.max_attempts
        {
            return false;
        }
        state.attempt += 1;
        state.status = JobStatus::Pending;
        true
    }

    /// Schedule a daemon restart: `failed → pending` after a backoff.
    ///
    /// Backoff doubles from [`RESTART_BACKOFF_BASE`] per consecutive
    /// restart, clamped to [`RESTART_BACKOFF_MAX`]. A run that lasted
    /// longer than [`HEALTHY_WINDOW`] resets the sequence first. Returns
    /// the delay to wait before re-enqueuing, or `None` when the job is
    /// not an in-flight daemon failure (e.g. cancelled meanwhile).
    pub fn schedule_daemon_restart(&self, now_ms: u64) -> Option<Duration> {
        let mut state = self.state.lock();
        if !state.config.daemon || !state.status.can_become(JobStatus::Pending) {
            return None;
        }
        if let Some(healthy_ms) = state.last_healthy_at_ms {
            if now_ms.saturating_sub(healthy_ms) > HEALTHY_WINDOW.as_millis() as u64 {
                state.restart_count = 0;
            }
        }
        let exponent = state.restart_count.min(6);
        let backoff = RESTART_BACKOFF_BASE
            .saturating_mul(1u32 << exponent)
            .min(RESTART_BACKOFF_MAX);
        state.restart_count += 1;
        state.daemon_backoff = backoff;
        state.status = JobStatus::Pending;
        drop(state);
        // The cancelled flag is reset so the next attempt starts clean.
        self.cancelled.store(false, Ordering::Release);
        Some(backoff)
    }
}

/// Serializable snapshot of every persisted job attribute.
///
/// What the store keeps and what `Get`/`List` hand out; rebuilding a `Job`
/// from it loses only the runtime handles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub tenant_id: TenantId,
    pub handler: String,
    pub status: JobStatus,
    pub config: JobConfig,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
    pub attempt: u32,
    #[serde(default)]
    pub restart_count: u32,
    #[serde(default)]
    pub daemon_backoff_ms: u64,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_healthy_at_ms: Option<u64>,
}

impl JobRecord {
    /// True for rows `restore_daemons` must re-queue after a crash.
    pub fn is_restorable_daemon(&self) -> bool {
        self.config.daemon && self.status.is_in_flight()
    }
}

crate::builder! {
    pub struct JobRecordBuilder => JobRecord {
        into {
            id: JobId = "job-test1",
            tenant_id: TenantId = "tenant-a",
            handler: String = "workers/test",
        }
        set {
            status: JobStatus = JobStatus::Pending,
            config: JobConfig = JobConfig::default(),
            progress: f64 = 0.0,
            logs: Vec<String> = Vec::new(),
            attempt: u32 = 1,
            restart_count: u32 = 0,
            daemon_backoff_ms: u64 = 0,
            created_at_ms: u64 = 1_000_000,
        }
        option {
            result: String = None,
            error: String = None,
            checkpoint: String = None,
            started_at_ms: u64 = None,
            done_at_ms: u64 = None,
            last_healthy_at_ms: u64 = None,
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
