// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker command handlers

use crate::exit_error::ExitError;
use crate::output::{format_time_ago, Table};
use clap::{Args, Subcommand};
use loft_core::{short, Clock, JobRecord, JobStatus, SystemClock, TenantId};
use loft_pool::{Pool, PoolError};
use loft_storage::JobStore;
use std::sync::Arc;

/// How many trailing log lines `worker show` prints.
const SHOW_LOG_LINES: usize = 20;

/// Id width in table output. Keeps the type prefix plus enough of the
/// random suffix to stay a unique prefix for `show`/`cancel` lookups.
const ID_DISPLAY_LEN: usize = 16;

#[derive(Args)]
pub struct WorkerArgs {
    #[command(subcommand)]
    pub command: WorkerCommand,
}

#[derive(Subcommand)]
pub enum WorkerCommand {
    /// List jobs
    List {
        /// Only jobs owned by this tenant
        #[arg(long)]
        tenant: Option<String>,
        /// Only jobs in this status (pending/running/done/failed/cancelled)
        #[arg(long)]
        status: Option<String>,
        /// Number of rows to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Show one job, including its recent logs
    Show {
        /// Job id (unique prefixes accepted)
        job_id: String,
    },
    /// Cancel a job
    Cancel {
        /// Job id (unique prefixes accepted)
        job_id: String,
    },
    /// Pool statistics
    Stats,
}

/// What the command handlers run against: the live pool of this process,
/// plus the durable store for rows the pool no longer holds.
pub struct WorkerCtx {
    pub pool: Arc<Pool<SystemClock>>,
    pub store: Arc<dyn JobStore>,
}

/// Execute a command and print its output.
pub fn handle(command: WorkerCommand, ctx: &WorkerCtx) -> Result<(), ExitError> {
    let out = run(command, ctx)?;
    print!("{}", out);
    Ok(())
}

/// Execute a command, returning the rendered output.
pub fn run(command: WorkerCommand, ctx: &WorkerCtx) -> Result<String, ExitError> {
    match command {
        WorkerCommand::List { tenant, status, limit } => list(ctx, tenant, status, limit),
        WorkerCommand::Show { job_id } => show(ctx, &job_id),
        WorkerCommand::Cancel { job_id } => cancel(ctx, &job_id),
        WorkerCommand::Stats => stats(ctx),
    }
}

fn list(
    ctx: &WorkerCtx,
    tenant: Option<String>,
    status: Option<String>,
    limit: usize,
) -> Result<String, ExitError> {
    let status = parse_status(status.as_deref())?;
    let tenant = tenant.map(TenantId::new);
    let rows = ctx
        .pool
        .list(tenant.as_ref(), status, limit)
        .map_err(|e| ExitError::failure(e.to_string()))?;

    if rows.is_empty() {
        return Ok("no jobs\n".to_string());
    }

    let now = SystemClock.epoch_ms();
    let mut table = Table::new(&["ID", "TENANT", "HANDLER", "STATUS", "PROGRESS", "ATTEMPT", "AGE"]);
    for record in rows {
        table.row(vec![
            short(record.id.as_str(), ID_DISPLAY_LEN).to_string(),
            record.tenant_id.to_string(),
            record.handler.clone(),
            record.status.to_string(),
            format!("{:.0}%", record.progress * 100.0),
            record.attempt.to_string(),
            format_time_ago(record.created_at_ms, now),
        ]);
    }
    Ok(table.render())
}

fn show(ctx: &WorkerCtx, job_id: &str) -> Result<String, ExitError> {
    let record = resolve(ctx, job_id)?;
    let now = SystemClock.epoch_ms();

    let mut out = String::new();
    let mut field = |name: &str, value: String| {
        out.push_str(&format!("{:<14} {}\n", name, value));
    };
    field("id", record.id.to_string());
    field("tenant", record.tenant_id.to_string());
    field("handler", record.handler.clone());
    field("status", record.status.to_string());
    field("progress", format!("{:.0}%", record.progress * 100.0));
    field("attempt", format!("{}/{}", record.attempt, record.config.max_attempts));
    field("daemon", record.config.daemon.to_string());
    if record.config.daemon || record.restart_count > 0 {
        field("restarts", record.restart_count.to_string());
    }
    field("created", format_time_ago(record.created_at_ms, now) + " ago");
    if let Some(started) = record.started_at_ms {
        field("started", format_time_ago(started, now) + " ago");
    }
    if let Some(done) = record.done_at_ms {
        field("finished", format_time_ago(done, now) + " ago");
    }
    if let Some(result) = &record.result {
        field("result", result.clone());
    }
    if let Some(error) = &record.error {
        field("error", error.clone());
    }
    if let Some(checkpoint) = &record.checkpoint {
        field("checkpoint", format!("{} bytes", checkpoint.len()));
    }

    if !record.logs.is_empty() {
        out.push_str("\nrecent logs:\n");
        let skip = record.logs.len().saturating_sub(SHOW_LOG_LINES);
        for line in record.logs.iter().skip(skip) {
            out.push_str("  ");
            out.push_str(line);
            out.push('\n');
        }
    }
    Ok(out)
}

fn cancel(ctx: &WorkerCtx, job_id: &str) -> Result<String, ExitError> {
    let record = resolve(ctx, job_id)?;
    let id = record.id.to_string();

    match ctx.pool.cancel(&id) {
        Ok(()) => return Ok(format!("Job {} cancelled\n", id)),
        Err(PoolError::NotFound(_)) => {}
        Err(e) => return Err(ExitError::failure(e.to_string())),
    }

    // Not live in this process: flip the durable row so the job does not
    // come back on the next daemon restore.
    if record.status.is_terminal() {
        return Err(ExitError::failure(format!("job {} is already {}", id, record.status)));
    }
    let mut record = record;
    record.status = JobStatus::Cancelled;
    record.config.daemon = false;
    record.error = Some("job cancelled".to_string());
    record.done_at_ms = Some(SystemClock.epoch_ms());
    ctx.store.update(&record).map_err(|e| ExitError::failure(e.to_string()))?;
    Ok(format!("Job {} cancelled\n", id))
}

fn stats(ctx: &WorkerCtx) -> Result<String, ExitError> {
    let stats = ctx.pool.stats();
    let mut out = String::new();
    let mut field = |name: &str, value: String| {
        out.push_str(&format!("{:<22} {}\n", name, value));
    };
    field("jobs.pending", stats.pending.to_string());
    field("jobs.running", stats.running.to_string());
    field("jobs.done", stats.done.to_string());
    field("jobs.failed", stats.failed.to_string());
    field("jobs.cancelled", stats.cancelled.to_string());
    field("jobs.total", stats.total.to_string());
    field("tenants.running", stats.tenants_running.to_string());
    field("memory.pool_bytes", stats.memory.pool_size.to_string());
    field("memory.allocated", stats.memory.allocated.to_string());
    field("memory.available", stats.memory.available.to_string());
    field("memory.usage", format!("{:.1}%", stats.memory.usage * 100.0));
    Ok(out)
}

fn parse_status(status: Option<&str>) -> Result<Option<JobStatus>, ExitError> {
    match status {
        None => Ok(None),
        Some(s) => JobStatus::parse(s)
            .map(Some)
            .ok_or_else(|| ExitError::failure(format!("unknown status: {}", s))),
    }
}

/// Exact id first, then unique-prefix lookup over all known rows.
fn resolve(ctx: &WorkerCtx, job_id: &str) -> Result<JobRecord, ExitError> {
    match ctx.pool.get(job_id) {
        Ok(record) => return Ok(record),
        Err(PoolError::NotFound(_)) => {}
        Err(e) => return Err(ExitError::failure(e.to_string())),
    }

    let rows = ctx
        .pool
        .list(None, None, 0)
        .map_err(|e| ExitError::failure(e.to_string()))?;
    let mut matches: Vec<JobRecord> =
        rows.into_iter().filter(|r| r.id.as_str().starts_with(job_id)).collect();
    match matches.len() {
        0 => Err(ExitError::not_found(format!("no such job: {}", job_id))),
        1 => Ok(matches.swap_remove(0)),
        n => Err(ExitError::failure(format!("ambiguous job id {} ({} matches)", job_id, n))),
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
