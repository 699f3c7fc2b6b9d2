// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Idle-listener watcher: stops a running job when its nominated channel
//! has had no subscribers for the configured duration.

use crate::pool::ListenerCountFn;
use loft_core::Job;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub(crate) struct Watch {
    pub job: Arc<Job>,
    pub channel: String,
    pub idle_timeout: Duration,
    pub listener_count: ListenerCountFn,
    pub token: CancellationToken,
    /// Written before the cancel fires; the dispatcher reads it to turn
    /// the stop into a clean `done`.
    pub reason: Arc<Mutex<Option<String>>>,
}

pub(crate) fn check_interval(idle_timeout: Duration) -> Duration {
    (idle_timeout / 6).clamp(Duration::from_secs(1), Duration::from_secs(5))
}

pub(crate) async fn watch(w: Watch) {
    let interval = check_interval(w.idle_timeout);
    let mut idle_since: Option<tokio::time::Instant> = None;
    loop {
        if (w.listener_count)(&w.job.tenant, &w.channel) == 0 {
            let since = *idle_since.get_or_insert_with(tokio::time::Instant::now);
            if since.elapsed() >= w.idle_timeout {
                let reason = format!(
                    "No listeners on channel '{}' for {}, stopping",
                    w.channel,
                    humantime::format_duration(w.idle_timeout)
                );
                tracing::info!(job = %w.job.id, channel = %w.channel, "idle timeout reached");
                *w.reason.lock() = Some(reason);
                w.token.cancel();
                return;
            }
        } else if idle_since.is_some() {
            idle_since = None;
        }
        tokio::select! {
            _ = w.token.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

#[cfg(test)]
#[path = "idle_tests.rs"]
mod tests;
