// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared memory budget with lock-free reservation tracking.
//!
//! `request` is the admission gate every dispatch passes through; a refusal
//! is normal back-pressure, not an error. A background sampler compares the
//! process's observed memory against the tracked reservations and warns on
//! gross divergence; it never changes the counter.

use loft_core::Clock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Usage fraction at which a reservation triggers a warning.
const WARN_LEVEL: f64 = 0.8;

/// Suppression window between high-usage warnings.
const WARN_INTERVAL: Duration = Duration::from_secs(60);

/// How often the sampler reads process memory statistics.
const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Observed RSS beyond this multiple of tracked reservations is reported.
const DIVERGENCE_FACTOR: u64 = 3;

/// Suppression window between divergence warnings.
const DIVERGENCE_WARN_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetStats {
    pub pool_size: u64,
    pub allocated: u64,
    pub available: u64,
    pub usage: f64,
}

pub struct MemoryBudget<C: Clock> {
    pool_size: u64,
    allocated: AtomicU64,
    clock: C,
    last_warn_ms: AtomicU64,
    last_divergence_warn_ms: AtomicU64,
    warn_count: AtomicU64,
    sampler_stop: CancellationToken,
}

impl<C: Clock> MemoryBudget<C> {
    pub fn new(pool_size: u64, clock: C) -> Self {
        Self {
            pool_size,
            allocated: AtomicU64::new(0),
            clock,
            last_warn_ms: AtomicU64::new(0),
            last_divergence_warn_ms: AtomicU64::new(0),
            warn_count: AtomicU64::new(0),
            sampler_stop: CancellationToken::new(),
        }
    }

    /// Atomically reserve `n` bytes. False means the pool cannot hold the
    /// reservation right now; the caller re-queues and retries.
    pub fn request(&self, n: u64) -> bool {
        let mut current = self.allocated.load(Ordering::Relaxed);
        loop {
            let Some(next) = current.checked_add(n) else { return false };
            if next > self.pool_size {
                return false;
            }
            match self.allocated.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
        let usage = self.allocated.load(Ordering::Relaxed) as f64 / self.pool_size as f64;
        if usage >= WARN_LEVEL {
            self.warn_high_usage(usage);
        }
        true
    }

    /// Release `n` bytes, clamping at zero.
    pub fn release(&self, n: u64) {
        let _ = self.allocated.fetch_update(Ordering::AcqRel, Ordering::Relaxed, |current| {
            Some(current.saturating_sub(n))
        });
    }

    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    pub fn available(&self) -> u64 {
        self.pool_size.saturating_sub(self.allocated())
    }

    pub fn pool_size(&self) -> u64 {
        self.pool_size
    }

    pub fn usage(&self) -> f64 {
        self.allocated() as f64 / self.pool_size as f64
    }

    pub fn stats(&self) -> BudgetStats {
        let allocated = self.allocated();
        BudgetStats {
            pool_size: self.pool_size,
            allocated,
            available: self.pool_size.saturating_sub(allocated),
            usage: allocated as f64 / self.pool_size as f64,
        }
    }

    /// Number of high-usage warnings emitted so far.
    pub fn warn_count(&self) -> u64 {
        self.warn_count.load(Ordering::Relaxed)
    }

    /// Stop the background sampler.
    pub fn close(&self) {
        self.sampler_stop.cancel();
    }

    fn warn_high_usage(&self, usage: f64) {
        if !self.warn_gate(&self.last_warn_ms, WARN_INTERVAL) {
            return;
        }
        self.warn_count.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            allocated = self.allocated(),
            pool_size = self.pool_size,
            usage = format!("{:.0}%", usage * 100.0),
            "memory pool usage is high"
        );
    }

    /// One warning per interval; later callers within the window lose the
    /// CAS and stay quiet.
    fn warn_gate(&self, stamp: &AtomicU64, interval: Duration) -> bool {
        let now = self.clock.epoch_ms();
        let last = stamp.load(Ordering::Relaxed);
        if last != 0 && now.saturating_sub(last) < interval.as_millis() as u64 {
            return false;
        }
        stamp.compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed).is_ok()
    }

    /// Start the divergence sampler. Diagnostic only.
    pub fn start_sampler(self: &Arc<Self>) {
        let budget = Arc::clone(self);
        let stop = self.sampler_stop.clone();
        tokio::spawn(async move {
            let mut system = sysinfo::System::new();
            let Ok(pid) = sysinfo::get_current_pid() else {
                tracing::warn!("memory sampler disabled: cannot resolve own pid");
                return;
            };
            loop {
                tokio::select! {
                    _ = stop.cancelled() => return,
                    _ = tokio::time::sleep(SAMPLE_INTERVAL) => {}
                }
                system.refresh_process(pid);
                let Some(process) = system.process(pid) else { continue };
                let rss = process.memory();
                let tracked = budget.allocated();
                if tracked > 0 && rss > tracked.saturating_mul(DIVERGENCE_FACTOR) {
                    budget.warn_divergence(rss, tracked);
                }
            }
        });
    }

    fn warn_divergence(&self, rss: u64, tracked: u64) {
        if !self.warn_gate(&self.last_divergence_warn_ms, DIVERGENCE_WARN_INTERVAL) {
            return;
        }
        tracing::warn!(
            rss,
            tracked,
            "process memory far exceeds tracked reservations"
        );
    }
}

#[cfg(test)]
#[path = "budget_tests.rs"]
mod tests;
