//! Process-wide orchestration counters.
//!
//! Incremented at the call site; [`Metrics::flush`] emits every value as a
//! single `info!` event, typically when a session finishes.

use std::sync::atomic::{AtomicU64, Ordering};

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    tasks_dispatched: AtomicU64,
    task_timeouts: AtomicU64,
    task_failures: AtomicU64,
    retries: AtomicU64,
    checkpoints_written: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn bump(counter: &AtomicU64, name: &'static str) {
    counter.fetch_add(1, Ordering::Relaxed);
    tracing::trace!(metric = name, "counter incremented");
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            tasks_dispatched: AtomicU64::new(0),
            task_timeouts: AtomicU64::new(0),
            task_failures: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            checkpoints_written: AtomicU64::new(0),
        }
    }

    pub fn inc_tasks_dispatched(&self) {
        bump(&self.tasks_dispatched, "tasks_dispatched");
    }

    pub fn inc_task_timeouts(&self) {
        bump(&self.task_timeouts, "task_timeouts");
    }

    /// Worker errors and aborted worker tasks; timeouts are counted separately.
    pub fn inc_task_failures(&self) {
        bump(&self.task_failures, "task_failures");
    }

    pub fn inc_retries(&self) {
        bump(&self.retries, "retries");
    }

    pub fn inc_checkpoints_written(&self) {
        bump(&self.checkpoints_written, "checkpoints_written");
    }

    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            tasks_dispatched = self.tasks_dispatched(),
            task_timeouts = self.task_timeouts(),
            task_failures = self.task_failures(),
            retries = self.retries(),
            checkpoints_written = self.checkpoints_written(),
        );
    }

    pub fn tasks_dispatched(&self) -> u64 {
        self.tasks_dispatched.load(Ordering::Relaxed)
    }

    pub fn task_timeouts(&self) -> u64 {
        self.task_timeouts.load(Ordering::Relaxed)
    }

    pub fn task_failures(&self) -> u64 {
        self.task_failures.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn checkpoints_written(&self) -> u64 {
        self.checkpoints_written.load(Ordering::Relaxed)
    }

    /// Zero every counter (tests).
    pub fn reset(&self) {
        for counter in [
            &self.tasks_dispatched,
            &self.task_timeouts,
            &self.task_failures,
            &self.retries,
            &self.checkpoints_written,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
