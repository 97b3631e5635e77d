//! Per-run atomic counters.
//!
//! Workers bump counters as tuples finish; [`RunCounters::flush`] emits the
//! totals as one `tracing::info!` event at the end of a run. Each run owns
//! its own instance, so concurrent runs never mix their numbers.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for one orchestrator run.
#[derive(Debug, Default)]
pub struct RunCounters {
    dispatched: AtomicU64,
    adapter_failures: AtomicU64,
    parse_failures: AtomicU64,
    scored: AtomicU64,
    retries: AtomicU64,
}

/// Plain copy of [`RunCounters`] at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CounterSnapshot {
    pub dispatched: u64,
    pub adapter_failures: u64,
    pub parse_failures: u64,
    pub scored: u64,
    pub retries: u64,
}

impl RunCounters {
    pub const fn new() -> Self {
        Self {
            dispatched: AtomicU64::new(0),
            adapter_failures: AtomicU64::new(0),
            parse_failures: AtomicU64::new(0),
            scored: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        }
    }

    pub fn inc_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_adapter_failures(&self) {
        self.adapter_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "adapter_failures", "counter incremented");
    }

    pub fn inc_parse_failures(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "parse_failures", "counter incremented");
    }

    pub fn inc_scored(&self) {
        self.scored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_retries(&self, n: u64) {
        if n > 0 {
            self.retries.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            adapter_failures: self.adapter_failures.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            scored: self.scored.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self, run_id: &str) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            run_id = %run_id,
            dispatched = s.dispatched,
            adapter_failures = s.adapter_failures,
            parse_failures = s.parse_failures,
            scored = s.scored,
            retries = s.retries,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let c = RunCounters::new();
        c.inc_dispatched();
        c.inc_dispatched();
        c.inc_adapter_failures();
        c.inc_scored();
        c.add_retries(0);
        c.add_retries(1);
        assert_eq!(
            c.snapshot(),
            CounterSnapshot {
                dispatched: 2,
                adapter_failures: 1,
                parse_failures: 0,
                scored: 1,
                retries: 1,
            }
        );
    }

    #[test]
    fn instances_are_independent() {
        let a = RunCounters::new();
        let b = RunCounters::new();
        a.inc_parse_failures();
        assert_eq!(b.snapshot().parse_failures, 0);
        a.flush("run-a");
    }
}
