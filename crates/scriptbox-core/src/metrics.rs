//! Process-wide atomic counters for script executions.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. on shutdown).

use std::sync::atomic::{AtomicU64, Ordering};

use crate::sandbox::error::ScriptFailure;

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Atomic counters; recording never allocates or locks.
pub struct Metrics {
    executions_started: AtomicU64,
    executions_succeeded: AtomicU64,
    executions_failed: AtomicU64,
    timeouts: AtomicU64,
    memory_exceeded: AtomicU64,
    access_denied: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            executions_started: AtomicU64::new(0),
            executions_succeeded: AtomicU64::new(0),
            executions_failed: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            memory_exceeded: AtomicU64::new(0),
            access_denied: AtomicU64::new(0),
        }
    }

    pub fn inc_started(&self) {
        self.executions_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "executions_started", "counter incremented");
    }

    pub fn inc_succeeded(&self) {
        self.executions_succeeded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "executions_succeeded", "counter incremented");
    }

    /// Count a failed execution, plus the matching per-kind counter.
    pub fn record_failure(&self, failure: &ScriptFailure) {
        self.executions_failed.fetch_add(1, Ordering::Relaxed);
        let specific = match failure {
            ScriptFailure::Timeout { .. } => Some(&self.timeouts),
            ScriptFailure::MemoryExceeded { .. } => Some(&self.memory_exceeded),
            ScriptFailure::AccessDenied { .. } => Some(&self.access_denied),
            _ => None,
        };
        if let Some(counter) = specific {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        tracing::trace!(metric = "executions_failed", kind = %failure.kind(), "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            executions_started = self.executions_started(),
            executions_succeeded = self.executions_succeeded(),
            executions_failed = self.executions_failed(),
            timeouts = self.timeouts(),
            memory_exceeded = self.memory_exceeded(),
            access_denied = self.access_denied(),
        );
    }

    pub fn executions_started(&self) -> u64 {
        self.executions_started.load(Ordering::Relaxed)
    }

    pub fn executions_succeeded(&self) -> u64 {
        self.executions_succeeded.load(Ordering::Relaxed)
    }

    pub fn executions_failed(&self) -> u64 {
        self.executions_failed.load(Ordering::Relaxed)
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub fn memory_exceeded(&self) -> u64 {
        self.memory_exceeded.load(Ordering::Relaxed)
    }

    pub fn access_denied(&self) -> u64 {
        self.access_denied.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for counter in [
            &self.executions_started,
            &self.executions_succeeded,
            &self.executions_failed,
            &self.timeouts,
            &self.memory_exceeded,
            &self.access_denied,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_started();
        m.inc_started();
        m.inc_succeeded();
        assert_eq!(m.executions_started(), 2);
        assert_eq!(m.executions_succeeded(), 1);
    }

    #[test]
    fn failures_are_counted_by_kind() {
        let m = Metrics::new();
        m.record_failure(&ScriptFailure::Timeout {
            elapsed_ms: 201,
            limit_ms: 200,
        });
        m.record_failure(&ScriptFailure::AccessDenied {
            identifier: "host.lang.System".into(),
        });
        m.record_failure(&ScriptFailure::Runtime("boom".into()));
        assert_eq!(m.executions_failed(), 3);
        assert_eq!(m.timeouts(), 1);
        assert_eq!(m.access_denied(), 1);
        assert_eq!(m.memory_exceeded(), 0);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_started();
        m.record_failure(&ScriptFailure::MemoryExceeded {
            used_bytes: 2,
            limit_bytes: 1,
        });
        m.reset();
        assert_eq!(m.executions_started(), 0);
        assert_eq!(m.executions_failed(), 0);
        assert_eq!(m.memory_exceeded(), 0);
    }
}
