//! Execution budget: wall-clock timeout and memory ceiling, checked on an
//! instruction-count cadence.
//!
//! The evaluator calls [`BudgetMonitor::tick`] once per evaluated node. Every
//! `instruction_threshold` ticks the monitor samples the clock and the heap
//! meter; a tight CPU loop is therefore checked deterministically no matter
//! how slow or fast each instruction is. Allocation sites additionally call
//! [`BudgetMonitor::ensure_can_allocate`] so a single huge allocation cannot
//! slip past the cadence.

use std::rc::Rc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::error::{SandboxResult, ScriptFailure};
use crate::lang::heap::HeapMeter;

/// Default wall-clock budget.
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
/// Default memory budget (10 MiB).
pub const DEFAULT_MAX_MEMORY_BYTES: u64 = 10 * 1024 * 1024;
/// Default number of instructions between checks.
pub const DEFAULT_INSTRUCTION_THRESHOLD: u32 = 10_000;

/// Budget limits for one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetLimits {
    pub timeout_ms: u64,
    pub max_memory_bytes: u64,
    pub instruction_threshold: u32,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            instruction_threshold: DEFAULT_INSTRUCTION_THRESHOLD,
        }
    }
}

/// Mutable bookkeeping for one execution. Created at start, discarded at end.
#[derive(Debug, Clone)]
pub struct BudgetState {
    pub start: Instant,
    pub memory_baseline_bytes: i64,
    pub instructions_since_last_check: u32,
}

/// Elapsed time and memory delta of a finished (or aborted) execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BudgetUsage {
    pub elapsed_millis: u64,
    pub memory_delta_bytes: i64,
}

/// Enforces [`BudgetLimits`] for a single running script.
#[derive(Debug)]
pub struct BudgetMonitor {
    limits: BudgetLimits,
    state: BudgetState,
    heap: Rc<HeapMeter>,
    last_memory_sample: i64,
    total_instructions: u64,
}

impl BudgetMonitor {
    /// Start the clock and record the memory baseline.
    pub fn start(limits: BudgetLimits, heap: Rc<HeapMeter>) -> Self {
        let baseline = heap.live_bytes();
        Self {
            limits,
            state: BudgetState {
                start: Instant::now(),
                memory_baseline_bytes: baseline,
                instructions_since_last_check: 0,
            },
            heap,
            last_memory_sample: baseline,
            total_instructions: 0,
        }
    }

    /// The limits this monitor enforces.
    pub fn limits(&self) -> &BudgetLimits {
        &self.limits
    }

    /// Current bookkeeping state.
    pub fn state(&self) -> &BudgetState {
        &self.state
    }

    /// The heap meter allocations are charged to.
    pub fn heap(&self) -> &Rc<HeapMeter> {
        &self.heap
    }

    /// Count one evaluated instruction; run [`check`](Self::check) when the
    /// cadence threshold is reached.
    #[inline]
    pub fn tick(&mut self) -> SandboxResult<()> {
        self.total_instructions += 1;
        self.state.instructions_since_last_check += 1;
        if self.state.instructions_since_last_check >= self.limits.instruction_threshold.max(1) {
            self.state.instructions_since_last_check = 0;
            self.check()?;
        }
        Ok(())
    }

    /// Check both budgets now.
    pub fn check(&mut self) -> SandboxResult<()> {
        let elapsed = self.elapsed();
        if elapsed > Duration::from_millis(self.limits.timeout_ms) {
            return Err(ScriptFailure::Timeout {
                elapsed_ms: elapsed.as_millis() as u64,
                limit_ms: self.limits.timeout_ms,
            });
        }
        self.check_memory()
    }

    /// Check the memory budget only.
    pub fn check_memory(&mut self) -> SandboxResult<()> {
        let used = self.memory_used();
        self.last_memory_sample = self.heap.live_bytes();
        if used > self.memory_limit() {
            return Err(ScriptFailure::MemoryExceeded {
                used_bytes: used,
                limit_bytes: self.limits.max_memory_bytes,
            });
        }
        Ok(())
    }

    /// Fail before allocating `bytes` if the allocation would exceed the budget.
    pub fn ensure_can_allocate(&mut self, bytes: usize) -> SandboxResult<()> {
        let bytes = i64::try_from(bytes).unwrap_or(i64::MAX);
        let projected = self.memory_used().saturating_add(bytes);
        if projected > self.memory_limit() {
            return Err(self.exceeded_with(projected));
        }
        Ok(())
    }

    /// Bytes that can still be allocated before the budget is exceeded.
    pub fn remaining_bytes(&self) -> usize {
        let room = self.memory_limit().saturating_sub(self.memory_used()).max(0);
        usize::try_from(room).unwrap_or(usize::MAX)
    }

    /// The failure for an allocation of `bytes` that does not fit.
    pub fn exceeded_by(&mut self, bytes: usize) -> ScriptFailure {
        let bytes = i64::try_from(bytes).unwrap_or(i64::MAX);
        let projected = self.memory_used().saturating_add(bytes);
        self.exceeded_with(projected)
    }

    fn exceeded_with(&mut self, projected: i64) -> ScriptFailure {
        self.last_memory_sample = self.heap.live_bytes();
        ScriptFailure::MemoryExceeded {
            used_bytes: projected,
            limit_bytes: self.limits.max_memory_bytes,
        }
    }

    fn memory_limit(&self) -> i64 {
        i64::try_from(self.limits.max_memory_bytes).unwrap_or(i64::MAX)
    }

    /// Wall-clock time since [`start`](Self::start).
    pub fn elapsed(&self) -> Duration {
        self.state.start.elapsed()
    }

    /// Current memory reading minus the baseline.
    pub fn memory_used(&self) -> i64 {
        self.heap.live_bytes() - self.state.memory_baseline_bytes
    }

    /// Record the memory reading without enforcing anything. The evaluator
    /// calls this once evaluation ends, while its values are still alive.
    pub fn sample_memory(&mut self) {
        self.last_memory_sample = self.heap.live_bytes();
    }

    /// Instructions counted since start.
    pub fn total_instructions(&self) -> u64 {
        self.total_instructions
    }

    /// Elapsed time now and the memory delta at the last sample.
    pub fn usage(&self) -> BudgetUsage {
        BudgetUsage {
            elapsed_millis: self.elapsed().as_millis() as u64,
            memory_delta_bytes: self.last_memory_sample - self.state.memory_baseline_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(timeout_ms: u64, max_memory_bytes: u64, threshold: u32) -> BudgetLimits {
        BudgetLimits {
            timeout_ms,
            max_memory_bytes,
            instruction_threshold: threshold,
        }
    }

    #[test]
    fn test_defaults() {
        let l = BudgetLimits::default();
        assert_eq!(l.timeout_ms, 5_000);
        assert_eq!(l.max_memory_bytes, 10 * 1024 * 1024);
        assert_eq!(l.instruction_threshold, 10_000);
    }

    #[test]
    fn test_tick_checks_only_on_cadence() {
        let heap = HeapMeter::new();
        let mut monitor = BudgetMonitor::start(limits(60_000, 100, 5), heap.clone());
        heap.charge(1_000);
        // Four ticks: below the threshold, no check yet.
        for _ in 0..4 {
            monitor.tick().unwrap();
        }
        match monitor.tick() {
            Err(ScriptFailure::MemoryExceeded {
                used_bytes,
                limit_bytes,
            }) => {
                assert_eq!(used_bytes, 1_000);
                assert_eq!(limit_bytes, 100);
            }
            other => panic!("expected MemoryExceeded, got {:?}", other),
        }
    }

    #[test]
    fn test_timeout_reports_elapsed_and_limit() {
        let heap = HeapMeter::new();
        let mut monitor = BudgetMonitor::start(limits(0, u64::MAX, 1), heap);
        std::thread::sleep(Duration::from_millis(5));
        match monitor.tick() {
            Err(ScriptFailure::Timeout {
                elapsed_ms,
                limit_ms,
            }) => {
                assert!(elapsed_ms >= 5);
                assert_eq!(limit_ms, 0);
            }
            other => panic!("expected Timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_memory_is_relative_to_baseline() {
        let heap = HeapMeter::new();
        heap.charge(5_000);
        let mut monitor = BudgetMonitor::start(limits(60_000, 1_000, 1), heap.clone());
        heap.charge(900);
        assert!(monitor.check().is_ok());
        assert_eq!(monitor.memory_used(), 900);
    }

    #[test]
    fn test_ensure_can_allocate_rejects_before_allocation() {
        let heap = HeapMeter::new();
        let mut monitor = BudgetMonitor::start(limits(60_000, 1_024, 10), heap.clone());
        assert!(monitor.ensure_can_allocate(1_000).is_ok());
        assert!(matches!(
            monitor.ensure_can_allocate(2_000),
            Err(ScriptFailure::MemoryExceeded { .. })
        ));
        assert_eq!(heap.live_bytes(), 0);
    }

    #[test]
    fn test_oversized_requests_do_not_wrap() {
        let heap = HeapMeter::new();
        let mut monitor = BudgetMonitor::start(limits(60_000, 1_024, 10), heap.clone());
        for bytes in [usize::MAX, usize::MAX / 2 + 1, i64::MAX as usize + 7] {
            assert!(matches!(
                monitor.ensure_can_allocate(bytes),
                Err(ScriptFailure::MemoryExceeded { .. })
            ));
        }
        assert_eq!(monitor.remaining_bytes(), 1_024);
        heap.charge(1_000);
        assert_eq!(monitor.remaining_bytes(), 24);
        heap.charge(1_000);
        assert_eq!(monitor.remaining_bytes(), 0);
    }

    #[test]
    fn test_unbounded_memory_limit_allows_allocation() {
        let heap = HeapMeter::new();
        let mut monitor = BudgetMonitor::start(limits(60_000, u64::MAX, 10), heap);
        assert!(monitor.ensure_can_allocate(1 << 40).is_ok());
        assert!(monitor.check_memory().is_ok());
    }

    #[test]
    fn test_usage_reports_last_sample() {
        let heap = HeapMeter::new();
        let mut monitor = BudgetMonitor::start(limits(60_000, u64::MAX, 10), heap.clone());
        heap.charge(4_096);
        monitor.sample_memory();
        heap.release(4_096);
        let usage = monitor.usage();
        assert_eq!(usage.memory_delta_bytes, 4_096);
    }

    #[test]
    fn test_zero_threshold_checks_every_tick() {
        let heap = HeapMeter::new();
        let mut monitor = BudgetMonitor::start(limits(60_000, 10, 0), heap.clone());
        heap.charge(11);
        assert!(monitor.tick().is_err());
    }
}
