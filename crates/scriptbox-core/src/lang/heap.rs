//! Live-byte accounting for interpreter-owned allocations.
//!
//! Strings, arrays, objects and host collections charge the meter when they
//! grow and refund it when they are dropped, so the reading is the memory the
//! running script is currently holding. One meter per execution; it never
//! crosses threads.

use std::cell::Cell;
use std::rc::Rc;

/// Per-execution counter of live interpreter bytes.
#[derive(Debug, Default)]
pub struct HeapMeter {
    live: Cell<i64>,
    peak: Cell<i64>,
}

impl HeapMeter {
    /// Create a fresh meter reading zero.
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Record `bytes` newly held.
    pub fn charge(&self, bytes: usize) {
        let live = self.live.get().saturating_add(bytes as i64);
        self.live.set(live);
        if live > self.peak.get() {
            self.peak.set(live);
        }
    }

    /// Record `bytes` released.
    pub fn release(&self, bytes: usize) {
        self.live.set(self.live.get().saturating_sub(bytes as i64));
    }

    /// Move the charge for one allocation from `old` bytes to `new` bytes.
    pub fn adjust(&self, old: usize, new: usize) {
        if new > old {
            self.charge(new - old);
        } else {
            self.release(old - new);
        }
    }

    /// Bytes currently held.
    pub fn live_bytes(&self) -> i64 {
        self.live.get()
    }

    /// Highest reading since creation.
    pub fn peak_bytes(&self) -> i64 {
        self.peak.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_and_release_track_live_and_peak() {
        let heap = HeapMeter::new();
        heap.charge(100);
        heap.charge(50);
        heap.release(120);
        assert_eq!(heap.live_bytes(), 30);
        assert_eq!(heap.peak_bytes(), 150);
    }

    #[test]
    fn adjust_moves_in_both_directions() {
        let heap = HeapMeter::new();
        heap.adjust(0, 64);
        assert_eq!(heap.live_bytes(), 64);
        heap.adjust(64, 16);
        assert_eq!(heap.live_bytes(), 16);
    }
}
