//! Per-source bounded buffering and fixed-priority arbitration.
//!
//! Each source owns an independent bounded FIFO. Producers always succeed:
//! pushing into a full queue evicts the oldest entry (drop-oldest) and
//! raises an overflow flag, never back-pressure. Each tick the arbiter
//! forwards at most one reading system-wide, taken from the highest-priority
//! non-empty queue, and only when the downstream stage reports readiness —
//! otherwise it stalls without dequeuing.

use crate::sensors::{Reading, SourceId, SOURCE_COUNT};
use heapless::Deque;
use serde::{Deserialize, Serialize};

/// Capacity of each per-source queue.
pub const QUEUE_DEPTH: usize = 8;

/// Observable arbiter state. Selection and hand-off complete within a
/// single tick, so only the resting and forwarding states are ever visible
/// from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArbiterState {
    Idle,
    Forwarding,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ArbiterStats {
    pub forwarded: u32,
    pub stalled_ticks: u32,
    pub overflows: [u32; SOURCE_COUNT],
}

/// One source's bounded FIFO with drop-oldest overflow.
#[derive(Debug, Default)]
struct SourceQueue {
    entries: Deque<Reading, QUEUE_DEPTH>,
    overflowed: bool,
}

impl SourceQueue {
    /// Insert a reading; the producer never fails. Returns whether the
    /// oldest entry was evicted to make room.
    fn push(&mut self, reading: Reading) -> bool {
        let evicted = if self.entries.is_full() {
            self.entries.pop_front();
            self.overflowed = true;
            true
        } else {
            false
        };
        // Cannot fail: a slot was just guaranteed
        let _ = self.entries.push_back(reading);
        debug_assert!(
            self.entries.len() <= QUEUE_DEPTH,
            "queue occupancy {} exceeds capacity {}",
            self.entries.len(),
            QUEUE_DEPTH
        );
        evicted
    }
}

/// Fixed-priority arbiter over the three source queues.
///
/// Each source occupies its own priority tier (Thermo > Baro > Motion), so
/// no intra-tier tie-break is needed; overflow is informational only and
/// never blocks forwarding.
#[derive(Debug)]
pub struct PriorityArbiter {
    queues: [SourceQueue; SOURCE_COUNT],
    state: ArbiterState,
    stats: ArbiterStats,
}

impl PriorityArbiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            queues: Default::default(),
            state: ArbiterState::Idle,
            stats: ArbiterStats::default(),
        }
    }

    /// Producer-side insert into the reading's source queue.
    pub fn push(&mut self, reading: Reading) {
        let index = reading.source.index();
        if self.queues[index].push(reading) {
            self.stats.overflows[index] += 1;
        }
    }

    /// Advance one tick: select the highest-priority non-empty queue and
    /// dequeue its head, but only when `downstream_ready`. A stalled tick
    /// dequeues nothing — the head stays in place until it can move.
    pub fn step(&mut self, downstream_ready: bool) -> Option<Reading> {
        let source = SourceId::PRIORITY_ORDER
            .iter()
            .find(|s| !self.queues[s.index()].entries.is_empty())
            .copied();

        let Some(source) = source else {
            self.state = ArbiterState::Idle;
            return None;
        };

        if !downstream_ready {
            self.stats.stalled_ticks += 1;
            self.state = ArbiterState::Forwarding;
            return None;
        }

        self.state = ArbiterState::Forwarding;
        self.stats.forwarded += 1;
        self.queues[source.index()].entries.pop_front()
    }

    #[must_use]
    pub fn state(&self) -> ArbiterState {
        self.state
    }

    #[must_use]
    pub fn occupancy(&self, source: SourceId) -> usize {
        self.queues[source.index()].entries.len()
    }

    /// Sticky overflow indication for any source.
    #[must_use]
    pub fn overflowed(&self) -> bool {
        self.queues.iter().any(|q| q.overflowed)
    }

    #[must_use]
    pub fn stats(&self) -> &ArbiterStats {
        &self.stats
    }
}

impl Default for PriorityArbiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(source: SourceId, value: u16) -> Reading {
        Reading {
            source,
            value,
            capture_tick: 0,
        }
    }

    #[test]
    fn test_empty_queues_assert_nothing() {
        let mut arbiter = PriorityArbiter::new();
        assert_eq!(arbiter.step(true), None);
        assert_eq!(arbiter.state(), ArbiterState::Idle);
    }

    #[test]
    fn test_higher_priority_source_drains_first() {
        let mut arbiter = PriorityArbiter::new();
        arbiter.push(reading(SourceId::Baro, 1));
        arbiter.push(reading(SourceId::Thermo, 2));
        arbiter.push(reading(SourceId::Motion, 3));
        arbiter.push(reading(SourceId::Thermo, 4));

        let order: Vec<u16> = (0..4)
            .filter_map(|_| arbiter.step(true))
            .map(|r| r.value)
            .collect();
        assert_eq!(order, vec![2, 4, 1, 3]);
    }

    #[test]
    fn test_fifo_order_within_one_source() {
        let mut arbiter = PriorityArbiter::new();
        for value in 0..5 {
            arbiter.push(reading(SourceId::Motion, value));
        }
        for expected in 0..5 {
            assert_eq!(arbiter.step(true).unwrap().value, expected);
        }
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let mut arbiter = PriorityArbiter::new();
        for value in 1..=(QUEUE_DEPTH as u16 + 1) {
            arbiter.push(reading(SourceId::Thermo, value));
        }
        assert_eq!(arbiter.occupancy(SourceId::Thermo), QUEUE_DEPTH);
        assert_eq!(arbiter.stats().overflows[0], 1);
        assert!(arbiter.overflowed());

        // Item 1 was evicted; 2..=N+1 remain in arrival order
        let drained: Vec<u16> = (0..QUEUE_DEPTH)
            .filter_map(|_| arbiter.step(true))
            .map(|r| r.value)
            .collect();
        let expected: Vec<u16> = (2..=(QUEUE_DEPTH as u16 + 1)).collect();
        assert_eq!(drained, expected);
    }

    #[test]
    fn test_stall_does_not_dequeue() {
        let mut arbiter = PriorityArbiter::new();
        arbiter.push(reading(SourceId::Thermo, 7));

        assert_eq!(arbiter.step(false), None);
        assert_eq!(arbiter.state(), ArbiterState::Forwarding);
        assert_eq!(arbiter.occupancy(SourceId::Thermo), 1);
        assert_eq!(arbiter.stats().stalled_ticks, 1);

        assert_eq!(arbiter.step(true).unwrap().value, 7);
        assert_eq!(arbiter.occupancy(SourceId::Thermo), 0);
    }

    #[test]
    fn test_overflow_never_blocks_forwarding() {
        let mut arbiter = PriorityArbiter::new();
        for value in 0..20 {
            arbiter.push(reading(SourceId::Baro, value));
        }
        // Head is the oldest surviving entry despite the overflow
        assert_eq!(arbiter.step(true).unwrap().value, 12);
    }
}
