//! Completion counting for a run.

use std::sync::atomic::{AtomicUsize, Ordering};

/// What a single arrival at the barrier observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    Waiting { arrived: usize, expected: usize },
    /// This arrival completed the population. Returned exactly once.
    Closed,
    AlreadyClosed,
}

impl Arrival {
    pub fn is_closed(&self) -> bool {
        matches!(self, Arrival::Closed)
    }
}

/// Counts terminal outputs until every party has produced one.
#[derive(Debug)]
pub struct CompletionBarrier {
    expected: usize,
    arrived: AtomicUsize,
}

impl CompletionBarrier {
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            arrived: AtomicUsize::new(0),
        }
    }

    pub fn arrive(&self) -> Arrival {
        let arrived = self.arrived.fetch_add(1, Ordering::AcqRel) + 1;
        match arrived.cmp(&self.expected) {
            std::cmp::Ordering::Less => Arrival::Waiting {
                arrived,
                expected: self.expected,
            },
            std::cmp::Ordering::Equal => Arrival::Closed,
            std::cmp::Ordering::Greater => Arrival::AlreadyClosed,
        }
    }

    pub fn arrived(&self) -> usize {
        self.arrived.load(Ordering::Acquire).min(self.expected)
    }

    pub fn is_closed(&self) -> bool {
        self.arrived.load(Ordering::Acquire) >= self.expected
    }
}
