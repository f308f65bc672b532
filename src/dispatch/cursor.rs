use std::sync::atomic::{AtomicU64, Ordering};

/// Shared position into the round-robin (target, message) sequence.
///
/// Every claim is a single `fetch_add`, so no two workers ever receive the same position.
/// Claiming and finishing are tracked apart: a bounded pass is only complete once every
/// claimed position was sent, skipped or discarded.
#[derive(Debug)]
pub struct Cursor {
    next: AtomicU64,
    finished: AtomicU64,
    bound: Option<u64>,
}

impl Cursor {
    pub fn new(bound: Option<u64>) -> Self {
        Self::starting_at(0, bound)
    }

    pub fn starting_at(start: u64, bound: Option<u64>) -> Self {
        Self {
            next: AtomicU64::new(start),
            finished: AtomicU64::new(start),
            bound,
        }
    }

    /// Claims the next position, or `None` once a bounded cursor is exhausted.
    pub fn claim(&self) -> Option<u64> {
        let position = self.next.fetch_add(1, Ordering::SeqCst);
        match self.bound {
            Some(bound) if position >= bound => None,
            _ => Some(position),
        }
    }

    /// Positions handed out so far.
    pub fn claimed(&self) -> u64 {
        let next = self.next.load(Ordering::SeqCst);
        self.bound.map_or(next, |bound| next.min(bound))
    }

    pub fn is_exhausted(&self) -> bool {
        self.bound
            .is_some_and(|bound| self.next.load(Ordering::SeqCst) >= bound)
    }

    /// Records that a claimed position reached a final outcome.
    pub fn finish(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }

    /// True when a bounded cursor has every position finished, not merely handed out.
    pub fn pass_complete(&self) -> bool {
        self.bound
            .is_some_and(|bound| self.finished.load(Ordering::SeqCst) >= bound)
    }
}
