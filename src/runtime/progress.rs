use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// Outcome of recording one successful send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRecord {
    /// The send was counted; `limit_reached` is set by the send that hit the repeat count.
    Counted { total: u64, limit_reached: bool },
    /// The repeat count was already reached; the send is not counted.
    Discarded,
}

/// Monotonic count of successful sends, capped at the job's repeat count.
#[derive(Debug)]
pub struct SendProgress {
    sent: AtomicU64,
    limit: Option<NonZeroU64>,
}

impl SendProgress {
    pub fn new(limit: Option<NonZeroU64>) -> Self {
        Self {
            sent: AtomicU64::new(0),
            limit,
        }
    }

    pub fn record_success(&self) -> SendRecord {
        let limit = self.limit.map(NonZeroU64::get);
        let previous = self
            .sent
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| match limit {
                Some(max) if current >= max => None,
                _ => Some(current + 1),
            });

        match previous {
            Ok(previous) => {
                let total = previous + 1;
                SendRecord::Counted {
                    total,
                    limit_reached: limit.is_some_and(|max| total >= max),
                }
            }
            Err(_) => SendRecord::Discarded,
        }
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn limit(&self) -> Option<NonZeroU64> {
        self.limit
    }

    pub fn limit_reached(&self) -> bool {
        self.limit.is_some_and(|max| self.sent() >= max.get())
    }
}
