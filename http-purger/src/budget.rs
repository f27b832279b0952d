// Lifetime request budget of a single dispatcher. Shared by reference between
// concurrent sends; the cap is never overshot.
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct RequestBudget {
    limit: u64,
    remaining: AtomicU64,
}

impl RequestBudget {
    pub fn new(limit: u64) -> Self {
        RequestBudget {
            limit,
            remaining: AtomicU64::new(limit),
        }
    }

    /// Reserves one request. Returns false once the budget is exhausted.
    pub fn try_acquire(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }

    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn issued(&self) -> u64 {
        self.limit - self.remaining()
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}
