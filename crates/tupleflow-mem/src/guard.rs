//! MemoryBudget + RAII guard implementations.
//!
//! Spill reads acquire a guard for the decoded size of a segment before
//! decoding it. Dropping the guard returns the bytes to the budget.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tupleflow_core::budget::{BudgetGuard, MemoryBudget};

use crate::error::{Error, Result};

struct BudgetInner {
    capacity: usize,
    used: AtomicUsize,
}

impl BudgetInner {
    fn try_acquire(&self, bytes: usize) -> bool {
        loop {
            let cur = self.used.load(Ordering::Relaxed);
            let next = cur.saturating_add(bytes);
            if next > self.capacity {
                return false;
            }
            if self
                .used
                .compare_exchange(cur, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn release(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::AcqRel);
    }
}

/// Concrete MemoryBudget implementation used by the engine.
#[derive(Clone)]
pub struct MemoryBudgetImpl {
    inner: Arc<BudgetInner>,
}

impl MemoryBudgetImpl {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            inner: Arc::new(BudgetInner {
                capacity: capacity_bytes,
                used: AtomicUsize::new(0),
            }),
        }
    }

    /// Like `try_acquire`, but reports the refusal as an error.
    pub fn acquire(&self, bytes: usize, tag: &'static str) -> Result<BudgetGuardImpl> {
        self.try_acquire(bytes, tag).ok_or_else(|| Error::BudgetExceeded {
            tag,
            requested: bytes,
            capacity: self.inner.capacity,
            used: self.inner.used.load(Ordering::Relaxed),
        })
    }
}

impl std::fmt::Debug for MemoryBudgetImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBudgetImpl")
            .field("capacity", &self.inner.capacity)
            .field("used", &self.inner.used.load(Ordering::Relaxed))
            .finish()
    }
}

/// RAII guard that accounts for a number of bytes.
pub struct BudgetGuardImpl {
    inner: Arc<BudgetInner>,
    bytes: usize,
    tag: &'static str,
}

impl Drop for BudgetGuardImpl {
    fn drop(&mut self) {
        if self.bytes > 0 {
            self.inner.release(self.bytes);
            self.bytes = 0;
        }
    }
}

impl BudgetGuard for BudgetGuardImpl {
    fn bytes(&self) -> usize {
        self.bytes
    }
    fn tag(&self) -> &'static str {
        self.tag
    }
}

impl MemoryBudget for MemoryBudgetImpl {
    type Guard = BudgetGuardImpl;

    fn try_acquire(&self, bytes: usize, tag: &'static str) -> Option<Self::Guard> {
        if bytes > 0 && !self.inner.try_acquire(bytes) {
            return None;
        }
        Some(BudgetGuardImpl {
            inner: Arc::clone(&self.inner),
            bytes,
            tag,
        })
    }

    fn capacity_bytes(&self) -> usize {
        self.inner.capacity
    }

    fn used_bytes(&self) -> usize {
        self.inner.used.load(Ordering::Relaxed)
    }
}
