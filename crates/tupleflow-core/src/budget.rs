//! Abstract memory budget interfaces.
//!
//! The concrete implementation lives in `tupleflow-mem`. Only the traits live
//! here so operators can take a budget without pulling in the spill logic.

/// A guard returned by a memory budget when bytes are acquired.
///
/// Releases its bytes on Drop.
pub trait BudgetGuard: Send {
    /// Number of bytes currently accounted for by this guard.
    fn bytes(&self) -> usize;
    fn tag(&self) -> &'static str {
        "guard"
    }
}

/// A handle representing a memory-cap enforcer.
///
/// Callers `try_acquire` before materializing spilled data. If `None` is
/// returned the read must fail with `OutOfMemory`; the engine never grows
/// past the cap.
pub trait MemoryBudget: Send + Sync + 'static {
    type Guard: BudgetGuard;

    /// Attempt to acquire `bytes` from the live budget. Returns a guard on success.
    fn try_acquire(&self, bytes: usize, tag: &'static str) -> Option<Self::Guard>;

    /// Total configured capacity (bytes).
    fn capacity_bytes(&self) -> usize;

    /// Approximate currently used bytes (advisory; not a correctness API).
    fn used_bytes(&self) -> usize;
}
