//! Counted transaction scoping.
//!
//! SQLite has no true nested transactions, so the store models nesting as
//! a per-database counter over a single underlying transaction: the real
//! `BEGIN` happens when the depth goes 0→1 and the `COMMIT`/`ROLLBACK`
//! when it returns to 0. A write-once fail flag decides which; setting it
//! does not abort mid-scope, it only forces the rollback at outermost
//! exit.

use std::cell::Cell;

/// What happened when the outermost scope exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScopeOutcome {
    /// The transaction committed.
    Committed,
    /// The fail flag was set; the transaction rolled back.
    RolledBack,
}

/// Nesting depth and fail flag for the single underlying transaction.
///
/// Interior mutability via `Cell` is sound here: the owning connection is
/// `!Sync`, so the state is only ever touched from one thread at a time.
#[derive(Debug, Default)]
pub(crate) struct TransactionState {
    depth: Cell<u32>,
    failed: Cell<bool>,
}

impl TransactionState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Current nesting depth.
    pub(crate) fn depth(&self) -> u32 {
        self.depth.get()
    }

    /// True while any scope is open.
    pub(crate) fn in_transaction(&self) -> bool {
        self.depth.get() > 0
    }

    /// Records one more scope. Returns true if this is the outermost one,
    /// i.e. the caller must issue the real `BEGIN` first.
    pub(crate) fn will_enter(&self) -> bool {
        self.depth.get() == 0
    }

    /// Marks a scope as entered. Call only after any required `BEGIN`
    /// succeeded, so a failed `BEGIN` leaves the depth untouched.
    pub(crate) fn entered(&self) {
        self.depth.set(self.depth.get() + 1);
    }

    /// Leaves one scope. Returns `None` while still nested; on the
    /// outermost exit returns the outcome the caller must apply and
    /// resets the fail flag for the next transaction.
    pub(crate) fn exited(&self) -> Option<ScopeOutcome> {
        debug_assert!(self.depth.get() > 0, "transaction scope underflow");
        let depth = self.depth.get().saturating_sub(1);
        self.depth.set(depth);
        if depth > 0 {
            return None;
        }
        let outcome = if self.failed.get() {
            ScopeOutcome::RolledBack
        } else {
            ScopeOutcome::Committed
        };
        self.failed.set(false);
        Some(outcome)
    }

    /// Sets the fail flag. Write-once: there is no way to clear it before
    /// the outermost scope exits.
    pub(crate) fn mark_failed(&self) {
        self.failed.set(true);
    }

    /// True if the current transaction is doomed to roll back.
    pub(crate) fn is_failed(&self) -> bool {
        self.failed.get()
    }
}
