//! Remembers which patches have already been applied, so a host that runs its load entry point more than once
//! does not rewrite an already rewritten body

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lazy_static::lazy_static;

/// Guard shared between modules and the host
pub type SharedGuard = Arc<Mutex<IdempotencyGuard>>;

/// Record of applied patch identifiers for the current module session
#[derive(Debug, Default)]
pub struct IdempotencyGuard {
    /// Identifiers that have been consumed
    applied: HashSet<String>,
}
impl IdempotencyGuard {
    /// Creates an empty guard
    pub fn new() -> Self {
        Self::default()
    }
    /// Marks `patch_id` as consumed. Returns `true` the first time and `false` on every later call until [`Self::reset`].
    pub fn try_begin_patch(&mut self, patch_id: &str) -> bool {
        if self.applied.contains(patch_id) {
            return false;
        }
        self.applied.insert(patch_id.to_owned())
    }
    /// Whether `patch_id` has been consumed
    pub fn is_applied(&self, patch_id: &str) -> bool {
        self.applied.contains(patch_id)
    }
    /// Number of consumed identifiers
    pub fn len(&self) -> usize {
        self.applied.len()
    }
    /// Whether nothing has been patched yet
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
    /// Drops the record for `patch_id` only. Returns whether it was consumed.
    pub fn forget(&mut self, patch_id: &str) -> bool {
        self.applied.remove(patch_id)
    }
    /// Clears every record so a fresh load can patch again
    pub fn reset(&mut self) {
        self.applied.clear();
    }
}

lazy_static! {
    static ref GLOBAL: SharedGuard = Arc::new(Mutex::new(IdempotencyGuard::new()));
}

/// Process-wide guard, for hosts that do not inject their own
pub fn global() -> SharedGuard {
    GLOBAL.clone()
}

/// Locks a shared guard. A poisoned lock still holds valid records, so it is recovered rather than propagated.
pub fn lock(guard: &Mutex<IdempotencyGuard>) -> MutexGuard<'_, IdempotencyGuard> {
    guard.lock().unwrap_or_else(PoisonError::into_inner)
}
