//! Process-lifetime tracker of already-delivered groups.
//!
//! Ensures each logical observation reaches the application exactly once per
//! node, no matter how many duplicate or late packets arrive. The set grows
//! monotonically for the process lifetime; whether entries should expire
//! after a retention window is a deployment-tunable open question (see
//! DESIGN.md).

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use crate::chain::GroupKey;

/// Shared set of group keys already delivered to the application.
///
/// Cheap to clone; all clones share one underlying set.
#[derive(Debug, Clone, Default)]
pub struct DedupTracker {
    inner: Arc<Mutex<HashSet<GroupKey>>>,
}

impl DedupTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<GroupKey>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim delivery of a group.
    ///
    /// Returns true the first time a key is claimed, false ever after. The
    /// check and insert are one atomic operation, so two concurrent claims
    /// of the same key can never both see true.
    pub fn first_delivery(&self, key: GroupKey) -> bool {
        self.lock().insert(key)
    }

    /// Whether a group has already been delivered.
    pub fn seen(&self, key: &GroupKey) -> bool {
        self.lock().contains(key)
    }

    /// Number of groups delivered so far.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing has been delivered yet.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
