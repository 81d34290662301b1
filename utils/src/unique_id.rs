use std::sync::atomic::{AtomicU64, Ordering};

/// A process-unique monotonically increasing id. Used to tag upload batches
/// so a conflict decision scope can be matched against the batch it was made
/// for.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Hash)]
pub struct UniqueId(u64);

impl Default for UniqueId {
    fn default() -> Self {
        Self::new()
    }
}

impl UniqueId {
    pub fn new() -> Self {
        static UNIQUE_COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(UNIQUE_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The null id; never returned by `new()`.
    pub fn null() -> Self {
        Self(0)
    }
}
