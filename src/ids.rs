use std::sync::atomic::{AtomicU64, Ordering};

/// Local surrogate key. `UNASSIGNED` marks an entity that has not been given one yet.
pub type LocalId = u64;

pub const UNASSIGNED: LocalId = 0;

/// Monotonic surrogate-key source.
///
/// Keys start at 1 and are never reused for the lifetime of the allocator. One
/// allocator is shared (behind an `Arc`) by everything that builds gradebooks in
/// the same process, so keys stay unique across concurrent builds.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> LocalId {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
