//! Named-kind reference counting for connections and streams.
//!
//! Both [`crate::connection::Connection`] and [`crate::stream::Stream`]
//! embed a [`RefCounts`]. Unlike a plain `Arc`, which only knows "zero or
//! not zero", this tracks *why* an entity is still alive: the application's
//! `HandleOwner` reference (released exactly once, by a close call),
//! `Operation` references (one per in-flight async operation that still
//! needs to reach the entity), and `Internal` references held by
//! out-of-scope collaborators (the handshake engine, loss recovery, ...).
//! Final destruction -- dropping the last `Arc` -- only happens once every
//! kind has independently reached zero.

use std::sync::atomic::{AtomicU32, Ordering};

/// A named reference kind. `Internal` stands in for every reference kind
/// owned by collaborators outside this crate's scope (TLS, loss recovery);
/// this crate never releases an `Internal` reference itself, but it must
/// still account for them so `is_unreferenced` matches the specification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefKind {
    HandleOwner,
    Operation,
    Internal,
}

const KIND_COUNT: usize = 3;

fn index(kind: RefKind) -> usize {
    match kind {
        RefKind::HandleOwner => 0,
        RefKind::Operation => 1,
        RefKind::Internal => 2,
    }
}

/// Multi-kind reference counter.
///
/// All counts start at zero; callers are expected to `add_ref` the kinds
/// they hold immediately after construction (typically `HandleOwner` once,
/// at open time).
#[derive(Debug, Default)]
pub struct RefCounts {
    counts: [AtomicU32; KIND_COUNT],
}

impl RefCounts {
    pub fn new() -> Self {
        Self {
            counts: [AtomicU32::new(0), AtomicU32::new(0), AtomicU32::new(0)],
        }
    }

    /// Adds a reference of the given kind.
    pub fn add_ref(&self, kind: RefKind) {
        self.counts[index(kind)].fetch_add(1, Ordering::AcqRel);
    }

    /// Releases a reference of the given kind. Returns `true` if this
    /// release brought every kind's count to zero, meaning the entity
    /// should be destroyed now.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if the named kind's count was already zero;
    /// that is always a contract violation by the caller, not a runtime
    /// condition callers should expect to handle.
    pub fn release_ref(&self, kind: RefKind) -> bool {
        let previous = self.counts[index(kind)].fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "released a {kind:?} reference that was never held");
        self.is_unreferenced()
    }

    /// True once every kind's count is zero.
    pub fn is_unreferenced(&self) -> bool {
        self.counts.iter().all(|count| count.load(Ordering::Acquire) == 0)
    }

    /// Current count for a single kind; exposed for diagnostics and tests.
    pub fn count(&self, kind: RefKind) -> u32 {
        self.counts[index(kind)].load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destroys_only_after_every_kind_drains() {
        let refs = RefCounts::new();
        refs.add_ref(RefKind::HandleOwner);
        refs.add_ref(RefKind::Operation);
        refs.add_ref(RefKind::Operation);

        assert!(!refs.release_ref(RefKind::Operation));
        assert!(!refs.release_ref(RefKind::HandleOwner));
        assert!(refs.release_ref(RefKind::Operation));
    }

    #[test]
    fn internal_references_block_destruction() {
        let refs = RefCounts::new();
        refs.add_ref(RefKind::HandleOwner);
        refs.add_ref(RefKind::Internal);
        assert!(!refs.release_ref(RefKind::HandleOwner));
        assert!(refs.release_ref(RefKind::Internal));
    }
}
