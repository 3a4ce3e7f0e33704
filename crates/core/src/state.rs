//! A small atomic wrapper around `enumflags2::BitFlags`, used for the
//! connection and stream state machines (§4.6, §4.7).
//!
//! Both state machines are read far more often than written (every public
//! API call checks state before doing anything else) and written from at
//! most one thread at a time under the entity's dispatch lock, so a single
//! `AtomicU32` storing the raw bit pattern is enough; no `Mutex` needed.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};

use enumflags2::{BitFlag, BitFlags};

pub(crate) struct AtomicFlags<T: BitFlag<Numeric = u32>> {
    bits: AtomicU32,
    _marker: PhantomData<T>,
}

impl<T: BitFlag<Numeric = u32>> AtomicFlags<T> {
    pub(crate) fn new(initial: BitFlags<T>) -> Self {
        Self {
            bits: AtomicU32::new(initial.bits()),
            _marker: PhantomData,
        }
    }

    pub(crate) fn get(&self) -> BitFlags<T> {
        BitFlags::from_bits_truncate(self.bits.load(Ordering::Acquire))
    }

    pub(crate) fn contains(&self, flag: T) -> bool {
        self.get().contains(flag)
    }

    pub(crate) fn insert(&self, flag: T) {
        self.bits.fetch_or(BitFlags::from(flag).bits(), Ordering::AcqRel);
    }

    pub(crate) fn remove(&self, flag: T) {
        self.bits.fetch_and(!BitFlags::from(flag).bits(), Ordering::AcqRel);
    }

    /// Inserts `flag` and reports whether it was already set.
    pub(crate) fn test_and_set(&self, flag: T) -> bool {
        let mask = BitFlags::from(flag).bits();
        let previous = self.bits.fetch_or(mask, Ordering::AcqRel);
        previous & mask != 0
    }
}

impl<T: BitFlag<Numeric = u32>> Default for AtomicFlags<T> {
    fn default() -> Self {
        Self::new(BitFlags::empty())
    }
}

impl<T: BitFlag<Numeric = u32> + std::fmt::Debug> std::fmt::Debug for AtomicFlags<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AtomicFlags").field(&self.get()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enumflags2::bitflags;

    #[bitflags]
    #[repr(u32)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum TestFlag {
        A,
        B,
    }

    #[test]
    fn insert_and_contains_round_trip() {
        let flags = AtomicFlags::<TestFlag>::default();
        assert!(!flags.contains(TestFlag::A));
        flags.insert(TestFlag::A);
        assert!(flags.contains(TestFlag::A));
        assert!(!flags.contains(TestFlag::B));
    }

    #[test]
    fn test_and_set_reports_prior_state() {
        let flags = AtomicFlags::<TestFlag>::default();
        assert!(!flags.test_and_set(TestFlag::A));
        assert!(flags.test_and_set(TestFlag::A));
    }
}
