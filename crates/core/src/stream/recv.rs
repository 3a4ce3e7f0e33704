//! Receive-completion accounting and application-owned receive buffers
//! (§4.7, invariant 5).
//!
//! `StreamReceiveComplete` has to be lock-free and safe to call from any
//! thread any number of times, yet still detect an application that
//! reports more bytes complete than the stream ever delivered. The
//! reference implementation does this by reserving the top two bits of the
//! counter as a "receive active" flag and a "canary" that can only become
//! set if a completion addition carried into it. [`ReceiveCompletionCounter`]
//! is the same trick expressed as a CAS loop instead of a single
//! platform-specific interlocked intrinsic.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::BytesMut;

/// Set while a `StreamReceive` callback invocation is outstanding; a
/// completion that lands while this is set does not need its own
/// `StreamReceiveComplete` operation queued, because the active receive
/// will observe the updated counter when it returns.
const RECEIVE_ACTIVE_BIT: u64 = 1 << 63;
/// Set once a completion addition has been observed to carry into a
/// reserved bit; sticky for the rest of the stream's life.
const CANARY_BIT: u64 = 1 << 62;
const LENGTH_MASK: u64 = CANARY_BIT - 1;

/// Outcome of a single [`ReceiveCompletionCounter::complete`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Accepted; `receive_active` reports whether a receive call is
    /// currently outstanding on the stream.
    Completed { receive_active: bool },
    /// The reported length, combined with everything completed so far,
    /// is not representable -- a contract violation that must tear the
    /// connection down via the back-up operation.
    CanaryOverflow,
}

/// Lock-free accounting of bytes the application has finished consuming
/// from the stream's receive path.
#[derive(Debug, Default)]
pub struct ReceiveCompletionCounter(AtomicU64);

impl ReceiveCompletionCounter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Marks whether a receive callback invocation is currently
    /// outstanding on this stream. Only the worker thread calls this.
    pub fn set_receive_active(&self, active: bool) {
        if active {
            self.0.fetch_or(RECEIVE_ACTIVE_BIT, Ordering::AcqRel);
        } else {
            self.0.fetch_and(!RECEIVE_ACTIVE_BIT, Ordering::AcqRel);
        }
    }

    /// Adds `length` bytes to the running completed total.
    pub fn complete(&self, length: u64) -> CompletionOutcome {
        loop {
            let prior = self.0.load(Ordering::Acquire);
            if prior & CANARY_BIT != 0 {
                return CompletionOutcome::CanaryOverflow;
            }
            let prior_length = prior & LENGTH_MASK;
            let new_length = match prior_length.checked_add(length) {
                Some(sum) if sum & !LENGTH_MASK == 0 => sum,
                _ => {
                    self.0.fetch_or(CANARY_BIT, Ordering::AcqRel);
                    return CompletionOutcome::CanaryOverflow;
                }
            };
            let new_value = (prior & !LENGTH_MASK) | new_length;
            if self
                .0
                .compare_exchange_weak(prior, new_value, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return CompletionOutcome::Completed {
                    receive_active: new_value & RECEIVE_ACTIVE_BIT != 0,
                };
            }
        }
    }

    /// Total bytes completed so far, ignoring the flag bits.
    pub fn completed_length(&self) -> u64 {
        self.0.load(Ordering::Acquire) & LENGTH_MASK
    }
}

/// An application-provided buffer linked into a stream's receive-chunk
/// list by `StreamProvideReceiveBuffers`.
#[derive(Debug)]
pub struct ReceiveChunk {
    pub buffer: BytesMut,
}

impl ReceiveChunk {
    /// # Panics
    ///
    /// Panics if `buffer` is empty; per §3 every chunk's length must be
    /// greater than zero. Callers validate this at the API boundary and
    /// return `InvalidParameter` instead of reaching this constructor with
    /// an empty buffer.
    pub fn new(buffer: BytesMut) -> Self {
        assert!(!buffer.is_empty(), "receive chunk length must be > 0");
        Self { buffer }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completions_accumulate_in_order() {
        let counter = ReceiveCompletionCounter::new();
        assert_eq!(counter.complete(10), CompletionOutcome::Completed { receive_active: false });
        assert_eq!(counter.complete(20), CompletionOutcome::Completed { receive_active: false });
        assert_eq!(counter.completed_length(), 30);
    }

    #[test]
    fn receive_active_flag_is_reported_back() {
        let counter = ReceiveCompletionCounter::new();
        counter.set_receive_active(true);
        assert_eq!(counter.complete(5), CompletionOutcome::Completed { receive_active: true });
        counter.set_receive_active(false);
        assert_eq!(counter.complete(5), CompletionOutcome::Completed { receive_active: false });
    }

    #[test]
    fn overflowing_the_length_range_is_a_canary_violation() {
        let counter = ReceiveCompletionCounter::new();
        assert_eq!(counter.complete(LENGTH_MASK), CompletionOutcome::Completed { receive_active: false });
        assert_eq!(counter.complete(1), CompletionOutcome::CanaryOverflow);
        // Sticky: any further call also observes the violation.
        assert_eq!(counter.complete(1), CompletionOutcome::CanaryOverflow);
    }
}
