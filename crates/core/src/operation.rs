//! The tagged-union operation objects queued to a connection's worker
//! (§4.2, §4.4).
//!
//! Every state-changing public API call is translated into one
//! [`Operation`] and either run inline or handed to the connection's
//! [`crate::queue::OperationQueue`]. The reference implementation allocates
//! these from a per-partition pool and reserves one "back-up" operation per
//! connection so that an `OutOfMemory` condition can still be reported (and
//! the connection torn down) even when the pool itself is exhausted; see
//! [`OperationPool`] and [`crate::connection::Connection::queue_or_backup`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::context::OpaqueContext;
use crate::error::Status;
use crate::flags::{
    ConnectionShutdownFlags, ParamFlag, ParamFlags, SendResumptionTicketFlags, StreamSendFlags, StreamShutdownFlags,
    StreamStartFlags,
};
use crate::handle::{AddressFamily, ParamHandle};
use crate::param::Param;
use crate::stream::Stream;

/// The three priority classes a connection's queue drains in order
/// (§4.4). Each is a separate FIFO; `Highest` fully drains before `High`,
/// which fully drains before `Normal`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum OperationPriority {
    Normal,
    High,
    Highest,
}

/// The concrete action a worker performs when it dequeues an operation.
///
/// This is the safe-Rust replacement for a `QUIC_OPERATION` tagged union
/// keyed by a `QUIC_OPERATION_TYPE` enum: each variant carries exactly the
/// payload its handler needs, so there is no separate "type tag plus untyped
/// union" step and no way to read a field that does not belong to the
/// active variant.
pub enum OperationKind {
    ConnectionClose,
    ConnectionShutdown {
        error_code: u64,
        flags: ConnectionShutdownFlags,
    },
    ConnectionStart {
        family: AddressFamily,
        server_name: Option<String>,
        server_port: u16,
    },
    ConnectionSetConfiguration {
        configuration: crate::handle::Handle,
    },
    ConnectionSendResumptionTicket {
        flags: SendResumptionTicketFlags,
        ticket: Vec<u8>,
    },
    ConnectionCompleteResumptionTicketValidation {
        accept: bool,
    },
    ConnectionCompleteCertificateValidation {
        accept: bool,
    },
    StreamClose { stream: Arc<Stream> },
    StreamStart {
        stream: Arc<Stream>,
        flags: StreamStartFlags,
    },
    StreamShutdown {
        stream: Arc<Stream>,
        error_code: u64,
        flags: StreamShutdownFlags,
    },
    StreamSend { stream: Arc<Stream> },
    /// Flushes the connection's queued datagram send requests (§6
    /// `DatagramSend`); the requests themselves already sit in
    /// [`crate::connection::Connection`]'s own queue, so this carries no
    /// payload of its own.
    DatagramSend,
    StreamReceiveSetEnabled {
        stream: Arc<Stream>,
        enabled: bool,
    },
    StreamReceiveComplete {
        stream: Arc<Stream>,
        length: u64,
    },
    StreamProvideReceiveBuffers {
        stream: Arc<Stream>,
        buffer: bytes::BytesMut,
    },
    GetParam {
        handle: ParamHandle,
        param: Param,
        flags: ParamFlags,
    },
    SetParam {
        handle: ParamHandle,
        param: Param,
        value: OpaqueContext,
        flags: ParamFlags,
    },
}

impl OperationKind {
    /// Operations that must run ahead of ordinary traffic: configuration
    /// changes and close/shutdown requests, which other queued operations
    /// should observe as already applied.
    pub fn default_priority(&self) -> OperationPriority {
        match self {
            Self::ConnectionClose | Self::ConnectionShutdown { .. } | Self::StreamClose { .. } => {
                OperationPriority::Highest
            }
            Self::ConnectionSetConfiguration { .. } => OperationPriority::High,
            Self::StreamStart { flags, .. } if flags.contains(crate::flags::StreamStartFlag::Priority) => {
                OperationPriority::High
            }
            Self::GetParam { flags, .. } | Self::SetParam { flags, .. } if flags.contains(ParamFlag::HighPriority) => {
                OperationPriority::High
            }
            Self::StreamSend { .. } => OperationPriority::Normal,
            _ => OperationPriority::Normal,
        }
    }
}

/// A blocking rendezvous between an API call waiting for a queued
/// operation to finish and the worker thread that processes it.
///
/// Only calls without an `Inline`/async opt-out block on this; most public
/// entry points return `Pending` instead and let the application's own
/// callback observe completion.
#[derive(Default)]
pub struct CompletionEvent {
    status: Mutex<Option<Status>>,
    condvar: Condvar,
}

impl CompletionEvent {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Blocks the calling thread until [`CompletionEvent::signal`] is
    /// called, then returns the status it was given.
    pub fn wait(&self) -> Status {
        let mut guard = self.status.lock();
        while guard.is_none() {
            self.condvar.wait(&mut guard);
        }
        guard.take().expect("checked is_none above")
    }

    /// Blocks with a timeout; returns `None` if the timeout elapsed first.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Status> {
        let mut guard = self.status.lock();
        if guard.is_none() {
            let result = self.condvar.wait_for(&mut guard, timeout);
            if result.timed_out() && guard.is_none() {
                return None;
            }
        }
        guard.take()
    }

    pub fn signal(&self, status: Status) {
        *self.status.lock() = Some(status);
        self.condvar.notify_one();
    }
}

/// One queued unit of work.
pub struct Operation {
    pub kind: OperationKind,
    /// Whether the worker must drop this operation's allocation back to
    /// the pool after processing it, as opposed to a caller-owned
    /// operation the caller itself frees (not used by this crate's public
    /// API, which always frees operations itself, but kept distinct from
    /// `completion` to mirror the specification's own field).
    pub free_after_process: bool,
    /// Present for calls that block on completion; `None` for calls that
    /// complete asynchronously via the connection/stream callback instead.
    pub completion: Option<Arc<CompletionEvent>>,
    /// Held for the operation's lifetime so the pool's capacity is given
    /// back automatically once the worker finishes (or drops) it. `None`
    /// for an operation queued through the reserved back-up slot, which
    /// does not draw from the pool at all.
    reservation: Option<PoolReservation>,
}

impl Operation {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            free_after_process: true,
            completion: None,
            reservation: None,
        }
    }

    pub fn with_completion(kind: OperationKind) -> (Self, Arc<CompletionEvent>) {
        let completion = CompletionEvent::new();
        let operation = Self {
            kind,
            free_after_process: true,
            completion: Some(completion.clone()),
            reservation: None,
        };
        (operation, completion)
    }

    /// Attaches a pool reservation so its capacity is released once this
    /// operation is dropped.
    pub fn with_reservation(mut self, reservation: PoolReservation) -> Self {
        self.reservation = Some(reservation);
        self
    }

    pub fn priority(&self) -> OperationPriority {
        self.kind.default_priority()
    }
}

/// A bounded-capacity allocator standing in for the reference
/// implementation's pooled allocator running out of memory.
///
/// Real OOM is not reproducible deterministically, so this crate models it
/// as a fixed budget of outstanding operations per partition: once
/// `capacity` operations are allocated and not yet released, further
/// allocation attempts observe [`Status::OutOfMemory`], exactly as a real
/// allocator failure would. [`Connection::queue_or_backup`] is what
/// survives that failure using the reserved back-up slot.
///
/// [`Connection::queue_or_backup`]: crate::connection::Connection::queue_or_backup
pub struct OperationPool {
    capacity: usize,
    outstanding: AtomicUsize,
}

impl OperationPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            outstanding: AtomicUsize::new(0),
        }
    }

    /// Attempts to reserve capacity for one operation. Returns a guard that
    /// releases the reservation on drop, or `OutOfMemory` if the pool is
    /// already at capacity.
    pub fn try_reserve(self: &Arc<Self>) -> Result<PoolReservation, Status> {
        loop {
            let current = self.outstanding.load(Ordering::Acquire);
            if current >= self.capacity {
                return Err(Status::OutOfMemory);
            }
            if self
                .outstanding
                .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(PoolReservation { pool: self.clone() });
            }
        }
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// RAII handle on one unit of an [`OperationPool`]'s capacity.
pub struct PoolReservation {
    pool: Arc<OperationPool>,
}

impl Drop for PoolReservation {
    fn drop(&mut self) {
        self.pool.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn completion_event_delivers_the_signaled_status() {
        let event = CompletionEvent::new();
        let waiter = event.clone();
        let handle = thread::spawn(move || waiter.wait());
        // Give the waiter a moment to block; not required for correctness,
        // `signal` is safe to call before `wait` begins either way.
        event.signal(Status::Success);
        assert_eq!(handle.join().unwrap(), Status::Success);
    }

    #[test]
    fn wait_timeout_reports_none_when_never_signaled() {
        let event = CompletionEvent::new();
        assert_eq!(event.wait_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn pool_refuses_allocation_past_capacity() {
        let pool = Arc::new(OperationPool::new(1));
        let first = pool.try_reserve().unwrap();
        assert!(matches!(pool.try_reserve(), Err(Status::OutOfMemory)));
        drop(first);
        assert!(pool.try_reserve().is_ok());
    }

    #[test]
    fn high_priority_param_flag_selects_the_high_priority_lane() {
        let get = OperationKind::GetParam {
            handle: None,
            param: crate::param::Param::ConnectionIdleTimeoutMs,
            flags: ParamFlag::HighPriority.into(),
        };
        assert_eq!(get.default_priority(), OperationPriority::High);

        let set = OperationKind::SetParam {
            handle: None,
            param: crate::param::Param::ConnectionIdleTimeoutMs,
            value: OpaqueContext::new(0u32),
            flags: ParamFlags::empty(),
        };
        assert_eq!(set.default_priority(), OperationPriority::Normal);
    }
}
