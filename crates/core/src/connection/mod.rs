//! Connection state machine, worker scheduling, and the OOM back-up path
//! (§4.3, §4.4, §4.6).

mod dispatch;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::context::OpaqueContext;
use crate::datagram::{DatagramQueue, DatagramRequest};
use crate::error::{ApiResult, Status};
use crate::flags::{ConnectionStateFlag, ConnectionStateFlags};
use crate::handle::Role;
use crate::operation::{CompletionEvent, Operation, OperationKind};
use crate::partition::{self, Partition};
use crate::refcount::{RefCounts, RefKind};
use crate::registration::Configuration;
use crate::queue::OperationQueue;
use crate::state::AtomicFlags;
use crate::stream::Stream;

/// Application-visible events delivered through a [`ConnectionCallback`].
#[derive(Debug)]
pub enum ConnectionEvent {
    Connected,
    /// The local transport (idle timeout, handshake failure, ...) initiated
    /// shutdown; `status` explains why.
    ShutdownInitiatedByTransport { status: Status },
    /// The peer sent a `CONNECTION_CLOSE` with `error_code`.
    ShutdownInitiatedByPeer { error_code: u64 },
    /// A previously queued `DatagramSend` has completed.
    DatagramSendStateChanged {
        canceled: bool,
        client_context: Option<OpaqueContext>,
    },
    /// Both directions of shutdown have completed; the handle may now be
    /// closed. `error_code` is whatever was passed to `ConnectionShutdown`
    /// (0 for a transport- or peer-initiated close).
    ShutdownComplete { handshake_completed: bool, error_code: u64 },
    /// The peer opened a new stream.
    PeerStreamStarted { stream: Arc<Stream> },
    /// The peer's advertised stream limit increased, unblocking
    /// previously queued `StreamStart` calls.
    StreamsAvailable { bidirectional: bool },
    /// A resumption ticket arrived from the peer (server) or was minted
    /// locally and needs this side's attention (client path differs from
    /// the reference implementation only in that this crate does not
    /// perform actual cryptography; see Non-goals).
    ResumptionTicketReceived { ticket: Vec<u8> },
}

/// Receiver of [`ConnectionEvent`]s for a single connection.
pub trait ConnectionCallback: Send + Sync {
    fn on_event(&self, connection: &Arc<Connection>, event: ConnectionEvent);
}

/// A single QUIC-style connection.
pub struct Connection {
    role: Role,
    partition: Arc<Partition>,
    state: AtomicFlags<ConnectionStateFlag>,
    worker_thread_id: Mutex<Option<ThreadId>>,
    refs: RefCounts,
    queue: OperationQueue,
    /// Set while this connection is either sitting in its partition's
    /// ready list or being drained by the worker, so
    /// [`Connection::schedule`] does not enqueue it twice.
    scheduled: AtomicBool,
    configuration: Mutex<Option<Arc<Configuration>>>,
    server_name: Mutex<Option<String>>,
    streams: Mutex<HashMap<u64, Arc<Stream>>>,
    next_stream_id: AtomicU64,
    datagrams: Mutex<DatagramQueue>,
    /// Same "only one flush in flight" discipline as
    /// [`crate::stream::Stream::flush_in_flight`], applied to the
    /// connection-level datagram queue instead of a per-stream one.
    datagram_flush_in_flight: AtomicBool,
    /// CAS-claimed once per connection (§4.4): the single reserved
    /// operation slot that lets an `OutOfMemory` pool still report the
    /// failure and tear the connection down instead of silently stalling.
    backup_oper_claimed: AtomicBool,
    /// The `error_code` given to the `ConnectionShutdown` that finishes this
    /// connection, surfaced on the eventual `ShutdownComplete` event.
    shutdown_error_code: AtomicU64,
    callback: Arc<dyn ConnectionCallback>,
    client_context: Mutex<Option<OpaqueContext>>,
}

impl Connection {
    fn new(role: Role, partition: Arc<Partition>, callback: Arc<dyn ConnectionCallback>) -> Arc<Self> {
        let connection = Arc::new(Self {
            role,
            partition,
            state: AtomicFlags::default(),
            worker_thread_id: Mutex::new(None),
            refs: RefCounts::new(),
            queue: OperationQueue::new(),
            scheduled: AtomicBool::new(false),
            configuration: Mutex::new(None),
            server_name: Mutex::new(None),
            streams: Mutex::new(HashMap::new()),
            next_stream_id: AtomicU64::new(0),
            datagrams: Mutex::new(DatagramQueue::new()),
            datagram_flush_in_flight: AtomicBool::new(false),
            backup_oper_claimed: AtomicBool::new(false),
            shutdown_error_code: AtomicU64::new(0),
            callback,
            client_context: Mutex::new(None),
        });
        connection.refs.add_ref(RefKind::HandleOwner);
        connection
    }

    pub fn new_client(partition: Arc<Partition>) -> Arc<Self> {
        Self::new(Role::Client, partition, Arc::new(SilentCallback))
    }

    pub fn new_server(partition: Arc<Partition>) -> Arc<Self> {
        Self::new(Role::Server, partition, Arc::new(SilentCallback))
    }

    pub fn with_callback(role: Role, partition: Arc<Partition>, callback: Arc<dyn ConnectionCallback>) -> Arc<Self> {
        Self::new(role, partition, callback)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_client(&self) -> bool {
        self.role == Role::Client
    }

    pub fn partition(&self) -> &Arc<Partition> {
        &self.partition
    }

    pub fn refs(&self) -> &RefCounts {
        &self.refs
    }

    pub fn state(&self) -> ConnectionStateFlags {
        self.state.get()
    }

    pub fn is_started(&self) -> bool {
        self.state.contains(ConnectionStateFlag::Started)
    }

    pub fn is_connected(&self) -> bool {
        self.state.contains(ConnectionStateFlag::Connected)
    }

    pub fn is_closed_locally(&self) -> bool {
        self.state.contains(ConnectionStateFlag::ClosedLocally)
    }

    pub fn is_handle_closed(&self) -> bool {
        self.state.contains(ConnectionStateFlag::HandleClosed)
    }

    pub fn is_freed(&self) -> bool {
        self.state.contains(ConnectionStateFlag::Freed)
    }

    /// Whether `ConnectionSendResumptionTicket` is currently allowed (§4.6):
    /// set once a configuration enabling 0-RTT resumption has been applied.
    pub fn is_resumption_enabled(&self) -> bool {
        self.state.contains(ConnectionStateFlag::ResumptionEnabled)
    }

    /// Records the `error_code` a `ConnectionShutdown` call supplied, so it
    /// can be surfaced on the eventual `ShutdownComplete` event.
    pub fn set_shutdown_error_code(&self, error_code: u64) {
        self.shutdown_error_code.store(error_code, Ordering::Release);
    }

    pub fn shutdown_error_code(&self) -> u64 {
        self.shutdown_error_code.load(Ordering::Acquire)
    }

    pub fn mark_handle_closed(&self) {
        self.state.insert(ConnectionStateFlag::HandleClosed);
    }

    pub fn mark_freed(&self) {
        self.state.insert(ConnectionStateFlag::Freed);
    }

    #[doc(hidden)]
    pub fn mark_freed_for_test(&self) {
        self.mark_freed();
    }

    pub fn set_client_context(&self, context: Option<OpaqueContext>) {
        *self.client_context.lock() = context;
    }

    pub fn take_client_context(&self) -> Option<OpaqueContext> {
        self.client_context.lock().take()
    }

    pub fn set_configuration(&self, configuration: Arc<Configuration>) {
        *self.configuration.lock() = Some(configuration);
    }

    pub fn configuration(&self) -> Option<Arc<Configuration>> {
        self.configuration.lock().clone()
    }

    pub fn set_server_name(&self, name: impl Into<String>) {
        *self.server_name.lock() = Some(name.into());
    }

    pub fn emit(self: &Arc<Self>, event: ConnectionEvent) {
        self.callback.on_event(self, event);
    }

    pub fn insert_stream(&self, stream: Arc<Stream>) {
        self.streams.lock().insert(stream.id(), stream);
    }

    /// Removes a stream from this connection's owned-streams map, breaking
    /// the `Stream -> Arc<Connection> -> streams -> Arc<Stream>` cycle.
    /// Called once a stream's own teardown has fully completed (§9 design
    /// note: streams hold a strong reference to their connection, so
    /// something on the way out has to break the cycle explicitly rather
    /// than relying on `Weak`).
    pub fn remove_stream(&self, stream_id: u64) -> Option<Arc<Stream>> {
        self.streams.lock().remove(&stream_id)
    }

    pub fn stream(&self, stream_id: u64) -> Option<Arc<Stream>> {
        self.streams.lock().get(&stream_id).cloned()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.lock().len()
    }

    pub fn allocate_stream_id(&self) -> u64 {
        self.next_stream_id.fetch_add(1, Ordering::AcqRel)
    }

    /// Enqueues a datagram send request. Returns whether the caller must
    /// also submit a `DatagramSend` flush operation, mirroring
    /// [`crate::stream::Stream::queue_send`].
    pub fn queue_datagram(&self, request: DatagramRequest) -> bool {
        let was_empty = self.datagrams.lock().push(request);
        was_empty && !self.datagram_flush_in_flight.swap(true, Ordering::AcqRel)
    }

    pub fn drain_datagrams(&self) -> Vec<DatagramRequest> {
        let drained = self.datagrams.lock().drain();
        self.datagram_flush_in_flight.store(false, Ordering::Release);
        drained
    }

    /// True if the calling thread is this connection's pinned worker
    /// thread. Before the first operation has ever run, no thread is the
    /// worker yet, so this is `false`.
    pub fn is_worker_thread(&self) -> bool {
        self.worker_thread_id
            .lock()
            .is_some_and(|id| id == thread::current().id())
    }

    /// §4.3 inline-execution decision: a call that would otherwise be
    /// queued can instead run synchronously on the calling thread if that
    /// thread is already this connection's worker (re-entrant call from
    /// within a callback) or the caller explicitly opted into inline
    /// execution.
    pub fn should_run_inline(&self) -> bool {
        self.is_worker_thread() || self.state.contains(ConnectionStateFlag::InlineApiExecution)
    }

    pub fn set_inline_api_execution(&self, enabled: bool) {
        if enabled {
            self.state.insert(ConnectionStateFlag::InlineApiExecution);
        } else {
            self.state.remove(ConnectionStateFlag::InlineApiExecution);
        }
    }

    /// Runs `kind` synchronously on the calling thread, bypassing the
    /// queue entirely. Only correct to call when
    /// [`Connection::should_run_inline`] has already returned `true`.
    pub fn run_inline(self: &Arc<Self>, kind: OperationKind) -> Status {
        dispatch::process_kind(self, &kind)
    }

    /// Queues `operation`, first attempting the partition's pooled
    /// allocator and falling back to the connection's single reserved
    /// back-up slot if the pool is exhausted (§4.4).
    ///
    /// The back-up slot itself can only ever be claimed once per
    /// connection: a second `OutOfMemory` while it is still in use is
    /// unrecoverable and reported as such, matching the specification's
    /// "OOM during OOM recovery is fatal" rule.
    pub fn queue_or_backup(self: &Arc<Self>, kind: OperationKind) -> ApiResult<()> {
        match self.partition.pool().try_reserve() {
            Ok(reservation) => {
                let operation = Operation::new(kind).with_reservation(reservation);
                self.enqueue(operation);
                Ok(())
            }
            Err(_) => {
                if self.backup_oper_claimed.swap(true, Ordering::AcqRel) {
                    tracing::error!("operation pool exhausted and back-up slot already used; connection is stuck");
                    return Err(Status::OutOfMemory);
                }
                tracing::warn!("operation pool exhausted; falling back to the reserved silent-shutdown slot");
                let operation = Operation::new(OperationKind::ConnectionShutdown {
                    error_code: 0,
                    flags: crate::flags::ConnectionShutdownFlag::Silent.into(),
                });
                self.enqueue(operation);
                Err(Status::OutOfMemory)
            }
        }
    }

    /// Queues `operation` and blocks the calling thread until it has been
    /// processed, returning the status the worker signaled.
    pub fn queue_and_wait(self: &Arc<Self>, kind: OperationKind) -> ApiResult<Status> {
        let reservation = self.partition.pool().try_reserve().map_err(|_| Status::OutOfMemory)?;
        let (operation, completion) = Operation::with_completion(kind);
        let operation = operation.with_reservation(reservation);
        self.enqueue(operation);
        Ok(completion.wait())
    }

    /// Every queued (not inline) operation holds one `Operation` reference
    /// on its connection for as long as it sits in the queue or is being
    /// processed, released in [`Connection::drain_on_worker`] once the
    /// worker finishes it. This is what lets a `ConnectionClose` that
    /// still has operations in flight defer the final free instead of
    /// racing them.
    fn enqueue(self: &Arc<Self>, operation: Operation) {
        self.refs.add_ref(RefKind::Operation);
        self.queue.enqueue(operation);
        self.schedule();
    }

    /// Adds this connection to its partition's ready list if it is not
    /// already there or being drained.
    fn schedule(self: &Arc<Self>) {
        if !self.scheduled.swap(true, Ordering::AcqRel) {
            partition::schedule(&self.partition, self.clone());
        }
    }

    /// Runs on the worker thread: pins `worker_thread_id` to the current
    /// thread, drains every queued operation, then clears the scheduled
    /// flag so a concurrent `enqueue` is not lost (re-checked after
    /// clearing, per the classic "drain then recheck" dequeue pattern).
    pub(crate) fn drain_on_worker(self: &Arc<Self>) {
        *self.worker_thread_id.lock() = Some(thread::current().id());
        loop {
            while let Some(operation) = self.queue.dequeue_next() {
                dispatch::process(self, operation);
                if self.refs.release_ref(RefKind::Operation) {
                    self.mark_freed();
                }
            }
            self.scheduled.store(false, Ordering::Release);
            if self.queue.is_empty() {
                break;
            }
            // Something was enqueued between the last dequeue and clearing
            // the flag; reclaim it instead of leaving it stranded.
            if self.scheduled.swap(true, Ordering::AcqRel) {
                break;
            }
        }
    }
}

struct SilentCallback;
impl ConnectionCallback for SilentCallback {
    fn on_event(&self, _connection: &Arc<Connection>, _event: ConnectionEvent) {}
}
