//! Stream state machine, send queue, and receive accounting (§4.7).

pub mod recv;
pub mod send_queue;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::connection::Connection;
use crate::context::OpaqueContext;
use crate::error::Status;
use crate::flags::{StreamShutdownFlag, StreamShutdownFlags, StreamStateFlag, StreamStateFlags};
use crate::refcount::{RefCounts, RefKind};
use crate::state::AtomicFlags;

pub use recv::{CompletionOutcome, ReceiveChunk, ReceiveCompletionCounter};
pub use send_queue::{SendRequest, SendRequestQueue};

/// Application-visible events delivered through a [`StreamCallback`].
///
/// Every variant here corresponds to a callback event in §4.7; the
/// specification's single tagged-union callback type becomes a Rust enum
/// matched with an exhaustive `match`, which is the idiom the examples use
/// for their own event/message enums rather than a C-style function-pointer
/// table with an opcode field.
#[derive(Debug)]
pub enum StreamEvent {
    /// `StreamStart` has completed; `status` is `Success` or the failure
    /// reason.
    StartComplete { status: Status },
    /// New data is available; `chunk` borrows into either a library-owned
    /// buffer or one the application supplied via
    /// `StreamProvideReceiveBuffers`.
    Receive { chunk: ReceiveChunk },
    /// A previously queued `StreamSend` has completed.
    SendComplete {
        canceled: bool,
        client_context: Option<OpaqueContext>,
    },
    /// The peer signaled it will send no more data on this stream.
    PeerSendShutdown,
    /// The peer reset its send direction with `error_code`.
    PeerSendAborted { error_code: u64 },
    /// The peer requested this side stop sending, with `error_code`.
    PeerReceiveAborted { error_code: u64 },
    /// This side's send direction has fully drained (graceful) or been
    /// reset (abortive); `graceful` distinguishes the two.
    SendShutdownComplete { graceful: bool },
    /// Both directions are fully shut down and the handle may be closed.
    ShutdownComplete,
}

/// Receiver of [`StreamEvent`]s for a single stream.
pub trait StreamCallback: Send + Sync {
    fn on_event(&self, stream: &Arc<Stream>, event: StreamEvent);
}

/// What a caller of [`Stream::complete_receive`] must do next.
#[derive(Debug, PartialEq, Eq)]
pub enum ReceiveCompletionAction {
    /// No operation needs to be queued; an active `Receive` callback will
    /// observe the updated total when it returns.
    None,
    /// Queue a `StreamReceiveComplete` operation so the application's
    /// accounting advances even though no `Receive` callback is active.
    QueueCompletionOperation,
    /// The application reported an impossible completion length; the
    /// connection must be torn down via the back-up operation.
    FatalOverflow,
}

/// A single QUIC-style stream.
pub struct Stream {
    id: u64,
    connection: Arc<Connection>,
    state: AtomicFlags<StreamStateFlag>,
    refs: RefCounts,
    send_requests: Mutex<SendRequestQueue>,
    /// Guarantees "only one flush in flight" (§4.5 invariant 4): a worker
    /// that finds this already `true` knows a send flush for this stream is
    /// already scheduled and does not need to queue another.
    flush_in_flight: AtomicBool,
    recv_completion: ReceiveCompletionCounter,
    recv_chunks: Mutex<Vec<ReceiveChunk>>,
    bytes_sent: AtomicU64,
    callback: Arc<dyn StreamCallback>,
    client_context: Mutex<Option<OpaqueContext>>,
}

impl Stream {
    pub fn new(id: u64, connection: Arc<Connection>, callback: Arc<dyn StreamCallback>) -> Arc<Self> {
        let stream = Arc::new(Self {
            id,
            connection,
            state: AtomicFlags::default(),
            refs: RefCounts::new(),
            send_requests: Mutex::new(SendRequestQueue::new()),
            flush_in_flight: AtomicBool::new(false),
            recv_completion: ReceiveCompletionCounter::new(),
            recv_chunks: Mutex::new(Vec::new()),
            bytes_sent: AtomicU64::new(0),
            callback,
            client_context: Mutex::new(None),
        });
        stream.refs.add_ref(RefKind::HandleOwner);
        stream
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn connection(&self) -> Arc<Connection> {
        self.connection.clone()
    }

    pub fn refs(&self) -> &RefCounts {
        &self.refs
    }

    pub fn state(&self) -> StreamStateFlags {
        self.state.get()
    }

    pub fn is_started(&self) -> bool {
        self.state.contains(StreamStateFlag::Started)
    }

    pub fn is_freed(&self) -> bool {
        self.state.contains(StreamStateFlag::Freed)
    }

    pub fn is_handle_closed(&self) -> bool {
        self.state.contains(StreamStateFlag::HandleClosed)
    }

    /// Whether the send direction currently accepts `StreamSend` calls:
    /// cleared once either direction's shutdown starts processing (§4.7).
    pub fn is_send_enabled(&self) -> bool {
        self.state.contains(StreamStateFlag::SendEnabled)
    }

    /// Whether the peer has sent `STOP_SENDING` on this stream; distinguishes
    /// `Aborted` from `InvalidState` when a send is rejected (§4.3 Special
    /// StreamSend flow).
    pub fn received_stop_sending(&self) -> bool {
        self.state.contains(StreamStateFlag::ReceivedStopSending)
    }

    /// Both directions have reached a terminal shutdown state (§4.7); once
    /// true, `StreamClose` no longer needs to block the caller.
    pub fn is_shutdown_complete(&self) -> bool {
        self.state.contains(StreamStateFlag::SendShutdownComplete)
            && self.state.contains(StreamStateFlag::RecvShutdownComplete)
    }

    /// Clears `SendEnabled` and marks the send direction's shutdown
    /// complete; called once for a `Graceful` or `AbortSend` shutdown.
    pub fn mark_send_shutdown_complete(&self) {
        self.state.remove(StreamStateFlag::SendEnabled);
        self.state.insert(StreamStateFlag::SendShutdownComplete);
    }

    /// Marks the receive direction's shutdown complete; called for an
    /// `AbortReceive` shutdown.
    pub fn mark_recv_shutdown_complete(&self) {
        self.state.insert(StreamStateFlag::RecvShutdownComplete);
    }

    pub fn mark_started(&self) {
        self.state.insert(StreamStateFlag::Started);
        self.state.insert(StreamStateFlag::SendEnabled);
    }

    pub fn mark_handle_closed(&self) {
        self.state.insert(StreamStateFlag::HandleClosed);
    }

    pub fn mark_freed(&self) {
        self.state.insert(StreamStateFlag::Freed);
    }

    pub fn set_client_context(&self, context: Option<OpaqueContext>) {
        *self.client_context.lock() = context;
    }

    pub fn take_client_context(&self) -> Option<OpaqueContext> {
        self.client_context.lock().take()
    }

    pub fn emit(self: &Arc<Self>, event: StreamEvent) {
        self.callback.on_event(self, event);
    }

    /// Enqueues a send request. Returns whether the caller must also queue
    /// a `StreamSend` flush operation: `true` the first time data lands on
    /// an otherwise-idle stream, `false` if a flush is already in flight
    /// and will pick this request up too.
    pub fn queue_send(&self, request: SendRequest) -> bool {
        let was_empty = self.send_requests.lock().push(request);
        was_empty && !self.flush_in_flight.swap(true, Ordering::AcqRel)
    }

    /// Drains every queued send request for the worker to flush in one
    /// pass, and clears the in-flight flag so a subsequent `StreamSend`
    /// schedules a fresh flush.
    pub fn drain_send_requests(&self) -> Vec<SendRequest> {
        let drained = self.send_requests.lock().drain();
        self.flush_in_flight.store(false, Ordering::Release);
        drained
    }

    pub fn record_bytes_sent(&self, length: u64) {
        self.bytes_sent.fetch_add(length, Ordering::AcqRel);
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Acquire)
    }

    /// Marks a `Receive` callback as currently outstanding or not; used by
    /// the worker immediately before/after invoking the callback so that
    /// [`Stream::complete_receive`] knows whether it needs to schedule a
    /// completion operation.
    pub fn set_receive_active(&self, active: bool) {
        self.recv_completion.set_receive_active(active);
    }

    /// Accounts for `length` bytes completed by the application, per §4.7
    /// invariant 5.
    pub fn complete_receive(&self, length: u64) -> ReceiveCompletionAction {
        match self.recv_completion.complete(length) {
            CompletionOutcome::Completed { receive_active: true } => ReceiveCompletionAction::None,
            CompletionOutcome::Completed { receive_active: false } => {
                ReceiveCompletionAction::QueueCompletionOperation
            }
            CompletionOutcome::CanaryOverflow => ReceiveCompletionAction::FatalOverflow,
        }
    }

    pub fn completed_receive_length(&self) -> u64 {
        self.recv_completion.completed_length()
    }

    /// Links an application-supplied receive buffer, switching the stream
    /// to app-owned receive buffers if it has not already switched.
    pub fn provide_receive_buffer(&self, chunk: ReceiveChunk) {
        self.state.insert(StreamStateFlag::UseAppOwnedRecvBuffers);
        self.recv_chunks.lock().push(chunk);
    }

    pub fn uses_app_owned_receive_buffers(&self) -> bool {
        self.state.contains(StreamStateFlag::UseAppOwnedRecvBuffers)
    }
}

/// Rejects illegal `StreamShutdown` flag combinations before anything is
/// queued (§4.7).
///
/// `Abort` must co-occur with both `AbortSend` and `AbortReceive`, and
/// `Graceful` cannot be combined with either abort direction: a stream
/// cannot be finished cleanly and reset at the same time.
pub fn validate_shutdown_flags(flags: StreamShutdownFlags) -> Result<(), Status> {
    let aborting = flags.intersects(StreamShutdownFlag::AbortSend | StreamShutdownFlag::AbortReceive);
    if flags.contains(StreamShutdownFlag::Graceful) && (aborting || flags.contains(StreamShutdownFlag::Immediate)) {
        return Err(Status::InvalidParameter);
    }
    if flags.contains(StreamShutdownFlag::Abort)
        && !flags.contains(StreamShutdownFlag::AbortSend | StreamShutdownFlag::AbortReceive)
    {
        return Err(Status::InvalidParameter);
    }
    if flags.contains(StreamShutdownFlag::Immediate)
        && !flags.contains(StreamShutdownFlag::AbortSend | StreamShutdownFlag::AbortReceive)
    {
        return Err(Status::InvalidParameter);
    }
    if !flags.contains(StreamShutdownFlag::Graceful) && !aborting {
        return Err(Status::InvalidParameter);
    }
    Ok(())
}
