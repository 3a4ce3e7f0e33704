//! Bit-flag types accepted by the public API, built on `enumflags2` the way
//! the teacher crate uses it for its own protocol-level flag sets.

use enumflags2::{BitFlags, bitflags};

/// Flags accepted by `ConnectionShutdown`.
#[bitflags]
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionShutdownFlag {
    /// Suppress the peer-visible `CONNECTION_CLOSE` frame; used for
    /// OOM-recovery shutdowns and other cases where signaling the peer
    /// would itself require an allocation.
    Silent,
}
pub type ConnectionShutdownFlags = BitFlags<ConnectionShutdownFlag>;

/// Flags accepted by `StreamOpen`.
#[bitflags]
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamOpenFlag {
    /// The stream is unidirectional (send-only for its initiator,
    /// receive-only for the peer).
    Unidirectional,
    /// Switch to application-owned receive buffers from the moment the
    /// stream starts, equivalent to calling `StreamProvideReceiveBuffers`
    /// inline from the peer-stream-started callback.
    Owned0RttBuffers,
}
pub type StreamOpenFlags = BitFlags<StreamOpenFlag>;

/// Flags accepted by `StreamStart`.
#[bitflags]
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamStartFlag {
    /// Enqueue the start operation ahead of normal-priority work.
    Priority,
}
pub type StreamStartFlags = BitFlags<StreamStartFlag>;

/// Flags accepted by `StreamSend`.
#[bitflags]
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamSendFlag {
    /// This is the last send on the stream; the peer observes `Fin` after
    /// the accompanying bytes.
    Fin,
    /// Enqueue the eventual flush operation ahead of normal-priority work.
    Priority,
}
pub type StreamSendFlags = BitFlags<StreamSendFlag>;

/// Flags accepted by `StreamShutdown`. Validated by
/// [`crate::stream::validate_shutdown_flags`] against the combination
/// rules in §4.7.
#[bitflags]
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamShutdownFlag {
    /// Finish the send direction gracefully (send an implicit `Fin`);
    /// mutually exclusive with `Abort`/`Immediate`.
    Graceful,
    /// Abort the send direction with `error_code`.
    AbortSend,
    /// Abort the receive direction with `error_code`.
    AbortReceive,
    /// Shorthand for `AbortSend | AbortReceive`; must co-occur with both.
    Abort,
    /// Suppress the peer-visible reset/stop-sending frames.
    Silent,
    /// Run the shutdown handler inline if the calling thread happens to
    /// be the connection's worker (or custom executions are enabled).
    Inline,
    /// Suppress the intermediate per-direction shutdown-complete callback
    /// and deliver only the final `ShutdownComplete` once both directions
    /// are terminal. Must co-occur with both `AbortSend` and
    /// `AbortReceive`.
    Immediate,
}
pub type StreamShutdownFlags = BitFlags<StreamShutdownFlag>;

/// Flags accepted by `ConnectionSendResumptionTicket`.
#[bitflags]
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendResumptionTicketFlag {
    /// Do not allow further resumption tickets to be sent on this
    /// connection after this one.
    Final,
}
pub type SendResumptionTicketFlags = BitFlags<SendResumptionTicketFlag>;

/// Flags accepted by `DatagramSend`.
#[bitflags]
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DatagramSendFlag {
    /// The caller does not need delivery confirmation (the default and, at
    /// present, the only send mode a datagram supports).
    Unreliable,
}
pub type DatagramSendFlags = BitFlags<DatagramSendFlag>;

/// The high-priority bit threaded through `GetParam`/`SetParam`.
#[bitflags]
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamFlag {
    HighPriority,
}
pub type ParamFlags = BitFlags<ParamFlag>;

/// Connection state-machine bits (§4.6), stored in a
/// [`crate::state::AtomicFlags`] rather than as a C-style `union` of packed
/// bitfields.
#[bitflags]
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStateFlag {
    /// `ConnectionStart` (client) or acceptance (server) has happened.
    Started,
    /// The handshake has completed in both directions.
    Connected,
    /// The local application called `ConnectionShutdown` or `ConnectionClose`.
    ClosedLocally,
    /// A peer-initiated close was observed.
    ClosedRemotely,
    /// The application released its `HandleOwner` reference.
    HandleClosed,
    /// Teardown has fully completed; the handle is a stale reference from
    /// here on (§3 invariant 2).
    Freed,
    /// The current thread is the connection's worker thread, or custom
    /// inline execution has been enabled for it (§4.3 decision tree).
    InlineApiExecution,
    /// 0-RTT resumption is enabled for this connection.
    ResumptionEnabled,
}
pub type ConnectionStateFlags = BitFlags<ConnectionStateFlag>;

/// Stream state-machine bits (§4.7).
#[bitflags]
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamStateFlag {
    /// `StreamStart` has been accepted (locally initiated) or the peer has
    /// opened this stream ID (peer initiated).
    Started,
    /// The send direction is open; clear once FIN/RESET has been sent.
    SendEnabled,
    /// The peer sent `STOP_SENDING`.
    ReceivedStopSending,
    /// A `PeerStreamStarted` callback invocation is currently outstanding;
    /// guards against a second one for the same stream (§4.7 edge case).
    PeerStreamStartEventActive,
    /// `StreamProvideReceiveBuffers` has switched this stream to
    /// application-owned receive buffers.
    UseAppOwnedRecvBuffers,
    /// The application released its `HandleOwner` reference.
    HandleClosed,
    /// Teardown has fully completed.
    Freed,
    /// The send direction has delivered its final completion
    /// (`send_shutdown_complete`).
    SendShutdownComplete,
    /// The receive direction has delivered its final completion.
    RecvShutdownComplete,
    /// Every byte handed to `StreamSend` has been completed.
    AllDataSent,
}
pub type StreamStateFlags = BitFlags<StreamStateFlag>;
