//! Status codes returned across the public API boundary.
//!
//! Every public entry point in [`crate::api`] returns `Result<T, Status>`.
//! `Status` is deliberately a small `Copy` enum rather than a boxed error
//! chain: synchronous failures at this layer never carry an inner cause
//! worth attaching (the cause, if any, lives in a trace event logged at the
//! point of failure, e.g. [`crate::connection::dispatch`]'s canary-overflow
//! and OOM-escalation paths). Asynchronous failures (a peer closing
//! the connection, a transport timeout) are never returned as a `Status`;
//! they are delivered on the worker thread through
//! [`crate::connection::ConnectionEvent`].
//!
//! # Mapping
//!
//! This is a 1:1 rewrite of the `QUIC_STATUS` codes a caller of the
//! reference implementation would see; platform-specific codes are folded
//! into [`Status::Other`].

use thiserror::Error;

/// The result of a synchronous public API call.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum Status {
    /// The call completed synchronously and fully.
    #[error("the call completed successfully")]
    Success,
    /// The call was accepted and queued; completion (if any) is delivered
    /// asynchronously via a callback.
    #[error("the call is pending completion")]
    Pending,
    /// A handle, argument, or argument combination was invalid.
    #[error("an argument was invalid")]
    InvalidParameter,
    /// The call is not legal in the entity's current state.
    #[error("the call is invalid in the current state")]
    InvalidState,
    /// An allocation failed before any state was committed.
    #[error("an allocation failed")]
    OutOfMemory,
    /// The operation could not complete because the peer (or the local
    /// side) aborted the relevant stream or connection.
    #[error("the operation was aborted")]
    Aborted,
    /// The connection's idle or handshake timer fired.
    #[error("the connection timed out")]
    ConnectionTimeout,
    /// The connection was closed due to prolonged idleness.
    #[error("the connection was closed due to idleness")]
    ConnectionIdle,
    /// The application itself requested cancellation.
    #[error("the application canceled the operation")]
    UserCanceled,
    /// ALPN negotiation failed during the handshake.
    #[error("ALPN negotiation failed")]
    AlpnNegFailure,
    /// The peer refused the connection attempt.
    #[error("the peer refused the connection")]
    ConnectionRefused,
    /// The requested local address is already in use.
    #[error("the local address is already in use")]
    AddressInUse,
    /// The peer address is unreachable.
    #[error("the peer is unreachable")]
    Unreachable,
    /// A caller-supplied buffer was too small to hold the result; the
    /// required size is reported through the call's output parameter.
    #[error("the supplied buffer was too small")]
    BufferTooSmall,
    /// A platform-specific status code with no dedicated variant above.
    #[error("platform status code {0}")]
    Other(i32),
}

impl Status {
    /// True for [`Status::Success`].
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// True for [`Status::Pending`]: "no synchronous error; await the
    /// callback."
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Result type used throughout the public API.
pub type ApiResult<T> = std::result::Result<T, Status>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_and_success_are_distinguishable() {
        assert!(Status::Success.is_success());
        assert!(!Status::Success.is_pending());
        assert!(Status::Pending.is_pending());
        assert!(!Status::Pending.is_success());
    }

    #[test]
    fn other_carries_the_platform_code_in_display() {
        let status = Status::Other(-2147483640);
        assert!(format!("{status}").contains("-2147483640"));
    }
}
