//! Parameter identifiers for `GetParam`/`SetParam`.
//!
//! The specification leaves the exact parameter catalog to "the matching
//! handle kind"; this module defines the small set this crate itself
//! understands (the rest would be owned by the handshake engine, loss
//! recovery, etc., which are out of scope). Unrecognized parameters are
//! represented by [`Param::Other`] so the dispatcher can still route them
//! (and fail with `InvalidParameter` once it discovers no handler claims
//! them), matching a real deployment where most parameters belong to
//! out-of-scope collaborators.

/// A parameter level/identifier pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Param {
    /// Global settings, e.g. the configured worker-thread count.
    GlobalSettings,
    /// `QUIC_PARAM_CONN_STATISTICS`-style per-connection counters.
    ConnectionStatistics,
    /// The connection's negotiated idle timeout, in milliseconds.
    ConnectionIdleTimeoutMs,
    /// The stream's send priority, used to order `StreamSend` flushes
    /// relative to other streams on the same connection.
    StreamPriority,
    /// Any parameter identifier not recognized by this crate.
    Other(u32),
}
