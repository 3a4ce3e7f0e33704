//! `quinault_core` implements the connection-processing core of a QUIC-style
//! transport library: handle validation, per-connection operation queues
//! with three priority classes, an OOM-recovery back-up slot, per-stream
//! send/receive accounting, and the connection/stream state machines.
//!
//! What is deliberately **not** here: the wire format, packet
//! encode/decode, the TLS handshake, loss recovery, and congestion
//! control. This crate models what happens once a connection or stream
//! already exists and the application is driving it through the public
//! API in [`api`]; everything below that line is a collaborator this
//! crate only tracks reference counts for (see [`refcount::RefKind::Internal`]).

pub mod api;
pub mod connection;
pub mod context;
pub mod datagram;
pub mod error;
pub mod flags;
pub mod handle;
pub mod operation;
pub mod param;
pub mod partition;
pub mod queue;
pub mod refcount;
pub mod registration;
mod state;
pub mod stream;

pub use error::{ApiResult, Status};
pub use handle::{Handle, HandleKind, Role};

/// A list of things applications built on this crate typically need.
pub mod prelude {
    pub use crate::api::*;
    pub use crate::connection::{Connection, ConnectionCallback, ConnectionEvent};
    pub use crate::context::OpaqueContext;
    pub use crate::datagram::{DatagramQueue, DatagramRequest};
    pub use crate::error::{ApiResult, Status};
    pub use crate::flags::*;
    pub use crate::handle::{AddressFamily, Handle, HandleKind, Role};
    pub use crate::param::Param;
    pub use crate::partition::Partition;
    pub use crate::registration::{Configuration, Listener, Registration};
    pub use crate::stream::{Stream, StreamCallback, StreamEvent};
}
