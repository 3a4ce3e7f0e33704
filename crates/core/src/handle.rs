//! Opaque handle kinds and the tag-validation discipline every public entry
//! point runs before touching connection or stream state.
//!
//! Every value the application holds onto -- a registration, a configuration,
//! a listener, a connection, or a stream -- is represented here as one
//! variant of [`Handle`]. The variant itself *is* the kind tag: there is no
//! way to construct a [`Handle`] whose tag disagrees with the value it
//! carries, which is the safe-Rust replacement for msquic's `Handle->Type`
//! check on a raw pointer.

use std::fmt;
use std::sync::Arc;

use crate::connection::Connection;
use crate::error::Status;
use crate::registration::{Configuration, Listener, Registration};
use crate::stream::Stream;

/// The kind of entity a [`Handle`] refers to.
///
/// `ConnectionClient` and `ConnectionServer` are distinct tags even though
/// both wrap a [`Connection`]; a connection's role is fixed at open time and
/// never changes, so the tag a caller observes never changes either.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Registration,
    Configuration,
    Listener,
    ConnectionClient,
    ConnectionServer,
    Stream,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Registration => "Registration",
            Self::Configuration => "Configuration",
            Self::Listener => "Listener",
            Self::ConnectionClient => "ConnectionClient",
            Self::ConnectionServer => "ConnectionServer",
            Self::Stream => "Stream",
        };
        f.write_str(name)
    }
}

/// An opaque application-facing handle.
///
/// This is the Rust analogue of `HQUIC`: instead of an untyped pointer plus
/// a runtime type tag, the tag is encoded in the enum discriminant and the
/// compiler enforces that a `Handle::Stream` really does carry a
/// `Arc<Stream>`. Cloning a `Handle` is cheap (it clones the `Arc`) and does
/// not imply taking any of the reference-count kinds tracked in
/// [`crate::refcount`]; callers must add/release those explicitly at the
/// points the specification calls for it.
#[derive(Clone)]
pub enum Handle {
    Registration(Arc<Registration>),
    Configuration(Arc<Configuration>),
    Listener(Arc<Listener>),
    Connection(Arc<Connection>),
    Stream(Arc<Stream>),
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handle").field(&self.kind()).finish()
    }
}

impl Handle {
    /// Returns the tag a public API call would see for this handle.
    pub fn kind(&self) -> HandleKind {
        match self {
            Self::Registration(_) => HandleKind::Registration,
            Self::Configuration(_) => HandleKind::Configuration,
            Self::Listener(_) => HandleKind::Listener,
            Self::Connection(conn) => {
                if conn.is_client() {
                    HandleKind::ConnectionClient
                } else {
                    HandleKind::ConnectionServer
                }
            }
            Self::Stream(_) => HandleKind::Stream,
        }
    }

    /// Validates the handle is non-`Freed` and downcasts it to a connection.
    ///
    /// Mirrors `IS_CONN_HANDLE`: the check runs before any other field of
    /// the connection is touched.
    pub fn as_connection(&self) -> Result<&Arc<Connection>, Status> {
        match self {
            Self::Connection(conn) if !conn.is_freed() => Ok(conn),
            _ => Err(Status::InvalidParameter),
        }
    }

    /// Validates the handle is non-`Freed` and downcasts it to a stream.
    pub fn as_stream(&self) -> Result<&Arc<Stream>, Status> {
        match self {
            Self::Stream(stream) if !stream.is_freed() => Ok(stream),
            _ => Err(Status::InvalidParameter),
        }
    }

    pub fn as_registration(&self) -> Result<&Arc<Registration>, Status> {
        match self {
            Self::Registration(reg) => Ok(reg),
            _ => Err(Status::InvalidParameter),
        }
    }

    pub fn as_configuration(&self) -> Result<&Arc<Configuration>, Status> {
        match self {
            Self::Configuration(cfg) => Ok(cfg),
            _ => Err(Status::InvalidParameter),
        }
    }
}

impl From<Arc<Connection>> for Handle {
    fn from(conn: Arc<Connection>) -> Self {
        Self::Connection(conn)
    }
}

impl From<Arc<Stream>> for Handle {
    fn from(stream: Arc<Stream>) -> Self {
        Self::Stream(stream)
    }
}

/// A handle accepted by calls that operate on either a connection or a
/// stream (e.g. `ConnectionShutdown` is also reachable via a stream handle
/// that resolves to its parent connection, per §4.1).
pub enum ConnectionOrStream {
    Connection(Arc<Connection>),
    Stream(Arc<Stream>),
}

impl ConnectionOrStream {
    /// Resolves to the owning connection, dereferencing a stream's parent
    /// only after confirming the stream itself is not closed or freed.
    pub fn resolve_connection(&self) -> Result<Arc<Connection>, Status> {
        match self {
            Self::Connection(conn) => {
                if conn.is_freed() {
                    return Err(Status::InvalidParameter);
                }
                Ok(conn.clone())
            }
            Self::Stream(stream) => {
                if stream.is_freed() || stream.is_handle_closed() {
                    return Err(Status::InvalidParameter);
                }
                Ok(stream.connection())
            }
        }
    }
}

impl TryFrom<&Handle> for ConnectionOrStream {
    type Error = Status;

    fn try_from(handle: &Handle) -> Result<Self, Status> {
        match handle {
            Handle::Connection(conn) if !conn.is_freed() => Ok(Self::Connection(conn.clone())),
            Handle::Stream(stream) if !stream.is_freed() => Ok(Self::Stream(stream.clone())),
            _ => Err(Status::InvalidParameter),
        }
    }
}

/// The handle accepted by `GetParam`/`SetParam`: any handle kind, or
/// `None` for global (process-level) parameters.
pub type ParamHandle = Option<Handle>;

/// Client vs. server role, fixed for the lifetime of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Address family accepted by `ConnectionStart`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressFamily {
    Unspecified,
    Inet,
    Inet6,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::partition::Partition;
    use crate::registration::Registration;

    fn test_partition() -> Arc<Partition> {
        Partition::new_pool(1, 16)[0].clone()
    }

    #[test]
    fn registration_handle_is_not_a_connection() {
        let registration = Arc::new(Registration::new("test"));
        let handle = Handle::Registration(registration);
        assert_eq!(handle.kind(), HandleKind::Registration);
        assert!(matches!(handle.as_connection(), Err(Status::InvalidParameter)));
    }

    #[test]
    fn freed_connection_handle_is_rejected() {
        let partition = test_partition();
        let conn = Connection::new_client(partition);
        conn.mark_freed_for_test();
        let handle = Handle::Connection(conn);
        assert!(matches!(handle.as_connection(), Err(Status::InvalidParameter)));
    }

    #[test]
    fn client_and_server_connections_report_distinct_kinds() {
        let partition = test_partition();
        let client = Connection::new_client(partition.clone());
        let server = Connection::new_server(partition);
        assert_eq!(Handle::Connection(client).kind(), HandleKind::ConnectionClient);
        assert_eq!(Handle::Connection(server).kind(), HandleKind::ConnectionServer);
    }
}
