//! The public entry points (§6), each implementing the same decision tree:
//! validate the handle and arguments, copy any caller-owned buffers, then
//! either run inline or enqueue depending on §4.3, returning `Pending` for
//! anything that was queued.
//!
//! Every function here is a thin, stateless wrapper: the actual state lives
//! on [`Connection`]/[`Stream`], and the actual per-operation behavior
//! lives in [`crate::connection::dispatch`]. Keeping this module free of
//! its own state makes the decision tree itself auditable in one place,
//! the same way the teacher crate keeps its routing layer free of handler
//! state.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::connection::{Connection, ConnectionCallback};
use crate::context::OpaqueContext;
use crate::datagram::{self, DatagramRequest};
use crate::error::{ApiResult, Status};
use crate::flags::{
    ConnectionShutdownFlags, DatagramSendFlags, ParamFlags, SendResumptionTicketFlags, StreamOpenFlag,
    StreamOpenFlags, StreamSendFlags, StreamShutdownFlags, StreamStartFlags,
};
use crate::handle::{AddressFamily, ConnectionOrStream, Handle, ParamHandle};
use crate::operation::OperationKind;
use crate::param::Param;
use crate::partition::Partition;
use crate::refcount::RefKind;
use crate::registration::{Configuration, Registration};
use crate::stream::{self, SendRequest, Stream, StreamCallback};

/// Submits `kind` for processing on `connection`: inline if the calling
/// thread is eligible (§4.3), otherwise queued through the OOM-aware path
/// (§4.4). Queued calls report [`Status::Pending`]; the caller's own
/// callback observes the real outcome later.
fn submit(connection: &Arc<Connection>, kind: OperationKind) -> ApiResult<Status> {
    if connection.should_run_inline() {
        return Ok(connection.run_inline(kind));
    }
    match connection.queue_or_backup(kind) {
        Ok(()) => Ok(Status::Pending),
        Err(status) => Err(status),
    }
}

/// Same decision as [`submit`], except a call queued off the worker thread
/// blocks until the worker actually processes it instead of returning
/// `Pending` (§4.3: `ConnectionClose`, `StreamClose`, `GetParam`/`SetParam`
/// are blocking calls).
fn submit_blocking(connection: &Arc<Connection>, kind: OperationKind) -> ApiResult<Status> {
    if connection.should_run_inline() {
        return Ok(connection.run_inline(kind));
    }
    connection.queue_and_wait(kind)
}

/// The largest error code a variable-length QUIC integer can carry
/// (2^62 - 1), applied to `ConnectionShutdown`/`StreamShutdown`'s
/// `error_code` parameter (§6).
const MAX_ERROR_CODE: u64 = (1 << 62) - 1;

/// Opens a connection on the registration's next round-robin partition.
pub fn connection_open(
    registration: &Registration,
    partitions: &[Arc<Partition>],
    role: crate::handle::Role,
    callback: Arc<dyn ConnectionCallback>,
) -> ApiResult<Handle> {
    let index = registration.next_partition_index() as usize;
    let partition = partitions.get(index).ok_or(Status::InvalidParameter)?;
    Ok(connection_open_in_partition(partition.clone(), role, callback))
}

/// Opens a connection pinned to a specific partition, bypassing the
/// registration's round-robin assignment.
pub fn connection_open_in_partition(
    partition: Arc<Partition>,
    role: crate::handle::Role,
    callback: Arc<dyn ConnectionCallback>,
) -> Handle {
    let connection = Connection::with_callback(role, partition, callback);
    Handle::Connection(connection)
}

/// Releases the application's `HandleOwner` reference and queues final
/// teardown.
pub fn connection_close(handle: &Handle) -> ApiResult<()> {
    let connection = handle.as_connection()?;
    // Releasing the HandleOwner reference here does not by itself free the
    // connection; other reference kinds (queued operations, internal
    // collaborators) may still be outstanding, and final teardown happens
    // once they all drain (see `dispatch::finish_shutdown_if_ready`).
    connection.refs().release_ref(RefKind::HandleOwner);
    submit_blocking(connection, OperationKind::ConnectionClose).map(|_| ())
}

pub fn connection_shutdown(handle: &Handle, error_code: u64, flags: ConnectionShutdownFlags) -> ApiResult<()> {
    if error_code > MAX_ERROR_CODE {
        return Err(Status::InvalidParameter);
    }
    let connection = handle.as_connection()?;
    submit(connection, OperationKind::ConnectionShutdown { error_code, flags }).map(|_| ())
}

pub fn connection_start(
    handle: &Handle,
    configuration: &Handle,
    family: AddressFamily,
    server_name: Option<&str>,
    server_port: u16,
) -> ApiResult<()> {
    let connection = handle.as_connection()?;
    if !connection.is_client() {
        return Err(Status::InvalidState);
    }
    if connection.is_started() {
        return Err(Status::InvalidState);
    }
    let configuration = configuration.as_configuration()?;
    connection.set_configuration(configuration.clone());
    if let Some(name) = server_name {
        connection.set_server_name(name);
    }
    submit(
        connection,
        OperationKind::ConnectionStart {
            family,
            server_name: server_name.map(str::to_owned),
            server_port,
        },
    )
    .map(|_| ())
}

pub fn connection_set_configuration(handle: &Handle, configuration: Handle) -> ApiResult<()> {
    let connection = handle.as_connection()?;
    if connection.is_client() {
        return Err(Status::InvalidState);
    }
    submit(connection, OperationKind::ConnectionSetConfiguration { configuration }).map(|_| ())
}

pub fn connection_send_resumption_ticket(
    handle: &Handle,
    flags: SendResumptionTicketFlags,
    ticket: Vec<u8>,
) -> ApiResult<()> {
    let connection = handle.as_connection()?;
    if connection.is_client() || !connection.is_resumption_enabled() || !connection.is_connected() {
        return Err(Status::InvalidState);
    }
    submit(connection, OperationKind::ConnectionSendResumptionTicket { flags, ticket }).map(|_| ())
}

pub fn connection_resumption_ticket_validation_complete(handle: &Handle, accept: bool) -> ApiResult<()> {
    let connection = handle.as_connection()?;
    submit(
        connection,
        OperationKind::ConnectionCompleteResumptionTicketValidation { accept },
    )
    .map(|_| ())
}

pub fn connection_certificate_validation_complete(handle: &Handle, accept: bool) -> ApiResult<()> {
    let connection = handle.as_connection()?;
    submit(connection, OperationKind::ConnectionCompleteCertificateValidation { accept }).map(|_| ())
}

/// Opens a new stream on `connection_handle`. Unlike connection/stream
/// close operations, opening itself is synchronous: no peer round trip is
/// needed until `StreamStart` is called.
pub fn stream_open(
    connection_handle: &Handle,
    flags: StreamOpenFlags,
    callback: Arc<dyn StreamCallback>,
) -> ApiResult<Handle> {
    let connection = connection_handle.as_connection()?;
    let id = connection.allocate_stream_id();
    let stream = Stream::new(id, connection.clone(), callback);
    if flags.contains(StreamOpenFlag::Owned0RttBuffers) {
        stream.provide_receive_buffer(stream::ReceiveChunk::new(BytesMut::zeroed(1)));
    }
    connection.insert_stream(stream.clone());
    Ok(Handle::Stream(stream))
}

pub fn stream_close(handle: &Handle) -> ApiResult<()> {
    let stream = handle.as_stream()?;
    // Same reasoning as `connection_close`: other reference kinds may
    // still be outstanding, so this only releases the application's own.
    stream.refs().release_ref(RefKind::HandleOwner);
    let connection = stream.connection();
    if stream.is_shutdown_complete() {
        submit(&connection, OperationKind::StreamClose { stream: stream.clone() }).map(|_| ())
    } else {
        submit_blocking(&connection, OperationKind::StreamClose { stream: stream.clone() }).map(|_| ())
    }
}

pub fn stream_start(handle: &Handle, flags: StreamStartFlags) -> ApiResult<()> {
    let stream = handle.as_stream()?;
    if stream.is_started() {
        return Err(Status::InvalidState);
    }
    let connection = stream.connection();
    submit(&connection, OperationKind::StreamStart { stream: stream.clone(), flags }).map(|_| ())
}

pub fn stream_shutdown(handle: &Handle, error_code: u64, flags: StreamShutdownFlags) -> ApiResult<()> {
    if error_code > MAX_ERROR_CODE {
        return Err(Status::InvalidParameter);
    }
    let stream = handle.as_stream()?;
    stream::validate_shutdown_flags(flags)?;
    let connection = stream.connection();
    submit(
        &connection,
        OperationKind::StreamShutdown { stream: stream.clone(), error_code, flags },
    )
    .map(|_| ())
}

/// Accepts a send request: copies the caller's buffers in immediately
/// (they cannot be borrowed across the asynchronous boundary, §4.5), then
/// either enqueues a new flush operation or lets an already-scheduled one
/// pick the request up.
pub fn stream_send(
    handle: &Handle,
    buffers: Vec<Bytes>,
    flags: StreamSendFlags,
    client_context: Option<OpaqueContext>,
) -> ApiResult<()> {
    let stream = handle.as_stream()?;
    if !stream.is_started() {
        return Err(Status::InvalidState);
    }
    if !stream.is_send_enabled() {
        if stream.received_stop_sending() {
            return Err(Status::Aborted);
        }
        return Err(Status::InvalidState);
    }
    let request = SendRequest::new(buffers, flags, client_context);
    let needs_flush = stream.queue_send(request);
    if !needs_flush {
        return Ok(());
    }
    let connection = stream.connection();
    submit(&connection, OperationKind::StreamSend { stream: stream.clone() }).map(|_| ())
}

pub fn stream_receive_set_enabled(handle: &Handle, enabled: bool) -> ApiResult<()> {
    let stream = handle.as_stream()?;
    let connection = stream.connection();
    submit(
        &connection,
        OperationKind::StreamReceiveSetEnabled { stream: stream.clone(), enabled },
    )
    .map(|_| ())
}

pub fn stream_receive_complete(handle: &Handle, length: u64) -> ApiResult<()> {
    let stream = handle.as_stream()?;
    let connection = stream.connection();
    submit(
        &connection,
        OperationKind::StreamReceiveComplete { stream: stream.clone(), length },
    )
    .map(|_| ())
}

pub fn stream_provide_receive_buffers(handle: &Handle, buffer: BytesMut) -> ApiResult<()> {
    if buffer.is_empty() {
        return Err(Status::InvalidParameter);
    }
    let stream = handle.as_stream()?;
    let connection = stream.connection();
    submit(
        &connection,
        OperationKind::StreamProvideReceiveBuffers { stream: stream.clone(), buffer },
    )
    .map(|_| ())
}

/// Queues an unreliable, unordered datagram (§6 `DatagramSend`). Caller
/// buffers are copied in immediately, same as `stream_send`; the total
/// length is bounded by the protocol's 16-bit length prefix.
pub fn datagram_send(
    handle: &Handle,
    buffers: Vec<Bytes>,
    flags: DatagramSendFlags,
    client_context: Option<OpaqueContext>,
) -> ApiResult<()> {
    let connection = handle.as_connection()?;
    if buffers.is_empty() {
        return Err(Status::InvalidParameter);
    }
    let request = DatagramRequest::new(buffers, flags, client_context);
    if request.total_length > datagram::MAX_DATAGRAM_LENGTH {
        return Err(Status::InvalidParameter);
    }
    let needs_flush = connection.queue_datagram(request);
    if !needs_flush {
        return Ok(());
    }
    submit(connection, OperationKind::DatagramSend).map(|_| ())
}

pub fn get_param(connection_or_stream: &ParamHandle, param: Param, flags: ParamFlags) -> ApiResult<Param> {
    let connection = resolve_param_connection(connection_or_stream)?;
    submit_blocking(
        &connection,
        OperationKind::GetParam { handle: connection_or_stream.clone(), param, flags },
    )?;
    Ok(param)
}

pub fn set_param(connection_or_stream: &ParamHandle, param: Param, value: OpaqueContext, flags: ParamFlags) -> ApiResult<()> {
    let connection = resolve_param_connection(connection_or_stream)?;
    submit_blocking(
        &connection,
        OperationKind::SetParam { handle: connection_or_stream.clone(), param, value, flags },
    )
    .map(|_| ())
}

fn resolve_param_connection(handle: &ParamHandle) -> ApiResult<Arc<Connection>> {
    match handle {
        None => Err(Status::InvalidParameter),
        Some(handle) => ConnectionOrStream::try_from(handle)?.resolve_connection(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{StreamShutdownFlag, StreamStartFlag};
    use crate::stream::StreamEvent;

    struct NoopConnectionCallback;
    impl ConnectionCallback for NoopConnectionCallback {
        fn on_event(&self, _connection: &Arc<Connection>, _event: crate::connection::ConnectionEvent) {}
    }

    struct NoopStreamCallback;
    impl StreamCallback for NoopStreamCallback {
        fn on_event(&self, _stream: &Arc<Stream>, _event: StreamEvent) {}
    }

    fn test_connection() -> Handle {
        let partition = Partition::new_pool(1, 16)[0].clone();
        connection_open_in_partition(partition, crate::handle::Role::Client, Arc::new(NoopConnectionCallback))
    }

    #[test]
    fn opening_a_stream_on_a_freed_connection_is_rejected() {
        let connection_handle = test_connection();
        let connection = connection_handle.as_connection().unwrap().clone();
        connection.mark_freed_for_test();
        assert!(matches!(
            stream_open(&connection_handle, StreamOpenFlags::empty(), Arc::new(NoopStreamCallback)),
            Err(Status::InvalidParameter)
        ));
    }

    #[test]
    fn stream_open_then_start_then_send_succeeds() {
        let connection_handle = test_connection();
        let stream_handle = stream_open(&connection_handle, StreamOpenFlags::empty(), Arc::new(NoopStreamCallback))
            .unwrap();
        assert!(stream_start(&stream_handle, StreamStartFlags::empty()).is_ok());
        let result = stream_send(
            &stream_handle,
            vec![Bytes::from_static(b"hello")],
            StreamSendFlags::empty(),
            None,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn send_before_start_is_rejected() {
        let connection_handle = test_connection();
        let stream_handle = stream_open(&connection_handle, StreamOpenFlags::empty(), Arc::new(NoopStreamCallback))
            .unwrap();
        let result = stream_send(&stream_handle, vec![], StreamSendFlags::empty(), None);
        assert!(matches!(result, Err(Status::InvalidState)));
    }

    #[test]
    fn shutdown_rejects_a_graceful_and_abort_combination() {
        let connection_handle = test_connection();
        let stream_handle = stream_open(&connection_handle, StreamOpenFlags::empty(), Arc::new(NoopStreamCallback))
            .unwrap();
        let result = stream_shutdown(&stream_handle, 0, StreamShutdownFlag::Graceful | StreamShutdownFlag::AbortSend);
        assert!(matches!(result, Err(Status::InvalidParameter)));
    }

    #[test]
    fn datagram_send_rejects_a_payload_past_the_protocol_maximum() {
        let connection_handle = test_connection();
        let oversized = Bytes::from(vec![0u8; (crate::datagram::MAX_DATAGRAM_LENGTH + 1) as usize]);
        let result = datagram_send(&connection_handle, vec![oversized], DatagramSendFlags::empty(), None);
        assert!(matches!(result, Err(Status::InvalidParameter)));
    }

    #[test]
    fn datagram_send_accepts_a_well_formed_payload() {
        let connection_handle = test_connection();
        let result = datagram_send(
            &connection_handle,
            vec![Bytes::from_static(b"hello")],
            DatagramSendFlags::empty(),
            None,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn bad_handle_kind_is_rejected_by_as_connection() {
        let registration = Registration::new("test");
        let handle = Handle::Registration(Arc::new(registration));
        assert!(matches!(connection_close(&handle), Err(Status::InvalidParameter)));
    }
}
