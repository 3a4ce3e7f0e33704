//! End-to-end scenarios exercising the public API surface in `api`,
//! covering the request/response flows a real application drives: open,
//! start, send, receive-complete, shutdown, close, and the OOM escalation
//! path, all through [`quinault_core::api`] rather than through any
//! internal type directly.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};

use quinault_core::api;
use quinault_core::connection::{Connection, ConnectionCallback, ConnectionEvent};
use quinault_core::context::OpaqueContext;
use quinault_core::error::Status;
use quinault_core::flags::{
    ConnectionShutdownFlags, DatagramSendFlags, StreamOpenFlags, StreamSendFlags, StreamShutdownFlag,
    StreamStartFlags,
};
use quinault_core::handle::{AddressFamily, Handle, Role};
use quinault_core::operation::OperationKind;
use quinault_core::partition::Partition;
use quinault_core::registration::{Configuration, Registration};
use quinault_core::stream::{Stream, StreamCallback, StreamEvent};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Polls `predicate` until it returns `true` or `timeout` elapses, for
/// waiting on worker-thread-driven state without a fixed sleep.
fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::yield_now();
    }
    predicate()
}

#[derive(Default)]
struct RecordedConnectionEvents {
    connected: bool,
    shutdown_complete: bool,
    datagrams_completed: u32,
}

struct RecordingConnectionCallback(Mutex<RecordedConnectionEvents>);

impl ConnectionCallback for RecordingConnectionCallback {
    fn on_event(&self, _connection: &Arc<Connection>, event: ConnectionEvent) {
        let mut events = self.0.lock().unwrap();
        match event {
            ConnectionEvent::Connected => events.connected = true,
            ConnectionEvent::ShutdownComplete { .. } => events.shutdown_complete = true,
            ConnectionEvent::DatagramSendStateChanged { .. } => events.datagrams_completed += 1,
            _ => {}
        }
    }
}

#[derive(Default)]
struct RecordedStreamEvents {
    started: Option<Status>,
    send_completed: u32,
    shutdown_complete: bool,
}

struct RecordingStreamCallback(Mutex<RecordedStreamEvents>);

impl StreamCallback for RecordingStreamCallback {
    fn on_event(&self, _stream: &Arc<Stream>, event: StreamEvent) {
        let mut events = self.0.lock().unwrap();
        match event {
            StreamEvent::StartComplete { status } => events.started = Some(status),
            StreamEvent::SendComplete { .. } => events.send_completed += 1,
            StreamEvent::ShutdownComplete => events.shutdown_complete = true,
            _ => {}
        }
    }
}

#[test]
fn open_start_send_and_close_round_trip() {
    init_tracing();
    let partitions = Partition::new_pool(1, 16);
    let registration = Registration::with_partitions("test-app", 1);
    let connection_callback = Arc::new(RecordingConnectionCallback(Mutex::new(Default::default())));
    let connection_handle =
        api::connection_open(&registration, &partitions, Role::Client, connection_callback.clone()).unwrap();

    let configuration = Handle::Configuration(Arc::new(Configuration::new(["h3"])));
    api::connection_start(&connection_handle, &configuration, AddressFamily::Inet, Some("example.test"), 443)
        .unwrap();

    assert!(wait_until(Duration::from_secs(1), || connection_callback.0.lock().unwrap().connected));

    let stream_callback = Arc::new(RecordingStreamCallback(Mutex::new(Default::default())));
    let stream_handle =
        api::stream_open(&connection_handle, StreamOpenFlags::empty(), stream_callback.clone()).unwrap();
    api::stream_start(&stream_handle, StreamStartFlags::empty()).unwrap();
    assert!(wait_until(Duration::from_secs(1), || stream_callback.0.lock().unwrap().started.is_some()));

    api::stream_send(
        &stream_handle,
        vec![Bytes::from_static(b"hello world")],
        StreamSendFlags::empty(),
        Some(OpaqueContext::new(42u32)),
    )
    .unwrap();
    assert!(wait_until(Duration::from_secs(1), || stream_callback.0.lock().unwrap().send_completed == 1));

    api::stream_close(&stream_handle).unwrap();
    api::connection_shutdown(&connection_handle, 0, ConnectionShutdownFlags::empty()).unwrap();
    api::connection_close(&connection_handle).unwrap();
    assert!(wait_until(Duration::from_secs(1), || connection_callback.0.lock().unwrap().shutdown_complete));
}

#[test]
fn a_registration_handle_is_rejected_everywhere_a_connection_is_expected() {
    let registration = Registration::new("test-app");
    let handle = Handle::Registration(Arc::new(registration));
    assert!(matches!(api::connection_close(&handle), Err(Status::InvalidParameter)));
    assert!(matches!(
        api::connection_shutdown(&handle, 0, ConnectionShutdownFlags::empty()),
        Err(Status::InvalidParameter)
    ));
}

#[test]
fn abortive_shutdown_completes_both_directions() {
    init_tracing();
    let partition = Partition::new_pool(1, 16)[0].clone();
    let connection = Connection::new_client(partition);
    let stream_callback = Arc::new(RecordingStreamCallback(Mutex::new(Default::default())));
    let stream_handle =
        api::stream_open(&Handle::Connection(connection), StreamOpenFlags::empty(), stream_callback.clone())
            .unwrap();
    api::stream_start(&stream_handle, StreamStartFlags::empty()).unwrap();

    api::stream_shutdown(
        &stream_handle,
        7,
        StreamShutdownFlag::AbortSend | StreamShutdownFlag::AbortReceive,
    )
    .unwrap();

    assert!(wait_until(Duration::from_secs(1), || stream_callback.0.lock().unwrap().shutdown_complete));
}

#[test]
fn receive_completion_canary_overflow_tears_down_the_connection() {
    init_tracing();
    let partition = Partition::new_pool(1, 16)[0].clone();
    let connection = Connection::new_client(partition);
    let connection_handle = Handle::Connection(connection.clone());
    let stream_callback = Arc::new(RecordingStreamCallback(Mutex::new(Default::default())));
    let stream_handle = api::stream_open(&connection_handle, StreamOpenFlags::empty(), stream_callback).unwrap();
    api::stream_start(&stream_handle, StreamStartFlags::empty()).unwrap();

    // The first completion claims almost the entire representable range;
    // the second cannot be added without carrying into the reserved bits,
    // which is the contract violation this accounting exists to catch.
    api::stream_receive_complete(&stream_handle, u64::MAX >> 2).unwrap();
    api::stream_receive_complete(&stream_handle, u64::MAX >> 2).unwrap();

    assert!(wait_until(Duration::from_secs(1), || connection.is_closed_locally()));
}

#[test]
fn stream_send_escalates_to_out_of_memory_once_the_pool_is_exhausted() {
    let partition = Partition::new_pool(1, 0)[0].clone();
    let connection = Connection::new_client(partition.clone());
    let connection_handle = Handle::Connection(connection);
    let stream_callback = Arc::new(RecordingStreamCallback(Mutex::new(Default::default())));

    // `stream_open` does not itself queue an operation, so it still
    // succeeds even with a zero-capacity pool.
    let stream_handle =
        api::stream_open(&connection_handle, StreamOpenFlags::empty(), stream_callback).unwrap();

    // StreamStart does queue, and the pool has no capacity at all, so the
    // very first queued operation is forced onto the back-up slot and
    // reports OutOfMemory.
    let result = api::stream_start(&stream_handle, StreamStartFlags::empty());
    assert!(matches!(result, Err(Status::OutOfMemory)));
}

#[test]
fn datagram_send_completes_asynchronously() {
    init_tracing();
    let partition = Partition::new_pool(1, 16)[0].clone();
    let connection_callback = Arc::new(RecordingConnectionCallback(Mutex::new(Default::default())));
    let connection = Connection::with_callback(quinault_core::handle::Role::Client, partition, connection_callback.clone());
    let connection_handle = Handle::Connection(connection);

    api::datagram_send(
        &connection_handle,
        vec![Bytes::from_static(b"unreliable payload")],
        DatagramSendFlags::empty(),
        None,
    )
    .unwrap();

    assert!(wait_until(Duration::from_secs(1), || {
        connection_callback.0.lock().unwrap().datagrams_completed == 1
    }));
}

#[test]
fn providing_an_empty_receive_buffer_is_rejected_before_it_is_queued() {
    let partition = Partition::new_pool(1, 16)[0].clone();
    let connection = Connection::new_client(partition);
    let connection_handle = Handle::Connection(connection);
    let stream_callback = Arc::new(RecordingStreamCallback(Mutex::new(Default::default())));
    let stream_handle = api::stream_open(&connection_handle, StreamOpenFlags::empty(), stream_callback).unwrap();

    let result = api::stream_provide_receive_buffers(&stream_handle, BytesMut::new());
    assert!(matches!(result, Err(Status::InvalidParameter)));
}

#[test]
fn operation_kind_reports_its_own_default_priority() {
    assert_eq!(
        OperationKind::ConnectionClose.default_priority(),
        quinault_core::operation::OperationPriority::Highest
    );
}
