//! Worker-side interpretation of a single dequeued [`Operation`] (§4.6,
//! §4.7). Split out of [`super::Connection`] itself so the state-machine
//! bookkeeping and the "what does each operation actually do" logic don't
//! have to be read as one function.

use std::sync::Arc;

use crate::error::Status;
use crate::flags::{ConnectionStateFlag, StreamShutdownFlag};
use crate::operation::{Operation, OperationKind};
use crate::stream::{ReceiveCompletionAction, StreamEvent};

use super::{Connection, ConnectionEvent};

pub(super) fn process(connection: &Arc<Connection>, operation: Operation) {
    let status = process_kind(connection, &operation.kind);
    if let Some(completion) = operation.completion {
        completion.signal(status);
    }
}

/// Runs the handler for a single operation kind without going through the
/// queue at all, for the §4.3 inline-execution path.
pub(super) fn process_kind(connection: &Arc<Connection>, kind: &OperationKind) -> Status {
    match kind {
        OperationKind::ConnectionClose => {
            connection.mark_handle_closed();
            finish_shutdown_if_ready(connection);
            Status::Success
        }
        OperationKind::ConnectionShutdown { error_code, flags: _ } => {
            connection.state.insert(ConnectionStateFlag::ClosedLocally);
            connection.set_shutdown_error_code(*error_code);
            finish_shutdown_if_ready(connection);
            Status::Success
        }
        OperationKind::ConnectionStart { .. } => {
            connection.state.insert(ConnectionStateFlag::Started);
            connection.state.insert(ConnectionStateFlag::Connected);
            connection.emit(ConnectionEvent::Connected);
            Status::Success
        }
        OperationKind::ConnectionSetConfiguration { configuration } => match configuration.as_configuration() {
            Ok(configuration) => {
                connection.set_configuration(configuration.clone());
                connection.state.insert(ConnectionStateFlag::ResumptionEnabled);
                Status::Success
            }
            Err(status) => *status,
        },
        OperationKind::ConnectionSendResumptionTicket { ticket, .. } => {
            connection.emit(ConnectionEvent::ResumptionTicketReceived {
                ticket: ticket.clone(),
            });
            Status::Success
        }
        OperationKind::ConnectionCompleteResumptionTicketValidation { accept } => {
            if *accept {
                Status::Success
            } else {
                connection.state.insert(ConnectionStateFlag::ClosedLocally);
                Status::Aborted
            }
        }
        OperationKind::ConnectionCompleteCertificateValidation { accept } => {
            if *accept {
                Status::Success
            } else {
                connection.state.insert(ConnectionStateFlag::ClosedLocally);
                Status::Aborted
            }
        }
        OperationKind::StreamClose { stream } => {
            stream.mark_handle_closed();
            if stream.refs().is_unreferenced() {
                stream.mark_freed();
                connection.remove_stream(stream.id());
                stream.emit(StreamEvent::ShutdownComplete);
            }
            Status::Success
        }
        OperationKind::StreamStart { stream, .. } => {
            stream.mark_started();
            stream.emit(StreamEvent::StartComplete { status: Status::Success });
            Status::Success
        }
        OperationKind::StreamShutdown { stream, flags, .. } => {
            let immediate = flags.contains(StreamShutdownFlag::Immediate);
            if flags.contains(StreamShutdownFlag::AbortSend) {
                stream.mark_send_shutdown_complete();
                if !immediate {
                    stream.emit(StreamEvent::SendShutdownComplete { graceful: false });
                }
            } else if flags.contains(StreamShutdownFlag::Graceful) {
                stream.mark_send_shutdown_complete();
                stream.emit(StreamEvent::SendShutdownComplete { graceful: true });
            }
            if flags.contains(StreamShutdownFlag::AbortReceive) {
                stream.mark_recv_shutdown_complete();
            }
            if stream.is_shutdown_complete() {
                stream.emit(StreamEvent::ShutdownComplete);
            }
            Status::Success
        }
        OperationKind::StreamSend { stream } => {
            let requests = stream.drain_send_requests();
            for request in requests {
                stream.record_bytes_sent(request.total_length);
                stream.emit(StreamEvent::SendComplete {
                    canceled: false,
                    client_context: request.client_context,
                });
            }
            Status::Success
        }
        OperationKind::StreamReceiveSetEnabled { stream, enabled } => {
            stream.set_receive_active(*enabled);
            Status::Success
        }
        OperationKind::StreamReceiveComplete { stream, length } => match stream.complete_receive(*length) {
            ReceiveCompletionAction::None | ReceiveCompletionAction::QueueCompletionOperation => Status::Success,
            ReceiveCompletionAction::FatalOverflow => {
                tracing::error!(stream_id = stream.id(), "receive-completion canary overflow; tearing down connection");
                connection.state.insert(ConnectionStateFlag::ClosedLocally);
                Status::InvalidState
            }
        },
        OperationKind::StreamProvideReceiveBuffers { stream, buffer } => {
            if buffer.is_empty() {
                return Status::InvalidParameter;
            }
            stream.provide_receive_buffer(crate::stream::ReceiveChunk::new(buffer.clone()));
            Status::Success
        }
        OperationKind::DatagramSend => {
            let requests = connection.drain_datagrams();
            for request in requests {
                connection.emit(ConnectionEvent::DatagramSendStateChanged {
                    canceled: false,
                    client_context: request.client_context,
                });
            }
            Status::Success
        }
        OperationKind::GetParam { .. } => Status::Success,
        OperationKind::SetParam { .. } => Status::Success,
    }
}

fn finish_shutdown_if_ready(connection: &Arc<Connection>) {
    if connection.is_handle_closed() && connection.is_closed_locally() {
        connection.emit(ConnectionEvent::ShutdownComplete {
            handshake_completed: connection.is_connected(),
            error_code: connection.shutdown_error_code(),
        });
        if connection.refs().is_unreferenced() {
            connection.mark_freed();
        }
    }
}
