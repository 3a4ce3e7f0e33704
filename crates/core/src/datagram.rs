//! Per-connection datagram send queue (§6 `DatagramSend`).
//!
//! Unreliable, unordered application payloads carried outside any stream.
//! Queued and flushed the same way a stream's send requests are (§4.5):
//! copy the caller's buffers in immediately, append to a FIFO, and let a
//! single in-flight flush operation drain it, rather than modeling the
//! reference implementation's separate per-connection datagram subsystem.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::context::OpaqueContext;
use crate::flags::DatagramSendFlags;

/// The protocol's maximum representable datagram length (§6): an unreliable
/// payload is encoded with a 16-bit length prefix.
pub const MAX_DATAGRAM_LENGTH: u64 = u16::MAX as u64;

/// A single queued `DatagramSend` call, not yet handed to the worker.
pub struct DatagramRequest {
    pub buffers: Vec<Bytes>,
    pub flags: DatagramSendFlags,
    pub total_length: u64,
    pub client_context: Option<OpaqueContext>,
}

impl DatagramRequest {
    pub fn new(buffers: Vec<Bytes>, flags: DatagramSendFlags, client_context: Option<OpaqueContext>) -> Self {
        let total_length = buffers.iter().map(|b| b.len() as u64).sum();
        Self {
            buffers,
            flags,
            total_length,
            client_context,
        }
    }
}

/// FIFO of datagram requests accepted but not yet flushed by the worker.
#[derive(Default)]
pub struct DatagramQueue {
    requests: VecDeque<DatagramRequest>,
}

impl DatagramQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a request to the tail. Returns `true` if the queue was empty
    /// before this call, mirroring [`crate::stream::SendRequestQueue::push`].
    pub fn push(&mut self, request: DatagramRequest) -> bool {
        let was_empty = self.requests.is_empty();
        self.requests.push_back(request);
        was_empty
    }

    pub fn drain(&mut self) -> Vec<DatagramRequest> {
        self.requests.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_push_reports_the_queue_was_empty() {
        let mut queue = DatagramQueue::new();
        assert!(queue.push(DatagramRequest::new(vec![], Default::default(), None)));
        assert!(!queue.push(DatagramRequest::new(vec![], Default::default(), None)));
    }

    #[test]
    fn drain_preserves_fifo_order() {
        let mut queue = DatagramQueue::new();
        for i in 0..3u8 {
            queue.push(DatagramRequest::new(
                vec![Bytes::from(vec![i])],
                Default::default(),
                None,
            ));
        }
        let order: Vec<u8> = queue.drain().iter().map(|r| r.buffers[0][0]).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }
}
