//! The per-stream pending send-request queue (§4.5).
//!
//! The reference implementation links requests through a singly-linked
//! list with a tail pointer so that a second `StreamSend` arriving before
//! the first flush is even picked up can be appended in O(1) without
//! walking the list. A `VecDeque` gives the same O(1) push/pop-front
//! behavior without hand-rolled intrusive pointers, which is the idiomatic
//! Rust container for "FIFO queue, occasionally drained in bulk".

use std::collections::VecDeque;

use bytes::Bytes;

use crate::context::OpaqueContext;
use crate::flags::StreamSendFlags;

/// A single queued `StreamSend` call, not yet handed to the worker.
pub struct SendRequest {
    pub buffers: Vec<Bytes>,
    pub flags: StreamSendFlags,
    pub total_length: u64,
    pub client_context: Option<OpaqueContext>,
}

impl SendRequest {
    pub fn new(buffers: Vec<Bytes>, flags: StreamSendFlags, client_context: Option<OpaqueContext>) -> Self {
        let total_length = buffers.iter().map(|b| b.len() as u64).sum();
        Self {
            buffers,
            flags,
            total_length,
            client_context,
        }
    }
}

/// FIFO of send requests accepted by `StreamSend` but not yet flushed by
/// the worker. Mutated only under the stream's dispatch lock (§3 invariant
/// 4); this type itself assumes the caller already holds that lock.
#[derive(Default)]
pub struct SendRequestQueue {
    requests: VecDeque<SendRequest>,
}

impl SendRequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a request to the tail. Returns `true` if the queue was
    /// empty before this call -- the caller uses this to decide whether a
    /// new flush operation needs to be queued (`QueueOper` in the
    /// specification) or whether an already-queued flush will pick this
    /// request up too.
    pub fn push(&mut self, request: SendRequest) -> bool {
        let was_empty = self.requests.is_empty();
        self.requests.push_back(request);
        was_empty
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Drains every pending request in FIFO order, for the worker to flush
    /// in a single pass.
    pub fn drain(&mut self) -> Vec<SendRequest> {
        self.requests.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_push_reports_the_queue_was_empty() {
        let mut queue = SendRequestQueue::new();
        assert!(queue.push(SendRequest::new(vec![], Default::default(), None)));
        assert!(!queue.push(SendRequest::new(vec![], Default::default(), None)));
    }

    #[test]
    fn drain_preserves_fifo_order() {
        let mut queue = SendRequestQueue::new();
        for i in 0..5u8 {
            queue.push(SendRequest::new(
                vec![Bytes::from(vec![i])],
                Default::default(),
                Some(OpaqueContext::new(i)),
            ));
        }
        let drained = queue.drain();
        let order: Vec<u8> = drained.iter().map(|r| r.buffers[0][0]).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }
}
