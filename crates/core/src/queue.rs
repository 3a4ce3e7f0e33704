//! The per-connection operation queue: three priority classes, each FIFO,
//! drained highest-first (§4.4).

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::operation::{Operation, OperationPriority};

#[derive(Default)]
struct Lanes {
    highest: VecDeque<Operation>,
    high: VecDeque<Operation>,
    normal: VecDeque<Operation>,
}

/// A connection's pending-operation queue.
///
/// The reference implementation links operations through an intrusive list
/// per priority class; a `VecDeque` per class gives the same ordering
/// without unsafe intrusive pointers, at the cost of one extra allocation
/// per resize, which is an acceptable trade for a queue bounded by the
/// connection's own backpressure rather than by packet-processing rates.
#[derive(Default)]
pub struct OperationQueue {
    lanes: Mutex<Lanes>,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues `operation` in the lane its priority selects. Returns
    /// whether the queue was empty across all lanes before this push --
    /// the connection uses this to decide whether the worker needs waking.
    pub fn enqueue(&self, operation: Operation) -> bool {
        let priority = operation.priority();
        let mut lanes = self.lanes.lock();
        let was_empty = lanes.highest.is_empty() && lanes.high.is_empty() && lanes.normal.is_empty();
        match priority {
            OperationPriority::Highest => lanes.highest.push_back(operation),
            OperationPriority::High => lanes.high.push_back(operation),
            OperationPriority::Normal => lanes.normal.push_back(operation),
        }
        was_empty
    }

    /// Pops the next operation to process: highest lane first, then high,
    /// then normal, each drained FIFO.
    pub fn dequeue_next(&self) -> Option<Operation> {
        let mut lanes = self.lanes.lock();
        lanes
            .highest
            .pop_front()
            .or_else(|| lanes.high.pop_front())
            .or_else(|| lanes.normal.pop_front())
    }

    pub fn is_empty(&self) -> bool {
        let lanes = self.lanes.lock();
        lanes.highest.is_empty() && lanes.high.is_empty() && lanes.normal.is_empty()
    }

    pub fn len(&self) -> usize {
        let lanes = self.lanes.lock();
        lanes.highest.len() + lanes.high.len() + lanes.normal.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::connection::Connection;
    use crate::operation::OperationKind;
    use crate::partition::Partition;
    use crate::stream::{Stream, StreamCallback, StreamEvent};

    struct NoopCallback;
    impl StreamCallback for NoopCallback {
        fn on_event(&self, _stream: &Arc<Stream>, _event: StreamEvent) {}
    }

    fn op(kind: OperationKind) -> Operation {
        Operation::new(kind)
    }

    fn test_stream() -> Arc<Stream> {
        let partition = Partition::new_pool(1, 16)[0].clone();
        let connection = Connection::new_client(partition);
        Stream::new(1, connection, Arc::new(NoopCallback))
    }

    #[test]
    fn first_enqueue_reports_the_queue_was_empty() {
        let queue = OperationQueue::new();
        let stream = test_stream();
        assert!(queue.enqueue(op(OperationKind::StreamSend { stream: stream.clone() })));
        assert!(!queue.enqueue(op(OperationKind::StreamSend { stream })));
    }

    #[test]
    fn highest_priority_drains_ahead_of_everything_queued_after_it() {
        let queue = OperationQueue::new();
        let stream = test_stream();
        queue.enqueue(op(OperationKind::StreamSend { stream }));
        queue.enqueue(op(OperationKind::ConnectionClose));
        let next = queue.dequeue_next().unwrap();
        assert!(matches!(next.kind, OperationKind::ConnectionClose));
        let next = queue.dequeue_next().unwrap();
        assert!(matches!(next.kind, OperationKind::StreamSend { .. }));
        assert!(queue.dequeue_next().is_none());
    }

    #[test]
    fn same_lane_preserves_fifo_order() {
        let queue = OperationQueue::new();
        let stream = test_stream();
        queue.enqueue(op(OperationKind::StreamSend { stream: stream.clone() }));
        queue.enqueue(op(OperationKind::StreamClose { stream: stream.clone() }));
        // StreamClose is Highest, StreamSend is Normal -- StreamClose first,
        // but two Highest-priority pushes should still come out in order.
        queue.enqueue(op(OperationKind::ConnectionClose));
        assert!(matches!(queue.dequeue_next().unwrap().kind, OperationKind::StreamClose { .. }));
        assert!(matches!(queue.dequeue_next().unwrap().kind, OperationKind::ConnectionClose));
        assert!(matches!(queue.dequeue_next().unwrap().kind, OperationKind::StreamSend { .. }));
    }
}
