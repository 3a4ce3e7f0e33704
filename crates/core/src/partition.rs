//! Worker partitions: each owns an [`OperationPool`] and a pool of worker
//! threads that drain ready connections' queues (§4.4, §5).
//!
//! A registration spreads its connections across a fixed number of
//! partitions, each pinned to its own worker thread. Processing a
//! connection's queue always happens on that connection's assigned
//! partition thread, which is what lets §4.3's inline-execution check
//! compare "the calling thread" against "the connection's worker thread"
//! and mean something.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::connection::Connection;
use crate::operation::OperationPool;

/// One worker partition.
pub struct Partition {
    index: u16,
    pool: Arc<OperationPool>,
    ready: Mutex<VecDeque<Arc<Connection>>>,
    ready_cv: Condvar,
    shutting_down: AtomicBool,
    worker: Mutex<Option<(ThreadId, JoinHandle<()>)>>,
}

impl Partition {
    /// Builds `count` partitions, each with its own
    /// [`OperationPool`] of `pool_capacity` and its own running worker
    /// thread.
    pub fn new_pool(count: u16, pool_capacity: usize) -> Vec<Arc<Partition>> {
        (0..count)
            .map(|index| {
                let partition = Arc::new(Self {
                    index,
                    pool: Arc::new(OperationPool::new(pool_capacity)),
                    ready: Mutex::new(VecDeque::new()),
                    ready_cv: Condvar::new(),
                    shutting_down: AtomicBool::new(false),
                    worker: Mutex::new(None),
                });
                partition.clone().spawn_worker();
                partition
            })
            .collect()
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn pool(&self) -> &Arc<OperationPool> {
        &self.pool
    }

    /// True if the calling thread is this partition's worker thread (§4.3
    /// decision tree: a call made from inside a callback, on the worker
    /// thread itself, is eligible to run inline instead of being queued).
    pub fn is_current_thread_worker(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|(id, _)| *id == thread::current().id())
    }

    /// Schedules `connection` to have its queue drained. Safe to call
    /// repeatedly; a connection already waiting (or being processed) is
    /// not duplicated in the ready list by
    /// [`crate::connection::Connection::schedule`], which tracks that with
    /// its own flag.
    fn push_ready(&self, connection: Arc<Connection>) {
        self.ready.lock().push_back(connection);
        self.ready_cv.notify_one();
    }

    fn spawn_worker(self: Arc<Self>) {
        let partition = self.clone();
        let handle = thread::Builder::new()
            .name(format!("quinault-worker-{}", self.index))
            .spawn(move || partition.run())
            .expect("failed to spawn worker thread");
        *self.worker.lock() = Some((handle.thread().id(), handle));
    }

    fn run(self: Arc<Self>) {
        tracing::debug!(partition = self.index, "worker thread started");
        loop {
            let connection = {
                let mut ready = self.ready.lock();
                loop {
                    if self.shutting_down.load(Ordering::Acquire) {
                        tracing::debug!(partition = self.index, "worker thread stopping");
                        return;
                    }
                    if let Some(connection) = ready.pop_front() {
                        break connection;
                    }
                    self.ready_cv.wait(&mut ready);
                }
            };
            connection.drain_on_worker();
        }
    }

    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.ready_cv.notify_all();
    }
}

impl Drop for Partition {
    fn drop(&mut self) {
        self.shutdown();
        if let Some((_, handle)) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

/// Schedules `connection` onto `partition`'s ready list; split out of
/// [`Partition`] itself so [`crate::connection::Connection`] can call it
/// without a direct circular method on `Partition`.
pub fn schedule(partition: &Arc<Partition>, connection: Arc<Connection>) {
    partition.push_ready(connection);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_pool_builds_the_requested_number_of_partitions() {
        let partitions = Partition::new_pool(3, 8);
        assert_eq!(partitions.len(), 3);
        assert_eq!(partitions[0].index(), 0);
        assert_eq!(partitions[2].index(), 2);
    }

    #[test]
    fn worker_thread_is_never_the_test_thread() {
        let partitions = Partition::new_pool(1, 8);
        assert!(!partitions[0].is_current_thread_worker());
    }
}
