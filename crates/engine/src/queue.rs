use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use model::NodeId;
use tracing::error;

/// Bounded FIFO of pending requests, deduplicated per origin: a later
/// request from the same origin overwrites the queued one (freshness wins),
/// keeping its place in line. Overflow evicts the oldest queued origin.
pub struct RequestQueue<T> {
    capacity: usize,
    inner: Mutex<Inner<T>>,
}

struct Inner<T> {
    entries: HashMap<NodeId, T>,
    order: VecDeque<NodeId>,
}

impl<T> RequestQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "request queue needs capacity");
        RequestQueue {
            capacity,
            inner: Mutex::new(Inner {
                entries: HashMap::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
            }),
        }
    }

    /// A poisoned lock means a panic landed mid-mutation and the map and
    /// order list can disagree. That corruption is not recoverable and must
    /// not be left running half-dead: final log, then terminate the process.
    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(_) => {
                error!("request queue poisoned, terminating");
                std::process::exit(1);
            }
        }
    }

    /// Queue a request. Never blocks beyond the internal lock.
    pub fn push(&self, origin: NodeId, payload: T) {
        let mut queue = self.lock();
        if queue.entries.insert(origin, payload).is_some() {
            // replaced the origin's queued request in place
            return;
        }
        if queue.order.len() == self.capacity {
            if let Some(evicted) = queue.order.pop_front() {
                queue.entries.remove(&evicted);
            }
        }
        queue.order.push_back(origin);
    }

    /// Dequeue the oldest request, if any.
    pub fn pop(&self) -> Option<(NodeId, T)> {
        let mut queue = self.lock();
        let origin = queue.order.pop_front()?;
        let payload = queue.entries.remove(&origin)?;
        Some((origin, payload))
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
