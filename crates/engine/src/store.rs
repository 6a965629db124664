use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use model::NodeId;
use tracing::error;

/// Bounded FIFO store for inbound responses. `put` never blocks beyond the
/// internal lock; overflow drops the oldest stored response, so unsolicited
/// floods cannot grow memory.
pub struct ResponseStore<T> {
    capacity: usize,
    inner: Mutex<VecDeque<(NodeId, T)>>,
}

impl<T> ResponseStore<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "response store needs capacity");
        ResponseStore {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// A poisoned lock means a panic landed mid-mutation. Store corruption
    /// is not recoverable and must not be left running half-dead: final
    /// log, then terminate the process.
    fn lock(&self) -> MutexGuard<'_, VecDeque<(NodeId, T)>> {
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(_) => {
                error!("response store poisoned, terminating");
                std::process::exit(1);
            }
        }
    }

    pub fn put(&self, origin: NodeId, payload: T) {
        let mut store = self.lock();
        if store.len() == self.capacity {
            store.pop_front();
        }
        store.push_back((origin, payload));
    }

    pub fn get(&self) -> Option<(NodeId, T)> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_id(byte: u8) -> NodeId {
        NodeId::from([byte; 32])
    }

    #[test]
    fn test_get_pops_oldest_first() {
        let store = ResponseStore::new(4);
        store.put(node_id(1), 10u64);
        store.put(node_id(2), 20u64);
        assert_eq!(store.get(), Some((node_id(1), 10)));
        assert_eq!(store.get(), Some((node_id(2), 20)));
        assert_eq!(store.get(), None);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let store = ResponseStore::new(2);
        store.put(node_id(1), 10u64);
        store.put(node_id(2), 20u64);
        store.put(node_id(3), 30u64);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(), Some((node_id(2), 20)));
        assert_eq!(store.get(), Some((node_id(3), 30)));
    }
}
