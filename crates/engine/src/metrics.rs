use std::sync::atomic::{AtomicU64, Ordering};

use network::MessageKind;

/// Message counters the engine reports, tagged by message kind. Injected
/// through the constructor like every other collaborator.
pub trait EngineMetrics: Send + Sync + 'static {
    fn message_received(&self, kind: MessageKind);
    fn message_handled(&self, kind: MessageKind);
    fn message_sent(&self, kind: MessageKind);
}

impl<M: EngineMetrics> EngineMetrics for std::sync::Arc<M> {
    fn message_received(&self, kind: MessageKind) {
        (**self).message_received(kind);
    }

    fn message_handled(&self, kind: MessageKind) {
        (**self).message_handled(kind);
    }

    fn message_sent(&self, kind: MessageKind) {
        (**self).message_sent(kind);
    }
}

/// Metrics sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl EngineMetrics for NoopMetrics {
    fn message_received(&self, _kind: MessageKind) {}
    fn message_handled(&self, _kind: MessageKind) {}
    fn message_sent(&self, _kind: MessageKind) {}
}

/// Plain atomic counters, one per (direction, kind). Enough for scrape-style
/// export and for assertions in tests.
#[derive(Debug)]
pub struct MessageCounters {
    received: [AtomicU64; 5],
    handled: [AtomicU64; 5],
    sent: [AtomicU64; 5],
}

impl Default for MessageCounters {
    fn default() -> Self {
        MessageCounters {
            received: std::array::from_fn(|_| AtomicU64::new(0)),
            handled: std::array::from_fn(|_| AtomicU64::new(0)),
            sent: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }
}

impl MessageCounters {
    pub fn new() -> Self {
        MessageCounters::default()
    }

    pub fn received_count(&self, kind: MessageKind) -> u64 {
        self.received[kind.index()].load(Ordering::Relaxed)
    }

    pub fn handled_count(&self, kind: MessageKind) -> u64 {
        self.handled[kind.index()].load(Ordering::Relaxed)
    }

    pub fn sent_count(&self, kind: MessageKind) -> u64 {
        self.sent[kind.index()].load(Ordering::Relaxed)
    }
}

impl EngineMetrics for MessageCounters {
    fn message_received(&self, kind: MessageKind) {
        self.received[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    fn message_handled(&self, kind: MessageKind) {
        self.handled[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    fn message_sent(&self, kind: MessageKind) {
        self.sent[kind.index()].fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_track_per_kind() {
        let counters = MessageCounters::new();
        counters.message_received(MessageKind::SyncRequest);
        counters.message_received(MessageKind::SyncRequest);
        counters.message_sent(MessageKind::BlockResponse);

        assert_eq!(counters.received_count(MessageKind::SyncRequest), 2);
        assert_eq!(counters.received_count(MessageKind::BlockResponse), 0);
        assert_eq!(counters.sent_count(MessageKind::BlockResponse), 1);
        assert_eq!(counters.handled_count(MessageKind::SyncRequest), 0);
    }
}
