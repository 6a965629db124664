use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(8);
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_POLL_FANOUT: usize = 3;
pub const DEFAULT_REQUEST_FANOUT: usize = 3;
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_RESPONSE_CAPACITY: usize = 128;

/// Engine tuning. Tracker-side knobs live in `chainsync::CoreConfig`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Height poll frequency. Zero disables polling.
    pub poll_interval: Duration,
    /// Gap-scan frequency.
    pub scan_interval: Duration,
    /// Peers sampled per height poll.
    pub poll_fanout: usize,
    /// Peers sampled per range or batch request.
    pub request_fanout: usize,
    /// Capacity of each request queue. Requests deduplicate per origin, so
    /// one slot per expected peer is enough.
    pub queue_capacity: usize,
    /// Capacity of each response store.
    pub response_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            poll_interval: DEFAULT_POLL_INTERVAL,
            scan_interval: DEFAULT_SCAN_INTERVAL,
            poll_fanout: DEFAULT_POLL_FANOUT,
            request_fanout: DEFAULT_REQUEST_FANOUT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            response_capacity: DEFAULT_RESPONSE_CAPACITY,
        }
    }
}
