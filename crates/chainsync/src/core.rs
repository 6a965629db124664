use std::collections::HashMap;
use std::time::{Duration, Instant};

use model::{BlockHeader, BlockId, NodeId};
use tracing::debug;

use crate::status::Status;
use crate::{Batch, Range};

pub const DEFAULT_TOLERANCE: u64 = 10;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;
pub const DEFAULT_MAX_SIZE: usize = 8 * 64;
pub const DEFAULT_MAX_RANGE_SIZE: u64 = 64;
pub const DEFAULT_MAX_RANGES: usize = 3;
pub const DEFAULT_MAX_BATCH_IDS: usize = 64;
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(8);

/// Tuning knobs for the sync tracker.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Height delta considered "synced enough"; below this no traffic is
    /// generated.
    pub tolerance: u64,
    /// Per-entry request budget before the entry is dropped and left for
    /// polling to rediscover.
    pub max_attempts: u32,
    /// Upper bound on tracked entries (heights plus block IDs combined).
    pub max_size: usize,
    /// Maximum number of heights covered by a single range request.
    pub max_range_size: u64,
    /// Maximum ranges returned per scan.
    pub max_ranges: usize,
    /// Maximum block IDs returned per scan.
    pub max_batch_ids: usize,
    /// Minimum age of an outstanding request before it is re-sent.
    pub retry_interval: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            tolerance: DEFAULT_TOLERANCE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_size: DEFAULT_MAX_SIZE,
            max_range_size: DEFAULT_MAX_RANGE_SIZE,
            max_ranges: DEFAULT_MAX_RANGES,
            max_batch_ids: DEFAULT_MAX_BATCH_IDS,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// Last known state of one peer, fed by sync requests and responses.
#[derive(Debug, Clone)]
pub struct PeerStatus {
    pub observed_height: u64,
    pub last_heard: Instant,
}

/// In-memory bookkeeping for chain synchronization: which heights and block
/// IDs are missing, which have outstanding requests, and what heights peers
/// have reported. Ephemeral; rebuilt from polling after a restart.
///
/// Not internally synchronized. The engine wraps it in a single mutex so
/// scans observe a consistent snapshot.
pub struct SyncCore {
    config: CoreConfig,
    heights: HashMap<u64, Status>,
    block_ids: HashMap<BlockId, Status>,
    peers: HashMap<NodeId, PeerStatus>,
    /// Finalized height as of the latest call that carried it. Lets
    /// `handle_block` reject stale blocks without a state read.
    local_height: u64,
}

impl SyncCore {
    pub fn new(config: CoreConfig) -> Self {
        SyncCore {
            config,
            heights: HashMap::new(),
            block_ids: HashMap::new(),
            peers: HashMap::new(),
            local_height: 0,
        }
    }

    /// Number of tracked entries (heights plus block IDs).
    pub fn len(&self) -> usize {
        self.heights.len() + self.block_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heights.is_empty() && self.block_ids.is_empty()
    }

    /// True iff the reported height is within the configured tolerance of
    /// the local finalized height, in either direction.
    pub fn within_tolerance(&self, local: &BlockHeader, height: u64) -> bool {
        local.height.abs_diff(height) <= self.config.tolerance
    }

    /// Queue all heights between our finalized height and the reported one.
    /// Reports within tolerance are ignored; insertion stops `max_size`
    /// heights above local so a single absurd claim cannot flood the tracker.
    pub fn handle_height(&mut self, local: &BlockHeader, height: u64) {
        self.set_local(local.height);
        if height <= local.height.saturating_add(self.config.tolerance) {
            return;
        }
        let start = local.height.saturating_add(1);
        let ceiling = height.min(local.height.saturating_add(self.config.max_size as u64));
        let now = Instant::now();
        let mut added = 0usize;
        for h in start..=ceiling {
            self.heights.entry(h).or_insert_with(|| {
                added += 1;
                Status::queued(now)
            });
        }
        if added > 0 {
            debug!(
                local = local.height,
                reported = height,
                added,
                "queued missing heights"
            );
        }
        self.enforce_bound();
    }

    /// Record a peer's reported height. Observed heights only move forward;
    /// `last_heard` is stamped on every report.
    pub fn note_peer(&mut self, origin: NodeId, height: u64) {
        let now = Instant::now();
        let entry = self.peers.entry(origin).or_insert(PeerStatus {
            observed_height: height,
            last_heard: now,
        });
        if height > entry.observed_height {
            entry.observed_height = height;
        }
        entry.last_heard = now;

        // Permissioned peer sets are small; this only guards against
        // identity churn.
        if self.peers.len() > self.config.max_size {
            if let Some(stalest) = self
                .peers
                .iter()
                .min_by_key(|(_, p)| p.last_heard)
                .map(|(n, _)| *n)
            {
                self.peers.remove(&stalest);
            }
        }
    }

    pub fn peer_height(&self, origin: &NodeId) -> Option<u64> {
        self.peers.get(origin).map(|p| p.observed_height)
    }

    /// Queue a targeted block ID for fetching. Used by the compliance layer
    /// to ask for pending descendants it knows by ID but not by height.
    pub fn request_block_id(&mut self, id: BlockId) {
        let now = Instant::now();
        self.block_ids.entry(id).or_insert_with(|| Status::queued(now));
        self.enforce_bound();
    }

    /// Decide whether a delivered block should be forwarded to the
    /// compliance layer. Returns true at most once per height (or targeted
    /// ID) until finalization advances past it; this is where duplicate
    /// responses from the multicast fanout are suppressed.
    pub fn handle_block(&mut self, header: &BlockHeader) -> bool {
        if header.height <= self.local_height {
            return false;
        }
        let id = header.id();
        let height_received = self
            .heights
            .get(&header.height)
            .map(Status::is_received)
            .unwrap_or(false);
        let id_received = self
            .block_ids
            .get(&id)
            .map(Status::is_received)
            .unwrap_or(false);
        if height_received || id_received {
            return false;
        }

        let now = Instant::now();
        self.heights
            .entry(header.height)
            .or_insert_with(|| Status::queued(now))
            .mark_received();
        if let Some(status) = self.block_ids.get_mut(&id) {
            status.mark_received();
        }
        self.enforce_bound();
        true
    }

    /// Collect the work units to (re)request: contiguous height runs, each
    /// trimmed to `max_range_size`, and a batch of targeted block IDs.
    /// Also prunes everything at or below the finalized height.
    pub fn scan_pending(&mut self, local: &BlockHeader) -> (Vec<Range>, Vec<Batch>) {
        self.set_local(local.height);
        let now = Instant::now();
        let retry = self.config.retry_interval;

        let mut pending: Vec<u64> = self
            .heights
            .iter()
            .filter(|(_, s)| s.is_eligible(now, retry))
            .map(|(h, _)| *h)
            .collect();
        pending.sort_unstable();
        let ranges = coalesce_ranges(&pending, self.config.max_range_size, self.config.max_ranges);

        let ids: Vec<BlockId> = self
            .block_ids
            .iter()
            .filter(|(_, s)| s.is_eligible(now, retry))
            .map(|(id, _)| *id)
            .take(self.config.max_batch_ids)
            .collect();
        let batches = if ids.is_empty() {
            Vec::new()
        } else {
            vec![Batch { block_ids: ids }]
        };

        (ranges, batches)
    }

    /// Mark every height in the range as requested now. Entries that exhaust
    /// their attempt budget are dropped; polling will rediscover them if
    /// they are still missing.
    pub fn range_requested(&mut self, range: &Range) {
        let now = Instant::now();
        let max_attempts = self.config.max_attempts;
        for h in range.heights() {
            let Some(status) = self.heights.get_mut(&h) else {
                continue;
            };
            if status.is_received() {
                continue;
            }
            status.mark_requested(now);
            if status.attempts() >= max_attempts {
                self.heights.remove(&h);
                debug!(height = h, "giving up on height after max attempts");
            }
        }
    }

    /// Mark every block ID in the batch as requested now, with the same
    /// attempt budget as heights.
    pub fn batch_requested(&mut self, batch: &Batch) {
        let now = Instant::now();
        let max_attempts = self.config.max_attempts;
        for id in &batch.block_ids {
            let Some(status) = self.block_ids.get_mut(id) else {
                continue;
            };
            if status.is_received() {
                continue;
            }
            status.mark_requested(now);
            if status.attempts() >= max_attempts {
                self.block_ids.remove(id);
                debug!(block_id = %id.short(), "giving up on block after max attempts");
            }
        }
    }

    fn set_local(&mut self, height: u64) {
        self.local_height = height;
        let before = self.heights.len();
        self.heights.retain(|h, _| *h > height);
        let pruned = before - self.heights.len();
        if pruned > 0 {
            debug!(pruned, finalized = height, "pruned finalized heights");
        }
    }

    /// Evict oldest entries (by last request time, falling back to queue
    /// time) until the tracker fits its bound again.
    fn enforce_bound(&mut self) {
        while self.len() > self.config.max_size {
            let oldest_height = self
                .heights
                .iter()
                .min_by_key(|(_, s)| s.last_activity())
                .map(|(h, s)| (*h, s.last_activity()));
            let oldest_id = self
                .block_ids
                .iter()
                .min_by_key(|(_, s)| s.last_activity())
                .map(|(id, s)| (*id, s.last_activity()));
            match (oldest_height, oldest_id) {
                (Some((h, th)), Some((id, ti))) => {
                    if th <= ti {
                        self.heights.remove(&h);
                    } else {
                        self.block_ids.remove(&id);
                    }
                }
                (Some((h, _)), None) => {
                    self.heights.remove(&h);
                }
                (None, Some((id, _))) => {
                    self.block_ids.remove(&id);
                }
                (None, None) => return,
            }
        }
    }
}

/// Turn a sorted list of heights into maximal consecutive runs, each trimmed
/// to `max_range_size`. A trimmed run is not split: its tail waits for a
/// later scan, after the head has been filled.
fn coalesce_ranges(heights: &[u64], max_range_size: u64, max_ranges: usize) -> Vec<Range> {
    let mut ranges = Vec::new();
    let mut i = 0;
    while i < heights.len() && ranges.len() < max_ranges {
        let start = heights[i];
        let mut end = start;
        let mut j = i + 1;
        while j < heights.len() && heights[j] == end + 1 {
            end = heights[j];
            j += 1;
        }
        let trimmed = end.min(start.saturating_add(max_range_size - 1));
        ranges.push(Range {
            from: start,
            to: trimmed,
        });
        i = j;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;

    fn header(height: u64) -> BlockHeader {
        BlockHeader {
            height,
            parent_id: BlockId::ZERO,
            payload_hash: B256::ZERO,
            timestamp: 1_700_000_000 + height,
            proposer: NodeId::ZERO,
        }
    }

    fn block_id(byte: u8) -> BlockId {
        BlockId::from([byte; 32])
    }

    fn node_id(byte: u8) -> NodeId {
        NodeId::from([byte; 32])
    }

    #[test]
    fn test_within_tolerance_is_inclusive_both_directions() {
        let core = SyncCore::new(CoreConfig::default());
        let local = header(100);
        assert!(core.within_tolerance(&local, 100));
        assert!(core.within_tolerance(&local, 110));
        assert!(core.within_tolerance(&local, 90));
        assert!(!core.within_tolerance(&local, 111));
        assert!(!core.within_tolerance(&local, 89));
    }

    #[test]
    fn test_handle_height_within_tolerance_is_a_noop() {
        let mut core = SyncCore::new(CoreConfig::default());
        core.handle_height(&header(100), 105);
        assert!(core.is_empty());
    }

    #[test]
    fn test_handle_height_queues_the_full_gap() {
        let mut core = SyncCore::new(CoreConfig::default());
        core.handle_height(&header(100), 200);
        assert_eq!(core.len(), 100);

        let (ranges, batches) = core.scan_pending(&header(100));
        assert!(batches.is_empty());
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0], Range { from: 101, to: 164 });
    }

    #[test]
    fn test_handle_height_is_idempotent() {
        let mut core = SyncCore::new(CoreConfig::default());
        core.handle_height(&header(100), 150);
        let len = core.len();
        core.handle_height(&header(100), 150);
        assert_eq!(core.len(), len);
    }

    #[test]
    fn test_handle_height_caps_insertion_above_local() {
        let config = CoreConfig {
            max_size: 32,
            ..CoreConfig::default()
        };
        let mut core = SyncCore::new(config);
        core.handle_height(&header(100), u64::MAX);
        assert_eq!(core.len(), 32);
    }

    #[test]
    fn test_tracker_stays_bounded() {
        let config = CoreConfig {
            max_size: 16,
            ..CoreConfig::default()
        };
        let mut core = SyncCore::new(config);
        core.handle_height(&header(0), 16);
        for i in 0..8u8 {
            core.request_block_id(block_id(i + 1));
        }
        assert!(core.len() <= 16);
    }

    #[test]
    fn test_handle_block_suppresses_duplicates() {
        let mut core = SyncCore::new(CoreConfig::default());
        core.handle_height(&header(100), 150);
        let delivered = header(120);
        assert!(core.handle_block(&delivered));
        assert!(!core.handle_block(&delivered));
    }

    #[test]
    fn test_handle_block_rejects_finalized_heights() {
        let mut core = SyncCore::new(CoreConfig::default());
        core.handle_height(&header(100), 150);
        assert!(!core.handle_block(&header(100)));
        assert!(!core.handle_block(&header(50)));
    }

    #[test]
    fn test_handle_block_accepts_unsolicited_new_blocks_once() {
        let mut core = SyncCore::new(CoreConfig::default());
        core.handle_height(&header(100), 150);
        // height 300 was never queued
        let unsolicited = header(300);
        assert!(core.handle_block(&unsolicited));
        assert!(!core.handle_block(&unsolicited));
    }

    #[test]
    fn test_received_blocks_leave_scan_output() {
        let mut core = SyncCore::new(CoreConfig::default());
        core.handle_height(&header(100), 120);
        let (ranges, _) = core.scan_pending(&header(100));
        assert_eq!(ranges, vec![Range { from: 101, to: 120 }]);

        for h in 101..=120 {
            assert!(core.handle_block(&header(h)));
        }
        let (ranges, batches) = core.scan_pending(&header(100));
        assert!(ranges.is_empty());
        assert!(batches.is_empty());
    }

    #[test]
    fn test_scan_prunes_finalized_entries() {
        let mut core = SyncCore::new(CoreConfig::default());
        core.handle_height(&header(100), 150);
        assert_eq!(core.len(), 50);
        let (ranges, _) = core.scan_pending(&header(140));
        assert_eq!(core.len(), 10);
        assert_eq!(ranges, vec![Range { from: 141, to: 150 }]);
    }

    #[test]
    fn test_scan_coalesces_runs_and_trims() {
        let heights: Vec<u64> = (1..=10).chain(20..=22).chain(200..=400).collect();
        let ranges = coalesce_ranges(&heights, 64, 3);
        assert_eq!(
            ranges,
            vec![
                Range { from: 1, to: 10 },
                Range { from: 20, to: 22 },
                Range { from: 200, to: 263 },
            ]
        );
    }

    #[test]
    fn test_scan_caps_number_of_ranges() {
        let heights: Vec<u64> = vec![1, 3, 5, 7, 9];
        let ranges = coalesce_ranges(&heights, 64, 3);
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0], Range { from: 1, to: 1 });
        assert_eq!(ranges[2], Range { from: 5, to: 5 });
    }

    #[test]
    fn test_requested_entries_wait_for_retry_interval() {
        let config = CoreConfig {
            retry_interval: Duration::from_secs(8),
            ..CoreConfig::default()
        };
        let mut core = SyncCore::new(config);
        core.handle_height(&header(100), 120);

        let (ranges, _) = core.scan_pending(&header(100));
        assert_eq!(ranges.len(), 1);
        core.range_requested(&ranges[0]);

        // outstanding and fresh, so the next scan stays quiet
        let (ranges, _) = core.scan_pending(&header(100));
        assert!(ranges.is_empty());
    }

    #[test]
    fn test_stale_requests_are_rescanned_with_bumped_attempts() {
        let config = CoreConfig {
            retry_interval: Duration::from_millis(1),
            ..CoreConfig::default()
        };
        let mut core = SyncCore::new(config);
        core.handle_height(&header(100), 110);

        let (ranges, _) = core.scan_pending(&header(100));
        core.range_requested(&ranges[0]);
        std::thread::sleep(Duration::from_millis(5));

        let (ranges, _) = core.scan_pending(&header(100));
        assert_eq!(ranges, vec![Range { from: 101, to: 110 }]);
        core.range_requested(&ranges[0]);
        assert_eq!(core.heights[&101].attempts(), 2);
    }

    #[test]
    fn test_entries_are_dropped_after_max_attempts() {
        let config = CoreConfig {
            retry_interval: Duration::from_millis(1),
            max_attempts: 2,
            ..CoreConfig::default()
        };
        let mut core = SyncCore::new(config);
        core.handle_height(&header(100), 110);

        for _ in 0..2 {
            let (ranges, _) = core.scan_pending(&header(100));
            assert!(!ranges.is_empty());
            core.range_requested(&ranges[0]);
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(core.is_empty());

        // a later height report rediscovers the gap
        core.handle_height(&header(100), 110);
        assert_eq!(core.len(), 10);
    }

    #[test]
    fn test_block_ids_flow_through_batches() {
        let mut core = SyncCore::new(CoreConfig::default());
        let a = block_id(0xaa);
        let b = block_id(0xbb);
        core.request_block_id(a);
        core.request_block_id(b);

        let (_, batches) = core.scan_pending(&header(100));
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        core.batch_requested(&batches[0]);

        let (_, batches) = core.scan_pending(&header(100));
        assert!(batches.is_empty());
    }

    #[test]
    fn test_batch_ids_retired_by_matching_block() {
        let config = CoreConfig {
            retry_interval: Duration::from_millis(1),
            ..CoreConfig::default()
        };
        let mut core = SyncCore::new(config);
        let delivered = header(120);
        core.request_block_id(delivered.id());

        assert!(core.handle_block(&delivered));
        std::thread::sleep(Duration::from_millis(5));
        let (_, batches) = core.scan_pending(&header(100));
        assert!(batches.is_empty());
    }

    #[test]
    fn test_peer_heights_are_monotonic() {
        let mut core = SyncCore::new(CoreConfig::default());
        let peer = node_id(1);
        core.note_peer(peer, 50);
        assert_eq!(core.peer_height(&peer), Some(50));
        core.note_peer(peer, 40);
        assert_eq!(core.peer_height(&peer), Some(50));
        core.note_peer(peer, 60);
        assert_eq!(core.peer_height(&peer), Some(60));
    }
}
