use serde::{Deserialize, Serialize};

use crate::block::{Block, NodeId};

/// A block obtained through synchronization, handed off to the compliance
/// layer together with the peer it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedBlock {
    pub origin_id: NodeId,
    pub block: Block,
}
