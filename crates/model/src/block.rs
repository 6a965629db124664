use std::fmt;

use alloy_primitives::{keccak256, B256};
use serde::{Deserialize, Serialize};

/// 32-byte identifier of a consensus participant.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub B256);

/// 32-byte identifier of a block (its header hash).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub B256);

impl NodeId {
    pub const ZERO: NodeId = NodeId(B256::ZERO);

    /// First 4 bytes as hex, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl BlockId {
    pub const ZERO: BlockId = BlockId(B256::ZERO);

    /// First 4 bytes as hex, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl From<[u8; 32]> for NodeId {
    fn from(bytes: [u8; 32]) -> Self {
        NodeId(B256::from(bytes))
    }
}

impl From<[u8; 32]> for BlockId {
    fn from(bytes: [u8; 32]) -> Self {
        BlockId(B256::from(bytes))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.short())
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self.short())
    }
}

/// Block header as seen by the synchronization core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub parent_id: BlockId,
    pub payload_hash: B256,
    pub timestamp: u64,
    pub proposer: NodeId,
}

impl BlockHeader {
    /// Compute the identifier of this header (keccak256 over the
    /// fixed-layout field encoding).
    pub fn id(&self) -> BlockId {
        let mut buf = [0u8; 8 + 32 + 32 + 8 + 32];
        buf[..8].copy_from_slice(&self.height.to_be_bytes());
        buf[8..40].copy_from_slice(self.parent_id.0.as_slice());
        buf[40..72].copy_from_slice(self.payload_hash.as_slice());
        buf[72..80].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[80..].copy_from_slice(self.proposer.0.as_slice());
        BlockId(keccak256(buf))
    }
}

/// Block payload. Transactions are opaque bytes to the sync core; the
/// compliance layer interprets them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub transactions: Vec<Vec<u8>>,
}

impl Payload {
    pub fn empty() -> Self {
        Payload::default()
    }

    /// Hash over the concatenation of transaction hashes.
    pub fn hash(&self) -> B256 {
        let mut buf = Vec::with_capacity(self.transactions.len() * 32);
        for tx in &self.transactions {
            buf.extend_from_slice(keccak256(tx).as_slice());
        }
        keccak256(&buf)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub payload: Payload,
}

impl Block {
    pub fn id(&self) -> BlockId {
        self.header.id()
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(height: u64) -> BlockHeader {
        BlockHeader {
            height,
            parent_id: BlockId::ZERO,
            payload_hash: B256::ZERO,
            timestamp: 1_700_000_000 + height,
            proposer: NodeId::ZERO,
        }
    }

    #[test]
    fn test_header_id_is_deterministic() {
        let a = header(7);
        let b = header(7);
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn test_header_id_depends_on_fields() {
        let a = header(7);
        let mut b = header(7);
        b.parent_id = BlockId::from([1u8; 32]);
        assert_ne!(a.id(), b.id());

        let c = header(8);
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn test_payload_hash_distinguishes_transactions() {
        let empty = Payload::empty();
        let one = Payload {
            transactions: vec![vec![1, 2, 3]],
        };
        assert_ne!(empty.hash(), one.hash());
    }
}
