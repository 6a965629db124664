use model::{Block, BlockId};
use serde::{Deserialize, Serialize};

/// Height handshake: "my finalized height is `height`, what is yours?"
/// Multicast by the poll loop; also sent by any peer probing us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub nonce: u64,
    pub height: u64,
}

/// Reply to a sync request from a node that is ahead of the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub nonce: u64,
    pub height: u64,
}

/// Request for a contiguous, inclusive range of finalized blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeRequest {
    pub nonce: u64,
    pub from_height: u64,
    pub to_height: u64,
}

/// Request for specific blocks by identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub nonce: u64,
    pub block_ids: Vec<BlockId>,
}

/// Blocks answering a range or batch request. The nonce echoes the request
/// for operator tracing; matching is by height and ID, never by nonce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockResponse {
    pub nonce: u64,
    pub blocks: Vec<Block>,
}

/// Every message the synchronization protocol puts on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMessage {
    SyncRequest(SyncRequest),
    SyncResponse(SyncResponse),
    RangeRequest(RangeRequest),
    BatchRequest(BatchRequest),
    BlockResponse(BlockResponse),
}

impl SyncMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            SyncMessage::SyncRequest(_) => MessageKind::SyncRequest,
            SyncMessage::SyncResponse(_) => MessageKind::SyncResponse,
            SyncMessage::RangeRequest(_) => MessageKind::RangeRequest,
            SyncMessage::BatchRequest(_) => MessageKind::BatchRequest,
            SyncMessage::BlockResponse(_) => MessageKind::BlockResponse,
        }
    }
}

/// Message kind tag, used for metrics labels and log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    SyncRequest,
    SyncResponse,
    RangeRequest,
    BatchRequest,
    BlockResponse,
}

impl MessageKind {
    pub const ALL: [MessageKind; 5] = [
        MessageKind::SyncRequest,
        MessageKind::SyncResponse,
        MessageKind::RangeRequest,
        MessageKind::BatchRequest,
        MessageKind::BlockResponse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::SyncRequest => "sync_request",
            MessageKind::SyncResponse => "sync_response",
            MessageKind::RangeRequest => "range_request",
            MessageKind::BatchRequest => "batch_request",
            MessageKind::BlockResponse => "block_response",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            MessageKind::SyncRequest => 0,
            MessageKind::SyncResponse => 1,
            MessageKind::RangeRequest => 2,
            MessageKind::BatchRequest => 3,
            MessageKind::BlockResponse => 4,
        }
    }
}
