pub mod codec;
pub mod conduit;
pub mod messages;

pub use codec::CodecError;
pub use conduit::{sample_targets, Conduit, ConduitError};
pub use messages::{
    BatchRequest, BlockResponse, MessageKind, RangeRequest, SyncMessage, SyncRequest, SyncResponse,
};
